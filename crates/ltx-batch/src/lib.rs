//! Reconciliation batch pipeline.
//!
//! Composes the pure matcher and differential syncer with file I/O: loads an
//! export manifest and registration snapshot, matches every payment, voids
//! stale stored matches, attaches field deltas for certain matches, and
//! writes a review bundle per run (markdown brief, proposals JSON, parquet
//! snapshots with a sha256 manifest). The pipeline never writes to the
//! destination store; applying proposed changes is an operator action.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use ltx_core::{lookup_str, PaymentProvider, PaymentRecord, RegistrationRecord};
use ltx_ingest::{adapter_for_provider, load_payment_export, load_registration_snapshot};
use ltx_recon::{
    diff_fields, match_payment, ticket_ownership_defects, verify_stored_match, MatchOutcome,
    MatchWeights, DEFAULT_METADATA_KEYS,
};
use ltx_storage::AuditStore;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ltx-batch";

#[derive(Debug, Clone, Deserialize)]
pub struct ExportManifest {
    pub exports: Vec<ExportEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportEntry {
    pub export_id: String,
    pub provider: PaymentProvider,
    pub path: String,
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub exports_manifest: PathBuf,
    pub registrations_snapshot: PathBuf,
    pub import_snapshot: Option<PathBuf>,
    pub weights_file: PathBuf,
    pub audit_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub reconcile_cron_1: String,
    pub reconcile_cron_2: String,
    pub workspace_root: PathBuf,
}

impl ReconcileConfig {
    pub fn from_env() -> Self {
        Self {
            exports_manifest: std::env::var("LTX_EXPORTS_MANIFEST")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("exports.yaml")),
            registrations_snapshot: std::env::var("LTX_REGISTRATIONS_SNAPSHOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("registrations.json")),
            import_snapshot: std::env::var("LTX_IMPORT_SNAPSHOT").ok().map(PathBuf::from),
            weights_file: std::env::var("LTX_WEIGHTS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("weights.yaml")),
            audit_dir: std::env::var("LTX_AUDIT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./audit")),
            scheduler_enabled: std::env::var("LTX_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            reconcile_cron_1: std::env::var("RECONCILE_CRON_1")
                .unwrap_or_else(|_| "0 6 * * *".to_string()),
            reconcile_cron_2: std::env::var("RECONCILE_CRON_2")
                .unwrap_or_else(|_| "0 18 * * *".to_string()),
            workspace_root: PathBuf::from("."),
        }
    }
}

/// How one payment ended up after matching; drives the review brief and the
/// parquet snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalDisposition {
    Certain,
    AmbiguousCertain,
    NeedsReview,
    Unmatched,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchProposal {
    pub payment_id: String,
    pub provider: PaymentProvider,
    pub amount: f64,
    pub customer_email: Option<String>,
    pub disposition: ProposalDisposition,
    pub stored_match_voided: bool,
    pub outcome: MatchOutcome,
    /// Present only for certain matches with a fresh source document: the
    /// minimal partial update that would bring the stored registration up to
    /// date. Proposed, never applied here.
    pub field_delta: Option<JsonMap<String, JsonValue>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionRow {
    pub kind: String,
    pub reference: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileRunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub enabled_exports: usize,
    pub payments_seen: usize,
    pub certain_matches: usize,
    pub ambiguous_matches: usize,
    pub needs_review: usize,
    pub unmatched: usize,
    pub voided_stored_matches: usize,
    pub ownership_defects: usize,
    pub deltas_proposed: usize,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub struct ReconcilePipeline {
    config: ReconcileConfig,
    audit_store: AuditStore,
    weights: MatchWeights,
}

impl ReconcilePipeline {
    pub fn new(config: ReconcileConfig) -> Result<Self> {
        let audit_store = AuditStore::new(config.audit_dir.clone());
        let weights = load_weights(&config.workspace_root.join(&config.weights_file))?;
        Ok(Self {
            config,
            audit_store,
            weights,
        })
    }

    pub fn weights(&self) -> &MatchWeights {
        &self.weights
    }

    pub async fn run_once(&self) -> Result<ReconcileRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let manifest = self.load_export_manifest().await?;
        let enabled_exports: Vec<_> = manifest.exports.into_iter().filter(|e| e.enabled).collect();

        let snapshot_path = self
            .config
            .workspace_root
            .join(&self.config.registrations_snapshot);
        let snapshot = load_registration_snapshot(&snapshot_path)
            .with_context(|| format!("loading registrations from {}", snapshot_path.display()))?;

        let mut exceptions: Vec<ExceptionRow> = snapshot
            .skipped
            .iter()
            .map(|reason| ExceptionRow {
                kind: "malformed_registration".to_string(),
                reference: snapshot_path.display().to_string(),
                detail: reason.clone(),
            })
            .collect();

        let registrations = snapshot.records;
        let by_id: HashMap<&str, &RegistrationRecord> = registrations
            .iter()
            .map(|r| (r.registration_id.as_str(), r))
            .collect();

        let import_docs = self.load_import_snapshot().await?;

        let mut ownership_defects = 0usize;
        for registration in &registrations {
            for defect in ticket_ownership_defects(registration) {
                ownership_defects += 1;
                exceptions.push(ExceptionRow {
                    kind: "ticket_ownership".to_string(),
                    reference: registration.registration_id.clone(),
                    detail: serde_json::to_string(&defect).unwrap_or_default(),
                });
            }
        }

        let mut proposals: Vec<MatchProposal> = Vec::new();
        let mut payments_seen = 0usize;
        let mut voided_stored_matches = 0usize;

        for export in &enabled_exports {
            let export_path = self.config.workspace_root.join(&export.path);
            let bytes = match fs::read(&export_path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(export_id = %export.export_id, error = %err, "skipping unreadable export");
                    exceptions.push(ExceptionRow {
                        kind: "unreadable_export".to_string(),
                        reference: export.export_id.clone(),
                        detail: err.to_string(),
                    });
                    continue;
                }
            };
            self.audit_store
                .store_bytes(started_at, &export.export_id, "json", &bytes)
                .await
                .context("archiving raw export")?;

            let export_file = match load_payment_export(&export_path) {
                Ok(file) => file,
                Err(err) => {
                    warn!(export_id = %export.export_id, error = %err, "skipping unparseable export");
                    exceptions.push(ExceptionRow {
                        kind: "unparseable_export".to_string(),
                        reference: export.export_id.clone(),
                        detail: format!("{err:#}"),
                    });
                    continue;
                }
            };

            let adapter = adapter_for_provider(export_file.provider);
            for (index, entry) in export_file.payments.iter().enumerate() {
                let payment = match adapter.parse_payment(entry) {
                    Ok(payment) => payment,
                    Err(err) => {
                        warn!(export_id = %export.export_id, index, error = %err, "skipping malformed payment entry");
                        exceptions.push(ExceptionRow {
                            kind: "malformed_payment".to_string(),
                            reference: format!("{}[{index}]", export.export_id),
                            detail: err.to_string(),
                        });
                        continue;
                    }
                };
                payments_seen += 1;

                let (outcome, stored_match_voided) =
                    self.resolve_outcome(&payment, &registrations, &by_id);
                if stored_match_voided {
                    voided_stored_matches += 1;
                }

                let disposition = disposition_for(&outcome);
                if disposition == ProposalDisposition::AmbiguousCertain {
                    exceptions.push(ExceptionRow {
                        kind: "ambiguous_certain_match".to_string(),
                        reference: payment.payment_id.clone(),
                        detail: format!(
                            "payment id present on registrations: {}",
                            outcome
                                .results()
                                .iter()
                                .map(|r| r.registration_id.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    });
                }

                let field_delta = match &outcome {
                    MatchOutcome::Certain { result } => compute_field_delta(
                        &import_docs,
                        by_id.get(result.registration_id.as_str()).copied(),
                        &result.registration_id,
                    ),
                    _ => None,
                };

                proposals.push(MatchProposal {
                    payment_id: payment.payment_id.clone(),
                    provider: payment.provider,
                    amount: payment.amount,
                    customer_email: payment.customer_email.clone(),
                    disposition,
                    stored_match_voided,
                    outcome,
                    field_delta,
                });
            }
        }

        let certain_matches = count_disposition(&proposals, ProposalDisposition::Certain);
        let ambiguous_matches =
            count_disposition(&proposals, ProposalDisposition::AmbiguousCertain);
        let needs_review = count_disposition(&proposals, ProposalDisposition::NeedsReview);
        let unmatched = count_disposition(&proposals, ProposalDisposition::Unmatched);
        let deltas_proposed = proposals
            .iter()
            .filter(|p| p.field_delta.as_ref().is_some_and(|d| !d.is_empty()))
            .count();

        let finished_at = Utc::now();
        let reports_dir = self
            .write_reports(
                run_id,
                started_at,
                finished_at,
                &enabled_exports,
                &proposals,
                &exceptions,
            )
            .await?;
        let manifest_path = self
            .export_parquet_snapshots(&reports_dir, &proposals, &exceptions)
            .await?;

        self.audit_store
            .store_record(started_at, "proposals", &proposals)
            .await
            .context("archiving proposal records")?;

        Ok(ReconcileRunSummary {
            run_id,
            started_at,
            finished_at,
            enabled_exports: enabled_exports.len(),
            payments_seen,
            certain_matches,
            ambiguous_matches,
            needs_review,
            unmatched,
            voided_stored_matches,
            ownership_defects,
            deltas_proposed,
            reports_dir: reports_dir.display().to_string(),
            parquet_manifest: manifest_path.display().to_string(),
        })
    }

    /// Stored matches are re-derived, never trusted, and never a shortcut:
    /// every payment goes through the full matcher over the whole candidate
    /// set, so a duplicate payment reference on a second registration still
    /// surfaces as ambiguous even when a cached link exists. The stored id
    /// only decides whether the cached link counts as voided.
    fn resolve_outcome(
        &self,
        payment: &PaymentRecord,
        registrations: &[RegistrationRecord],
        by_id: &HashMap<&str, &RegistrationRecord>,
    ) -> (MatchOutcome, bool) {
        let outcome = match_payment(payment, registrations, &self.weights);

        let mut voided = false;
        if let Some(stored_id) = &payment.matched_registration_id {
            let rederives = by_id
                .get(stored_id.as_str())
                .map_or(false, |registration| {
                    verify_stored_match(payment, registration)
                });
            if !rederives {
                warn!(
                    payment_id = %payment.payment_id,
                    stored_registration_id = %stored_id,
                    "stored match void; cached link cannot be re-derived"
                );
                voided = true;
            }
        }

        (outcome, voided)
    }

    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for cron in [&self.config.reconcile_cron_1, &self.config.reconcile_cron_2] {
            let config = self.config.clone();
            let job = Job::new_async(cron, move |_uuid, _l| {
                let config = config.clone();
                Box::pin(async move {
                    run_scheduled(config).await;
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }

    async fn load_export_manifest(&self) -> Result<ExportManifest> {
        let path = self.config.workspace_root.join(&self.config.exports_manifest);
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    async fn load_import_snapshot(&self) -> Result<HashMap<String, JsonValue>> {
        let Some(rel) = &self.config.import_snapshot else {
            return Ok(HashMap::new());
        };
        let path = self.config.workspace_root.join(rel);
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let docs: Vec<JsonValue> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

        let mut by_id = HashMap::with_capacity(docs.len());
        for doc in docs {
            let id = lookup_str(&doc, "registrationId")
                .or_else(|| lookup_str(&doc, "registration_id"))
                .or_else(|| lookup_str(&doc, "_id"))
                .map(str::to_string);
            if let Some(id) = id {
                by_id.insert(id, doc);
            }
        }
        Ok(by_id)
    }

    async fn write_reports(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        enabled_exports: &[ExportEntry],
        proposals: &[MatchProposal],
        exceptions: &[ExceptionRow],
    ) -> Result<PathBuf> {
        let reports_dir = self
            .config
            .workspace_root
            .join("reports")
            .join(run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let run_record = ReconcileRunRecord {
            run_id,
            started_at,
            finished_at,
            status: "completed".to_string(),
        };

        let mut disposition_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for proposal in proposals {
            *disposition_counts
                .entry(disposition_label(proposal.disposition))
                .or_default() += 1;
        }

        let brief = format!(
            "# Reconciliation Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Enabled exports: {}\n- Payments processed: {}\n- Exceptions: {}\n\n## Dispositions\n{}\n\nHeuristic candidates require operator confirmation before any write;\nsee `match_proposals.json` for evidence and proposed field deltas.\n",
            run_record.run_id,
            run_record.started_at,
            run_record.finished_at,
            enabled_exports.len(),
            proposals.len(),
            exceptions.len(),
            disposition_counts
                .iter()
                .map(|(k, v)| format!("- {}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n")
        );
        fs::write(reports_dir.join("reconciliation_brief.md"), brief)
            .await
            .context("writing reconciliation_brief.md")?;

        let proposals_json = serde_json::to_vec_pretty(&serde_json::json!({
            "run": run_record,
            "proposals": proposals,
            "exceptions": exceptions,
        }))
        .context("serializing match proposals")?;
        fs::write(reports_dir.join("match_proposals.json"), proposals_json)
            .await
            .context("writing match_proposals.json")?;

        Ok(reports_dir)
    }

    async fn export_parquet_snapshots(
        &self,
        reports_dir: &PathBuf,
        proposals: &[MatchProposal],
        exceptions: &[ExceptionRow],
    ) -> Result<PathBuf> {
        let snapshot_dir = reports_dir.join("snapshots");
        fs::create_dir_all(&snapshot_dir)
            .await
            .with_context(|| format!("creating {}", snapshot_dir.display()))?;

        let matches_path = snapshot_dir.join("matches.parquet");
        let unmatched_path = snapshot_dir.join("unmatched.parquet");
        let exceptions_path = snapshot_dir.join("exceptions.parquet");

        write_matches_parquet(&matches_path, proposals)?;
        write_unmatched_parquet(&unmatched_path, proposals)?;
        write_exceptions_parquet(&exceptions_path, exceptions)?;

        let manifest = ParquetManifest {
            schema_version: 1,
            files: vec![
                manifest_entry("matches", reports_dir, &matches_path)?,
                manifest_entry("unmatched", reports_dir, &unmatched_path)?,
                manifest_entry("exceptions", reports_dir, &exceptions_path)?,
            ],
        };

        let manifest_path = snapshot_dir.join("manifest.json");
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
        fs::write(&manifest_path, bytes)
            .await
            .with_context(|| format!("writing {}", manifest_path.display()))?;

        Ok(manifest_path)
    }
}

/// Body of a scheduled trigger: one full reconciliation pass with the given
/// config. Failures are logged and swallowed so one bad run never kills the
/// scheduler loop.
pub async fn run_scheduled(config: ReconcileConfig) {
    match ReconcilePipeline::new(config) {
        Ok(pipeline) => match pipeline.run_once().await {
            Ok(summary) => info!(
                run_id = %summary.run_id,
                payments = summary.payments_seen,
                certain = summary.certain_matches,
                reports_dir = %summary.reports_dir,
                "scheduled reconciliation finished"
            ),
            Err(err) => warn!(error = %format!("{err:#}"), "scheduled reconciliation failed"),
        },
        Err(err) => warn!(error = %format!("{err:#}"), "scheduled reconciliation could not start"),
    }
}

pub async fn run_reconcile_once_from_env() -> Result<ReconcileRunSummary> {
    let config = ReconcileConfig::from_env();
    let pipeline = ReconcilePipeline::new(config)?;
    pipeline.run_once().await
}

/// Markdown digest of the most recent reconciliation runs, newest first.
pub fn report_runs_markdown(runs: usize, workspace_root: Option<PathBuf>) -> Result<String> {
    let root = workspace_root.unwrap_or_else(|| PathBuf::from("."));
    let reports_root = root.join("reports");
    let mut dirs = std::fs::read_dir(&reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();
    let dirs = dirs.into_iter().take(runs.max(1)).collect::<Vec<_>>();

    let mut lines = vec!["# Reconciliation Runs".to_string(), String::new()];
    for dir in dirs {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let proposals_path = dir.path().join("match_proposals.json");
        let brief_path = dir.path().join("reconciliation_brief.md");
        let manifest_path = dir.path().join("snapshots").join("manifest.json");

        let proposals_value: JsonValue = serde_json::from_str(
            &std::fs::read_to_string(&proposals_path)
                .with_context(|| format!("reading {}", proposals_path.display()))?,
        )
        .with_context(|| format!("parsing {}", proposals_path.display()))?;
        let proposal_count = proposals_value
            .get("proposals")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let exception_count = proposals_value
            .get("exceptions")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- proposals: {proposal_count}"));
        lines.push(format!("- exceptions: {exception_count}"));
        lines.push(format!("- detail: `{}`", proposals_path.display()));
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        if brief_path.exists() {
            lines.push(format!("- brief: `{}`", brief_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

fn load_weights(path: &PathBuf) -> Result<MatchWeights> {
    if !path.exists() {
        return Ok(MatchWeights::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn disposition_for(outcome: &MatchOutcome) -> ProposalDisposition {
    match outcome {
        MatchOutcome::Certain { .. } => ProposalDisposition::Certain,
        MatchOutcome::AmbiguousCertain { .. } => ProposalDisposition::AmbiguousCertain,
        MatchOutcome::Candidates { results } if results.is_empty() => {
            ProposalDisposition::Unmatched
        }
        MatchOutcome::Candidates { .. } => ProposalDisposition::NeedsReview,
    }
}

fn disposition_label(disposition: ProposalDisposition) -> &'static str {
    match disposition {
        ProposalDisposition::Certain => "certain",
        ProposalDisposition::AmbiguousCertain => "ambiguous_certain",
        ProposalDisposition::NeedsReview => "needs_review",
        ProposalDisposition::Unmatched => "unmatched",
    }
}

fn count_disposition(proposals: &[MatchProposal], disposition: ProposalDisposition) -> usize {
    proposals
        .iter()
        .filter(|p| p.disposition == disposition)
        .count()
}

fn compute_field_delta(
    import_docs: &HashMap<String, JsonValue>,
    registration: Option<&RegistrationRecord>,
    registration_id: &str,
) -> Option<JsonMap<String, JsonValue>> {
    let source = import_docs.get(registration_id)?.as_object()?;
    let destination = registration?.document.as_object()?;
    Some(diff_fields(source, destination, DEFAULT_METADATA_KEYS))
}

fn best_result(proposal: &MatchProposal) -> Option<&ltx_recon::MatchResult> {
    proposal.outcome.results().first()
}

fn write_parquet(path: &PathBuf, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_matches_parquet(path: &PathBuf, proposals: &[MatchProposal]) -> Result<()> {
    let rows: Vec<&MatchProposal> = proposals
        .iter()
        .filter(|p| {
            matches!(
                p.disposition,
                ProposalDisposition::Certain | ProposalDisposition::NeedsReview
            )
        })
        .collect();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("payment_id", DataType::Utf8, false),
        ArrowField::new("registration_id", DataType::Utf8, true),
        ArrowField::new("confidence", DataType::UInt32, true),
        ArrowField::new("certain", DataType::Boolean, false),
        ArrowField::new("criteria", DataType::Utf8, true),
        ArrowField::new("stored_match_voided", DataType::Boolean, false),
    ]));

    let payment_ids = StringArray::from(
        rows.iter()
            .map(|p| Some(p.payment_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let registration_ids = StringArray::from(
        rows.iter()
            .map(|p| best_result(p).map(|r| r.registration_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let confidences = UInt32Array::from(
        rows.iter()
            .map(|p| best_result(p).map(|r| r.confidence))
            .collect::<Vec<_>>(),
    );
    let certains = BooleanArray::from(
        rows.iter()
            .map(|p| p.disposition == ProposalDisposition::Certain)
            .collect::<Vec<_>>(),
    );
    let criteria = StringArray::from(
        rows.iter()
            .map(|p| {
                best_result(p).map(|r| {
                    r.evidence
                        .iter()
                        .map(|e| format!("{:?}", e.criterion))
                        .collect::<Vec<_>>()
                        .join(",")
                })
            })
            .collect::<Vec<_>>(),
    );
    let voided = BooleanArray::from(
        rows.iter()
            .map(|p| p.stored_match_voided)
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(payment_ids),
            Arc::new(registration_ids),
            Arc::new(confidences),
            Arc::new(certains),
            Arc::new(criteria),
            Arc::new(voided),
        ],
    )
    .context("building matches record batch")?;
    write_parquet(path, batch)
}

fn write_unmatched_parquet(path: &PathBuf, proposals: &[MatchProposal]) -> Result<()> {
    let rows: Vec<&MatchProposal> = proposals
        .iter()
        .filter(|p| p.disposition == ProposalDisposition::Unmatched)
        .collect();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("payment_id", DataType::Utf8, false),
        ArrowField::new("provider", DataType::Utf8, false),
        ArrowField::new("amount", DataType::Float64, false),
        ArrowField::new("customer_email", DataType::Utf8, true),
    ]));

    let payment_ids = StringArray::from(
        rows.iter()
            .map(|p| Some(p.payment_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let providers = StringArray::from(
        rows.iter()
            .map(|p| Some(p.provider.as_str()))
            .collect::<Vec<_>>(),
    );
    let amounts = Float64Array::from(rows.iter().map(|p| p.amount).collect::<Vec<_>>());
    let emails = StringArray::from(
        rows.iter()
            .map(|p| p.customer_email.as_deref())
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(payment_ids),
            Arc::new(providers),
            Arc::new(amounts),
            Arc::new(emails),
        ],
    )
    .context("building unmatched record batch")?;
    write_parquet(path, batch)
}

fn write_exceptions_parquet(path: &PathBuf, exceptions: &[ExceptionRow]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("kind", DataType::Utf8, false),
        ArrowField::new("reference", DataType::Utf8, false),
        ArrowField::new("detail", DataType::Utf8, false),
    ]));

    let kinds = StringArray::from(
        exceptions
            .iter()
            .map(|e| Some(e.kind.as_str()))
            .collect::<Vec<_>>(),
    );
    let references = StringArray::from(
        exceptions
            .iter()
            .map(|e| Some(e.reference.as_str()))
            .collect::<Vec<_>>(),
    );
    let details = StringArray::from(
        exceptions
            .iter()
            .map(|e| Some(e.detail.as_str()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(kinds), Arc::new(references), Arc::new(details)],
    )
    .context("building exceptions record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &PathBuf, path: &PathBuf) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}
