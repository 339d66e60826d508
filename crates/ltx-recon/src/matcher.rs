//! Payment-to-registration matcher.
//!
//! Two paths: an authoritative certain-match probe (verbatim payment id
//! equality at a known field path) and, only when no certain match exists, a
//! weighted heuristic scorer over corroborating evidence. Heuristic results
//! are advisory and expected to go through human review.

use chrono::Duration;
use ltx_core::{phone_suffix_matches, PaymentRecord, RegistrationRecord};
use serde::{Deserialize, Serialize};

/// Confidence assigned to a certain match. Heuristic scores top out below
/// this even with every criterion contributing.
pub const CERTAIN_CONFIDENCE: u32 = 100;

/// Scoring weights and tolerances. The defaults are the empirical values the
/// production repair scripts converged on; treat them as tuning parameters
/// and validate against labeled data before trusting them elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub email: u32,
    pub amount: u32,
    pub phone: u32,
    pub name: u32,
    pub type_keyword: u32,
    pub quantity: u32,
    pub date_proximity: u32,
    pub accept_threshold: u32,
    pub amount_tolerance: f64,
    pub quantity_tolerance: u32,
    pub date_window_days: i64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            email: 40,
            amount: 30,
            phone: 25,
            name: 20,
            type_keyword: 15,
            quantity: 10,
            date_proximity: 5,
            accept_threshold: 40,
            amount_tolerance: 5.0,
            quantity_tolerance: 2,
            date_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCriterion {
    PaymentIdExact,
    EmailExact,
    AmountWithinTolerance,
    PhoneSuffix,
    NameOverlap,
    TypeKeyword,
    QuantityCorrespondence,
    DateProximity,
}

/// One piece of evidence behind a match, retained for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEvidence {
    pub criterion: MatchCriterion,
    pub weight: u32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub registration_id: String,
    pub confidence: u32,
    pub certain: bool,
    pub evidence: Vec<MatchEvidence>,
}

/// Outcome of matching one payment against a candidate set.
///
/// Ambiguity is a value, not an error: more than one registration carrying
/// the same payment id verbatim is a data-integrity conflict the caller must
/// surface to an operator, never auto-resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    Certain { result: MatchResult },
    AmbiguousCertain { results: Vec<MatchResult> },
    Candidates { results: Vec<MatchResult> },
}

impl MatchOutcome {
    pub fn is_certain(&self) -> bool {
        matches!(self, MatchOutcome::Certain { .. })
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, MatchOutcome::AmbiguousCertain { .. })
    }

    /// All results carried by this outcome, best first.
    pub fn results(&self) -> &[MatchResult] {
        match self {
            MatchOutcome::Certain { result } => std::slice::from_ref(result),
            MatchOutcome::AmbiguousCertain { results } => results,
            MatchOutcome::Candidates { results } => results,
        }
    }
}

/// Match one payment against a candidate set of registrations.
///
/// Exactly one candidate passing the certain-match probe wins outright; two
/// or more yield [`MatchOutcome::AmbiguousCertain`]. Otherwise every
/// candidate is scored heuristically and those at or above the acceptance
/// threshold are returned ranked by confidence. An empty candidate list in
/// the result is the normal representation of "no match".
pub fn match_payment(
    payment: &PaymentRecord,
    candidates: &[RegistrationRecord],
    weights: &MatchWeights,
) -> MatchOutcome {
    let mut certain: Vec<MatchResult> = candidates
        .iter()
        .filter_map(|registration| certain_match(payment, registration))
        .collect();

    match certain.len() {
        0 => {}
        1 => {
            return MatchOutcome::Certain {
                result: certain.remove(0),
            }
        }
        _ => return MatchOutcome::AmbiguousCertain { results: certain },
    }

    let mut results: Vec<MatchResult> = candidates
        .iter()
        .map(|registration| score_candidate(payment, registration, weights))
        .filter(|result| result.confidence >= weights.accept_threshold)
        .collect();
    results.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    MatchOutcome::Candidates { results }
}

/// The authoritative path: strict byte-for-byte equality between any of the
/// payment's identifiers and any probed payment-reference field. No
/// normalization, no fuzziness.
pub fn certain_match(
    payment: &PaymentRecord,
    registration: &RegistrationRecord,
) -> Option<MatchResult> {
    for identifier in payment.identifiers() {
        if let Some(path) = registration.find_payment_reference(&identifier) {
            return Some(MatchResult {
                registration_id: registration.registration_id.clone(),
                confidence: CERTAIN_CONFIDENCE,
                certain: true,
                evidence: vec![MatchEvidence {
                    criterion: MatchCriterion::PaymentIdExact,
                    weight: CERTAIN_CONFIDENCE,
                    detail: format!("payment id {identifier} found verbatim at {path}"),
                }],
            });
        }
    }
    None
}

/// Re-derive a previously stored match. A cached link that no longer passes
/// the verbatim check is void: it may have been written by a looser matching
/// pass in the past and must be treated as absent.
pub fn verify_stored_match(payment: &PaymentRecord, registration: &RegistrationRecord) -> bool {
    certain_match(payment, registration).is_some()
}

fn score_candidate(
    payment: &PaymentRecord,
    registration: &RegistrationRecord,
    weights: &MatchWeights,
) -> MatchResult {
    let mut evidence = Vec::new();
    let mut confidence = 0u32;
    let mut award = |criterion: MatchCriterion, weight: u32, detail: String| {
        confidence += weight;
        evidence.push(MatchEvidence {
            criterion,
            weight,
            detail,
        });
    };

    if let (Some(reg_email), Some(pay_email)) =
        (&registration.contact_email, &payment.customer_email)
    {
        if !reg_email.trim().is_empty()
            && ltx_core::normalized_email(reg_email) == ltx_core::normalized_email(pay_email)
        {
            award(
                MatchCriterion::EmailExact,
                weights.email,
                format!("email {} matches exactly", ltx_core::normalized_email(pay_email)),
            );
        }
    }

    if (registration.total_amount - payment.amount).abs() <= weights.amount_tolerance {
        award(
            MatchCriterion::AmountWithinTolerance,
            weights.amount,
            format!(
                "amount {} vs {} within tolerance {}",
                registration.total_amount, payment.amount, weights.amount_tolerance
            ),
        );
    }

    if let (Some(reg_phone), Some(pay_phone)) =
        (&registration.contact_phone, &payment.customer_phone)
    {
        if phone_suffix_matches(reg_phone, pay_phone) {
            award(
                MatchCriterion::PhoneSuffix,
                weights.phone,
                "phone numbers match after digit normalization".to_string(),
            );
        }
    }

    if let (Some(reg_name), Some(pay_name)) =
        (&registration.contact_name, &payment.customer_name)
    {
        if names_overlap(reg_name, pay_name) {
            award(
                MatchCriterion::NameOverlap,
                weights.name,
                format!("name similarity: {reg_name:?} vs {pay_name:?}"),
            );
        }
    }

    let keyword = registration.registration_type.keyword();
    if payment
        .line_items
        .iter()
        .any(|item| item.name.to_lowercase().contains(keyword))
    {
        award(
            MatchCriterion::TypeKeyword,
            weights.type_keyword,
            format!("line item mentions {keyword:?}"),
        );
    }

    let total_quantity = payment.summed_line_item_quantity();
    if registration.attendee_count > 0
        && total_quantity > 0
        && registration.attendee_count.abs_diff(total_quantity) <= weights.quantity_tolerance
    {
        award(
            MatchCriterion::QuantityCorrespondence,
            weights.quantity,
            format!(
                "attendee count {} vs line item quantity {}",
                registration.attendee_count, total_quantity
            ),
        );
    }

    let age = registration
        .created_at
        .signed_duration_since(payment.created_at);
    if age.abs() <= Duration::days(weights.date_window_days) {
        award(
            MatchCriterion::DateProximity,
            weights.date_proximity,
            format!("records created {} hours apart", age.num_hours().abs()),
        );
    }

    MatchResult {
        registration_id: registration.registration_id.clone(),
        confidence,
        certain: false,
        evidence,
    }
}

/// Intentionally permissive: either full name being a case-insensitive
/// substring of the other tolerates "Jane Doe" vs "Doe, Jane" style
/// inconsistency between provider exports and registrations.
fn names_overlap(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ltx_core::{
        PaymentLineItem, PaymentProvider, RegistrationType,
    };
    use serde_json::json;

    fn payment(payment_id: &str, amount: f64, email: Option<&str>) -> PaymentRecord {
        PaymentRecord {
            payment_id: payment_id.to_string(),
            intent_id: None,
            provider: PaymentProvider::Square,
            amount,
            currency: "AUD".to_string(),
            customer_email: email.map(str::to_string),
            customer_name: None,
            customer_phone: None,
            created_at: Utc.with_ymd_and_hms(2025, 6, 10, 3, 0, 0).single().unwrap(),
            line_items: vec![],
            matched_registration_id: None,
            raw_provider_payload: serde_json::Value::Null,
        }
    }

    fn registration(id: &str, total: f64, email: Option<&str>) -> RegistrationRecord {
        RegistrationRecord {
            registration_id: id.to_string(),
            registration_type: RegistrationType::Individual,
            confirmation_number: None,
            total_amount: total,
            contact_email: email.map(str::to_string),
            contact_name: None,
            contact_phone: None,
            created_at: Utc.with_ymd_and_hms(2025, 6, 11, 3, 0, 0).single().unwrap(),
            attendee_count: 1,
            tickets: vec![],
            document: json!({}),
        }
    }

    #[test]
    fn verbatim_payment_id_is_a_certain_match_at_full_confidence() {
        let pay = payment("sq_abc123", 150.0, Some("jane@x.com"));
        let mut reg = registration("reg-1", 150.0, Some("jane@x.com"));
        reg.document = json!({
            "stripePaymentIntentId": null,
            "squarePaymentId": "sq_abc123"
        });

        let outcome = match_payment(&pay, std::slice::from_ref(&reg), &MatchWeights::default());
        let MatchOutcome::Certain { result } = outcome else {
            panic!("expected certain outcome, got {outcome:?}");
        };
        assert_eq!(result.confidence, CERTAIN_CONFIDENCE);
        assert!(result.certain);
        assert_eq!(result.evidence.len(), 1);
        assert_eq!(result.evidence[0].criterion, MatchCriterion::PaymentIdExact);
        assert!(result.evidence[0].detail.contains("squarePaymentId"));
    }

    #[test]
    fn certain_match_is_strictly_byte_for_byte() {
        let pay = payment("sq_abc123", 150.0, None);
        let mut reg = registration("reg-1", 150.0, None);
        reg.document = json!({ "squarePaymentId": "sq_abc124" });
        assert!(certain_match(&pay, &reg).is_none());

        reg.document = json!({ "squarePaymentId": "SQ_abc123" });
        assert!(certain_match(&pay, &reg).is_none());
    }

    #[test]
    fn email_and_amount_alone_clear_the_acceptance_threshold() {
        let pay = payment("sq_zzz999", 1150.0, Some("contact@lodge.org"));
        let mut reg = registration("reg-lodge", 1150.0, Some("contact@lodge.org"));
        reg.attendee_count = 10;

        let outcome = match_payment(&pay, std::slice::from_ref(&reg), &MatchWeights::default());
        let MatchOutcome::Candidates { results } = outcome else {
            panic!("expected heuristic candidates");
        };
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(!result.certain);
        assert!(result.confidence >= 40);
        // Email (40) + amount (30) + date proximity (5).
        assert_eq!(result.confidence, 75);
        assert_eq!(result.evidence[0].criterion, MatchCriterion::EmailExact);
    }

    #[test]
    fn sub_threshold_candidates_are_omitted_entirely() {
        // Amount (30) + date proximity (5) stays below the 40-point floor.
        let pay = payment("sq_low", 200.0, None);
        let reg = registration("reg-low", 202.0, None);

        let outcome = match_payment(&pay, std::slice::from_ref(&reg), &MatchWeights::default());
        assert_eq!(
            outcome,
            MatchOutcome::Candidates { results: vec![] },
            "no-match must be an empty list, not an error"
        );
    }

    #[test]
    fn duplicate_payment_reference_across_registrations_is_ambiguous() {
        let pay = payment("sq_dup001", 95.0, None);
        let mut reg_a = registration("reg-a", 95.0, None);
        reg_a.document = json!({ "squarePaymentId": "sq_dup001" });
        let mut reg_b = registration("reg-b", 95.0, None);
        reg_b.document = json!({ "registrationData": { "square_payment_id": "sq_dup001" } });

        let outcome = match_payment(&pay, &[reg_a, reg_b], &MatchWeights::default());
        let MatchOutcome::AmbiguousCertain { results } = outcome else {
            panic!("duplicate reference must surface as ambiguous, not pick a winner");
        };
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.certain));
    }

    #[test]
    fn all_heuristic_criteria_accumulate_with_evidence() {
        let mut pay = payment("sq_full", 1000.0, Some("Sec@Lodge.org"));
        pay.customer_name = Some("Jane Doe".to_string());
        pay.customer_phone = Some("+61 412 345 678".to_string());
        pay.line_items = vec![PaymentLineItem {
            name: "Lodge Package".to_string(),
            quantity: 9,
        }];

        let mut reg = registration("reg-full", 1003.5, Some("sec@lodge.org"));
        reg.registration_type = RegistrationType::Lodge;
        reg.contact_name = Some("Doe, Jane Doe".to_string());
        reg.contact_phone = Some("0412 345 678".to_string());
        reg.attendee_count = 10;

        let weights = MatchWeights::default();
        let outcome = match_payment(&pay, std::slice::from_ref(&reg), &weights);
        let result = &outcome.results()[0];
        // 40 + 30 + 25 + 20 + 15 + 10 + 5.
        assert_eq!(result.confidence, 145);
        assert_eq!(result.evidence.len(), 7);
    }

    #[test]
    fn missing_optional_fields_contribute_nothing_and_never_panic() {
        let pay = payment("sq_sparse", 80.0, None);
        let mut reg = registration("reg-sparse", 80.0, None);
        reg.attendee_count = 0;

        let outcome = match_payment(&pay, std::slice::from_ref(&reg), &MatchWeights::default());
        // Amount + date proximity only; below threshold.
        assert!(outcome.results().is_empty());
    }

    #[test]
    fn candidates_are_ranked_by_confidence() {
        let mut pay = payment("sq_rank", 500.0, Some("org@x.com"));
        pay.customer_phone = Some("0412345678".to_string());

        let strong = {
            let mut r = registration("reg-strong", 500.0, Some("org@x.com"));
            r.contact_phone = Some("0412345678".to_string());
            r
        };
        let weak = registration("reg-weak", 500.0, Some("org@x.com"));

        let outcome = match_payment(&pay, &[weak, strong], &MatchWeights::default());
        let results = outcome.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].registration_id, "reg-strong");
        assert!(results[0].confidence > results[1].confidence);
    }

    #[test]
    fn stored_match_that_cannot_be_rederived_is_void() {
        let mut pay = payment("sq_cache", 10.0, None);
        pay.matched_registration_id = Some("reg-cached".to_string());
        let mut reg = registration("reg-cached", 10.0, None);
        reg.document = json!({ "squarePaymentId": "sq_other" });
        assert!(!verify_stored_match(&pay, &reg));

        reg.document = json!({ "squarePaymentId": "sq_cache" });
        assert!(verify_stored_match(&pay, &reg));
    }

    #[test]
    fn weights_deserialize_with_partial_overrides() {
        let weights: MatchWeights =
            serde_yaml::from_str("email: 50\naccept_threshold: 55\n").unwrap();
        assert_eq!(weights.email, 50);
        assert_eq!(weights.accept_threshold, 55);
        assert_eq!(weights.amount, 30);
        assert_eq!(weights.date_window_days, 7);
    }

    #[test]
    fn matcher_does_not_mutate_inputs() {
        let pay = payment("sq_pure", 60.0, Some("a@b.c"));
        let reg = registration("reg-pure", 60.0, Some("a@b.c"));
        let before = reg.clone();
        let _ = match_payment(&pay, std::slice::from_ref(&reg), &MatchWeights::default());
        assert_eq!(reg, before);
    }
}
