//! Provider export adapters + registration snapshot loading.
//!
//! Exports are local JSON files as pulled from the provider dashboards; each
//! adapter normalizes one provider's payment shape into a [`PaymentRecord`].
//! The registration snapshot loader maps the loosely-shaped stored documents
//! onto [`RegistrationRecord`], keeping the full raw document so the matcher
//! can probe payment-reference fields wherever past pipelines put them.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use ltx_core::{
    lookup_path, lookup_str, PaymentLineItem, PaymentProvider, PaymentRecord,
    RegistrationRecord, RegistrationType, TicketLineItem, TicketOwnerType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "ltx-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// One export file: provider, capture time, and the raw payment entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentExportFile {
    pub export_id: String,
    pub provider: PaymentProvider,
    pub exported_at: DateTime<Utc>,
    pub payments: Vec<JsonValue>,
}

pub trait PaymentExportAdapter: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Normalize one raw export entry. Malformed entries error individually
    /// so the batch can log them with context and continue.
    fn parse_payment(&self, entry: &JsonValue) -> Result<PaymentRecord, IngestError>;
}

#[derive(Debug, Clone, Copy)]
struct SquareExportAdapter;

#[derive(Debug, Clone, Copy)]
struct StripeExportAdapter;

pub fn square_export_adapter() -> impl PaymentExportAdapter {
    SquareExportAdapter
}

pub fn stripe_export_adapter() -> impl PaymentExportAdapter {
    StripeExportAdapter
}

pub fn adapter_for_provider(provider: PaymentProvider) -> Box<dyn PaymentExportAdapter> {
    match provider {
        PaymentProvider::Square => Box::new(SquareExportAdapter),
        PaymentProvider::Stripe => Box::new(StripeExportAdapter),
    }
}

pub fn load_payment_export(path: impl AsRef<Path>) -> Result<PaymentExportFile> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

impl PaymentExportAdapter for SquareExportAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Square
    }

    fn parse_payment(&self, entry: &JsonValue) -> Result<PaymentRecord, IngestError> {
        let payment_id = lookup_str(entry, "id")
            .or_else(|| lookup_str(entry, "payment_id"))
            .ok_or_else(|| IngestError::Message("square payment entry missing id".to_string()))?
            .to_string();

        let created_at = first_datetime(entry, &["created_at", "updated_at"]).ok_or_else(|| {
            IngestError::Message(format!("square payment {payment_id} missing created_at"))
        })?;

        // Square money amounts are integer minor units.
        let amount = first_number(entry, &["amount_money.amount", "order.total_money.amount"])
            .map(|cents| cents / 100.0)
            .unwrap_or(0.0);
        let currency = lookup_str(entry, "amount_money.currency")
            .or_else(|| lookup_str(entry, "order.total_money.currency"))
            .unwrap_or_default()
            .to_string();

        let customer_name = full_name(
            lookup_str(entry, "customer.given_name"),
            lookup_str(entry, "customer.family_name"),
        );

        let line_items = entry
            .pointer("/order/line_items")
            .and_then(JsonValue::as_array)
            .map(|items| items.iter().map(parse_line_item).collect())
            .unwrap_or_default();

        Ok(PaymentRecord {
            payment_id,
            intent_id: None,
            provider: PaymentProvider::Square,
            amount,
            currency,
            customer_email: first_string(entry, &["buyer_email_address", "customer.email_address"]),
            customer_name,
            customer_phone: first_string(entry, &["customer.phone_number"]),
            created_at,
            line_items,
            matched_registration_id: first_string(
                entry,
                &["matchedRegistrationId", "matched_registration_id"],
            ),
            raw_provider_payload: entry.clone(),
        })
    }
}

impl PaymentExportAdapter for StripeExportAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn parse_payment(&self, entry: &JsonValue) -> Result<PaymentRecord, IngestError> {
        let payment_id = lookup_str(entry, "id")
            .or_else(|| lookup_str(entry, "payment_intent"))
            .or_else(|| lookup_str(entry, "PaymentIntent ID"))
            .ok_or_else(|| IngestError::Message("stripe payment entry missing id".to_string()))?
            .to_string();

        let intent_id = lookup_str(entry, "payment_intent")
            .filter(|intent| *intent != payment_id)
            .map(str::to_string);

        let created_at = entry
            .get("created")
            .and_then(JsonValue::as_i64)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| first_datetime(entry, &["created_at", "Created (UTC)"]))
            .ok_or_else(|| {
                IngestError::Message(format!("stripe payment {payment_id} missing created"))
            })?;

        // API exports carry integer minor units under `amount`; dashboard CSV
        // conversions carry decimal dollars under `Amount`.
        let amount = first_number(entry, &["amount"])
            .map(|cents| cents / 100.0)
            .or_else(|| first_number(entry, &["Amount"]))
            .unwrap_or(0.0);

        let line_items = entry
            .get("line_items")
            .and_then(JsonValue::as_array)
            .map(|items| items.iter().map(parse_line_item).collect())
            .unwrap_or_default();

        Ok(PaymentRecord {
            payment_id,
            intent_id,
            provider: PaymentProvider::Stripe,
            amount,
            currency: lookup_str(entry, "currency")
                .map(str::to_uppercase)
                .unwrap_or_default(),
            customer_email: first_string(
                entry,
                &[
                    "receipt_email",
                    "billing_details.email",
                    "customer_email",
                    "Customer Email",
                ],
            ),
            customer_name: first_string(entry, &["billing_details.name", "Card Name"]),
            customer_phone: first_string(entry, &["billing_details.phone"]),
            created_at,
            line_items,
            matched_registration_id: first_string(
                entry,
                &["matchedRegistrationId", "matched_registration_id"],
            ),
            raw_provider_payload: entry.clone(),
        })
    }
}

fn parse_line_item(item: &JsonValue) -> PaymentLineItem {
    let quantity = match item.get("quantity") {
        // Square serializes quantities as strings.
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(1),
        Some(other) => other.as_u64().unwrap_or(1) as u32,
        None => 1,
    };
    PaymentLineItem {
        name: lookup_str(item, "name").unwrap_or("Unknown").to_string(),
        quantity,
    }
}

/// Registration snapshot: successfully mapped records plus per-document
/// reasons for anything skipped, so the batch can report them.
#[derive(Debug, Clone)]
pub struct RegistrationSnapshot {
    pub records: Vec<RegistrationRecord>,
    pub skipped: Vec<String>,
}

pub fn load_registration_snapshot(path: impl AsRef<Path>) -> Result<RegistrationSnapshot> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let docs: Vec<JsonValue> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

    let mut records = Vec::with_capacity(docs.len());
    let mut skipped = Vec::new();
    for (index, doc) in docs.iter().enumerate() {
        match map_registration(doc) {
            Ok(record) => records.push(record),
            Err(err) => skipped.push(format!("document {index}: {err}")),
        }
    }
    Ok(RegistrationSnapshot { records, skipped })
}

/// Map one stored registration document onto the typed record. The fallback
/// chains mirror the spellings left behind by successive import pipelines;
/// the full document is preserved for payment-reference probing.
pub fn map_registration(doc: &JsonValue) -> Result<RegistrationRecord, IngestError> {
    let registration_id = first_string(doc, &["registrationId", "registration_id", "_id"])
        .ok_or_else(|| {
            IngestError::Message("registration document missing registrationId".to_string())
        })?;

    let created_at = first_datetime(doc, &["createdAt", "created_at"]).ok_or_else(|| {
        IngestError::Message(format!("registration {registration_id} missing createdAt"))
    })?;

    let registration_type = first_string(doc, &["registrationType", "registration_type"])
        .map(|t| {
            let lower = t.to_lowercase();
            if lower.contains("lodge") {
                RegistrationType::Lodge
            } else if lower.contains("delegation") {
                RegistrationType::Delegation
            } else {
                RegistrationType::Individual
            }
        })
        .unwrap_or(RegistrationType::Individual);

    let total_amount = first_number(
        doc,
        &[
            "totalAmount",
            "totalAmountPaid",
            "total_amount",
            "total_amount_paid",
        ],
    )
    .unwrap_or(0.0);

    let contact_email = first_string(
        doc,
        &[
            "contactEmail",
            "customerEmail",
            "email",
            "registrationData.bookingContact.emailAddress",
            "registrationData.bookingContact.email",
        ],
    );
    let contact_name = first_string(doc, &["contactName"]).or_else(|| {
        full_name(lookup_str(doc, "firstName"), lookup_str(doc, "lastName")).or_else(|| {
            full_name(
                lookup_str(doc, "registrationData.bookingContact.firstName"),
                lookup_str(doc, "registrationData.bookingContact.lastName"),
            )
        })
    });
    let contact_phone = first_string(
        doc,
        &[
            "contactPhone",
            "phone",
            "registrationData.bookingContact.mobileNumber",
            "registrationData.bookingContact.phone",
        ],
    );

    let attendee_count = first_number(doc, &["attendeeCount", "attendee_count"])
        .map(|n| n.max(0.0) as u32)
        .unwrap_or(0);

    let tickets = lookup_path(doc, "registrationData.tickets")
        .or_else(|| doc.get("tickets"))
        .and_then(JsonValue::as_array)
        .map(|items| items.iter().map(map_ticket).collect())
        .unwrap_or_default();

    Ok(RegistrationRecord {
        registration_id,
        registration_type,
        confirmation_number: first_string(doc, &["confirmationNumber", "confirmation_number"]),
        total_amount,
        contact_email,
        contact_name,
        contact_phone,
        created_at,
        attendee_count,
        tickets,
        document: doc.clone(),
    })
}

fn map_ticket(item: &JsonValue) -> TicketLineItem {
    let owner_type = first_string(item, &["ownerType", "owner_type"]).and_then(|t| {
        match t.to_lowercase().as_str() {
            "attendee" => Some(TicketOwnerType::Attendee),
            "lodge" => Some(TicketOwnerType::Lodge),
            _ => None,
        }
    });
    TicketLineItem {
        name: first_string(item, &["name", "eventTicketName", "ticketName"])
            .unwrap_or_else(|| "Unknown".to_string()),
        owner_type,
        owner_id: first_string(item, &["ownerId", "owner_id", "attendeeId", "attendee_id"]),
    }
}

fn first_string(doc: &JsonValue, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup_str(doc, path))
        .map(str::to_string)
}

fn first_number(doc: &JsonValue, paths: &[&str]) -> Option<f64> {
    paths.iter().find_map(|path| {
        let value = lookup_path(doc, path)?;
        match value {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            // Decimal128 survives JSON export as {"$numberDecimal": "..."}.
            JsonValue::Object(_) => lookup_str(value, "$numberDecimal")?.parse().ok(),
            _ => None,
        }
    })
}

fn first_datetime(doc: &JsonValue, paths: &[&str]) -> Option<DateTime<Utc>> {
    paths.iter().find_map(|path| {
        let value = lookup_path(doc, path)?;
        let text = value
            .as_str()
            .or_else(|| lookup_str(value, "$date"))?;
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let combined = format!(
        "{} {}",
        first.unwrap_or_default().trim(),
        last.unwrap_or_default().trim()
    );
    let combined = combined.trim().to_string();
    if combined.is_empty() {
        None
    } else {
        Some(combined)
    }
}
