//! Core domain records for the LodgeTix reconciliation toolkit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod paths;

pub use paths::{
    digits_only, lookup_path, lookup_str, normalized_email, phone_suffix_matches,
    PAYMENT_REFERENCE_PATHS, PHONE_SUFFIX_LEN, RAW_PAYLOAD_ID_KEYS,
};

pub const CRATE_NAME: &str = "ltx-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Square,
    Stripe,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Square => "square",
            PaymentProvider::Stripe => "stripe",
        }
    }
}

/// One line item on a captured payment, as exported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLineItem {
    pub name: String,
    pub quantity: u32,
}

/// Flattened representation of a captured payment from any provider.
///
/// `raw_provider_payload` is preserved verbatim for audit; the matcher only
/// probes it for alternately-named payment identifiers, never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub intent_id: Option<String>,
    pub provider: PaymentProvider,
    pub amount: f64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub line_items: Vec<PaymentLineItem>,
    /// A previously persisted match, if any. Never trusted as-is: the batch
    /// re-derives it through the verbatim certain-match check and voids it
    /// when the check fails.
    pub matched_registration_id: Option<String>,
    pub raw_provider_payload: JsonValue,
}

impl PaymentRecord {
    /// Every identifier this payment carries that could have been stored in a
    /// registration's payment-reference fields: the primary id, the intent
    /// id, and any alternately-named id fields in the raw provider payload.
    /// Order-preserving, deduplicated, blanks dropped.
    pub fn identifiers(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |candidate: &str| {
            let trimmed = candidate.trim();
            if !trimmed.is_empty() && !out.iter().any(|v| v == trimmed) {
                out.push(trimmed.to_string());
            }
        };

        push(&self.payment_id);
        if let Some(intent) = &self.intent_id {
            push(intent);
        }
        for key in RAW_PAYLOAD_ID_KEYS {
            if let Some(value) = lookup_str(&self.raw_provider_payload, key) {
                push(value);
            }
        }
        out
    }

    pub fn summed_line_item_quantity(&self) -> u32 {
        self.line_items.iter().map(|item| item.quantity).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationType {
    Individual,
    Lodge,
    Delegation,
}

impl RegistrationType {
    /// Keyword correlated against payment line-item names by the heuristic
    /// scorer ("Lodge Package x10" vs a lodge registration).
    pub fn keyword(&self) -> &'static str {
        match self {
            RegistrationType::Individual => "individual",
            RegistrationType::Lodge => "lodge",
            RegistrationType::Delegation => "delegation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketOwnerType {
    Attendee,
    Lodge,
}

/// A ticket inside a registration. Owner references are deliberately optional
/// here: absent or self-referential owners are data-integrity defects that
/// the integrity checks report rather than shapes the loader rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketLineItem {
    pub name: String,
    pub owner_type: Option<TicketOwnerType>,
    pub owner_id: Option<String>,
}

/// One purchase transaction (individual or lodge/group).
///
/// Typed fields feed the heuristic scorer; `document` keeps the full stored
/// document so the certain-match probe can reach payment-reference fields
/// wherever past import pipelines put them (see
/// [`paths::PAYMENT_REFERENCE_PATHS`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub registration_id: String,
    pub registration_type: RegistrationType,
    pub confirmation_number: Option<String>,
    pub total_amount: f64,
    pub contact_email: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attendee_count: u32,
    pub tickets: Vec<TicketLineItem>,
    pub document: JsonValue,
}

impl RegistrationRecord {
    /// Probe the stored document for a verbatim occurrence of `identifier` at
    /// any known payment-reference path. Returns the first matching path.
    /// Strict byte equality: a payment id is either the same transaction or
    /// it is not.
    pub fn find_payment_reference(&self, identifier: &str) -> Option<&'static str> {
        PAYMENT_REFERENCE_PATHS
            .iter()
            .copied()
            .find(|path| lookup_str(&self.document, path) == Some(identifier))
    }
}
