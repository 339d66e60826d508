//! Dotted-path lookup over raw stored documents, plus the documented probe
//! lists and the small normalization helpers shared by matcher and ingest.

use serde_json::Value as JsonValue;

/// Every known location a provider payment id may have been stored in a
/// registration document. The camelCase/snake_case duplication is real: the
/// data has passed through several import pipelines with inconsistent naming,
/// so the list is kept explicit and finite rather than rebuilt ad hoc per
/// script.
pub const PAYMENT_REFERENCE_PATHS: &[&str] = &[
    "stripePaymentIntentId",
    "squarePaymentId",
    "stripe_payment_intent_id",
    "square_payment_id",
    "registrationData.stripePaymentIntentId",
    "registrationData.squarePaymentId",
    "registrationData.stripe_payment_intent_id",
    "registrationData.square_payment_id",
    "paymentInfo.stripe_payment_intent_id",
    "paymentInfo.square_payment_id",
    "paymentData.paymentId",
    "paymentData.transactionId",
];

/// Alternately-named id fields probed inside a payment's raw provider
/// payload. Providers are inconsistent about naming; a Stripe CSV export
/// even uses `PaymentIntent ID` with a space.
pub const RAW_PAYLOAD_ID_KEYS: &[&str] = &[
    "paymentId",
    "payment_id",
    "transactionId",
    "transaction_id",
    "PaymentIntent ID",
    "metadata.paymentId",
];

/// Number of trailing digits compared when matching phone numbers across
/// country-code and formatting differences.
pub const PHONE_SUFFIX_LEN: usize = 8;

/// Resolve a dotted path (`"registrationData.square_payment_id"`) against a
/// JSON document. Path segments never contain dots themselves, so a plain
/// split is sufficient.
pub fn lookup_path<'a>(doc: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Like [`lookup_path`] but only for non-empty string values.
pub fn lookup_str<'a>(doc: &'a JsonValue, path: &str) -> Option<&'a str> {
    lookup_path(doc, path)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.trim().is_empty())
}

pub fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Phone equality across formatting differences: strip everything but
/// digits, then accept either full equality or matching last-8 suffixes
/// when both numbers are long enough for the suffix to be meaningful.
pub fn phone_suffix_matches(a: &str, b: &str) -> bool {
    let a = digits_only(a);
    let b = digits_only(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    if a.len() <= 6 || b.len() <= 6 {
        return false;
    }
    let suffix = |s: &str| {
        let start = s.len().saturating_sub(PHONE_SUFFIX_LEN);
        s[start..].to_string()
    };
    suffix(&a) == suffix(&b)
}

pub fn normalized_email(input: &str) -> String {
    input.trim().to_lowercase()
}
