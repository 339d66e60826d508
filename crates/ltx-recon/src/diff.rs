//! Field-level differential sync.
//!
//! Computes the minimal partial update that brings a persisted destination
//! document up to date with a freshly fetched source document, without ever
//! touching destination-only fields. Applying the delta and diffing again
//! yields an empty delta.

use chrono::{DateTime, FixedOffset};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Keys owned by the destination store, never by the source: internal id,
/// store-managed timestamps, and import bookkeeping.
pub const DEFAULT_METADATA_KEYS: &[&str] = &[
    "_id",
    "createdAt",
    "updatedAt",
    "_import",
    "_shouldMoveToProduction",
];

/// Compute the set of top-level fields whose source value differs materially
/// from the destination value.
///
/// Rules, per key of `source` (destination-only keys are never visited):
/// - metadata keys are skipped outright;
/// - both sides null or absent is a no-op;
/// - two date-like strings compare by resolved instant, so differing
///   serializations of the same timestamp do not produce spurious writes;
/// - composite values (objects, arrays) compare by deep structural equality,
///   and any nested difference replaces the whole value at that key;
/// - everything else compares by plain value equality.
pub fn diff_fields(
    source: &JsonMap<String, JsonValue>,
    destination: &JsonMap<String, JsonValue>,
    metadata_keys: &[&str],
) -> JsonMap<String, JsonValue> {
    let mut delta = JsonMap::new();

    for (key, source_value) in source {
        if metadata_keys.contains(&key.as_str()) {
            continue;
        }

        let destination_value = destination.get(key);
        if is_nullish(Some(source_value)) && is_nullish(destination_value) {
            continue;
        }

        if values_differ(source_value, destination_value) {
            delta.insert(key.clone(), source_value.clone());
        }
    }

    delta
}

fn values_differ(source: &JsonValue, destination: Option<&JsonValue>) -> bool {
    let source_instant = as_instant(source);
    let destination_instant = destination.and_then(as_instant);
    if source_instant.is_some() || destination_instant.is_some() {
        // One side being date-like and the other not counts as a change.
        return source_instant != destination_instant;
    }

    // serde_json structural equality covers both composites and scalars;
    // a missing destination key always differs from a non-null source value.
    match destination {
        Some(existing) => source != existing,
        None => true,
    }
}

fn is_nullish(value: Option<&JsonValue>) -> bool {
    matches!(value, None | Some(JsonValue::Null))
}

fn as_instant(value: &JsonValue) -> Option<DateTime<FixedOffset>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}
