//! Reingestion counting and routing of event records.
//!
//! Every event record carries a counter under `fields.<reingest_field>`. A
//! record whose next count stays within the ceiling is stamped with that
//! count and forwarded; otherwise it is quarantined exactly as it arrived.

use crate::error::RecordError;
use crate::unpack::EventRecord;
use serde_json::{Map, Value};
use tracing::trace;

const FIELDS_KEY: &str = "fields";

/// Where an event record goes next
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Send back to the delivery stream, counter already incremented
    Forward(EventRecord),
    /// Park in quarantine, counter left untouched
    Quarantine(EventRecord),
}

/// Decides whether event records get another delivery attempt
#[derive(Debug, Clone)]
pub struct Router {
    ceiling: u64,
    counter_field: String,
}

impl Router {
    /// Create a router allowing at most `ceiling` reingestion attempts
    pub fn new(ceiling: u64, counter_field: impl Into<String>) -> Self {
        Self {
            ceiling,
            counter_field: counter_field.into(),
        }
    }

    /// Classify a record, incrementing its counter on the forward path only.
    /// A missing `fields` object is created on both paths.
    pub fn classify(&self, mut record: EventRecord) -> Result<Route, RecordError> {
        let count = reingest_count(&record, &self.counter_field)?;
        let fields = ensure_fields(&mut record)?;

        // A saturated counter is past any ceiling
        let next = match count.checked_add(1) {
            Some(next) if next <= self.ceiling => next,
            _ => {
                trace!(count, ceiling = self.ceiling, "Record exceeded reingest ceiling");
                return Ok(Route::Quarantine(record));
            }
        };

        fields.insert(self.counter_field.clone(), Value::from(next));
        Ok(Route::Forward(record))
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn counter_field(&self) -> &str {
        &self.counter_field
    }
}

/// Current reingestion count of a record, zero when never reingested
pub fn reingest_count(record: &EventRecord, counter_field: &str) -> Result<u64, RecordError> {
    let fields = match record.get(FIELDS_KEY) {
        None => return Ok(0),
        Some(Value::Object(fields)) => fields,
        Some(_) => return Err(RecordError::FieldsNotObject),
    };

    match fields.get(counter_field) {
        None => Ok(0),
        Some(value) => value.as_u64().ok_or_else(|| RecordError::InvalidCounter {
            field: counter_field.to_string(),
            value: value.to_string(),
        }),
    }
}

/// The record's `fields` object, created empty if absent
pub fn ensure_fields(record: &mut EventRecord) -> Result<&mut Map<String, Value>, RecordError> {
    record
        .entry(FIELDS_KEY)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or(RecordError::FieldsNotObject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> EventRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn test_first_attempt_creates_fields() {
        let router = Router::new(3, "count");

        let route = router.classify(record(json!({"event": "x"}))).unwrap();
        assert_eq!(
            route,
            Route::Forward(record(json!({"event": "x", "fields": {"count": 1}})))
        );
    }

    #[test]
    fn test_existing_fields_preserved() {
        let router = Router::new(3, "count");

        let route = router
            .classify(record(json!({"event": "x", "fields": {"host": "a", "count": 1}})))
            .unwrap();
        assert_eq!(
            route,
            Route::Forward(record(json!({"event": "x", "fields": {"host": "a", "count": 2}})))
        );
    }

    #[test]
    fn test_below_ceiling_is_forwarded_with_increment() {
        let router = Router::new(3, "count");

        for c in 0..3u64 {
            let route = router
                .classify(record(json!({"fields": {"count": c}})))
                .unwrap();
            match route {
                Route::Forward(r) => assert_eq!(r["fields"]["count"], c + 1),
                Route::Quarantine(_) => panic!("count {c} should be forwarded"),
            }
        }
    }

    #[test]
    fn test_at_ceiling_is_quarantined_unchanged() {
        let router = Router::new(3, "count");
        let original = record(json!({"event": "x", "fields": {"count": 3}}));

        let route = router.classify(original.clone()).unwrap();
        assert_eq!(route, Route::Quarantine(original));
    }

    #[test]
    fn test_zero_ceiling_quarantines_with_empty_fields() {
        let router = Router::new(0, "count");

        let route = router.classify(record(json!({"event": "x"}))).unwrap();
        assert_eq!(route, Route::Quarantine(record(json!({"event": "x", "fields": {}}))));
    }

    #[test]
    fn test_saturated_counter_is_quarantined() {
        let original = record(json!({"fields": {"count": u64::MAX}}));

        for ceiling in [3, u64::MAX] {
            let route = Router::new(ceiling, "count").classify(original.clone()).unwrap();
            assert_eq!(route, Route::Quarantine(original.clone()));
        }
    }

    #[test]
    fn test_invalid_fields_and_counters() {
        let router = Router::new(3, "count");

        assert_eq!(
            router.classify(record(json!({"fields": "oops"}))),
            Err(RecordError::FieldsNotObject)
        );
        assert!(matches!(
            router.classify(record(json!({"fields": {"count": "two"}}))),
            Err(RecordError::InvalidCounter { .. })
        ));
        assert!(matches!(
            router.classify(record(json!({"fields": {"count": -1}}))),
            Err(RecordError::InvalidCounter { .. })
        ));
    }

    #[test]
    fn test_reingest_count_defaults_to_zero() {
        assert_eq!(reingest_count(&record(json!({})), "count"), Ok(0));
        assert_eq!(reingest_count(&record(json!({"fields": {}})), "count"), Ok(0));
        assert_eq!(reingest_count(&record(json!({"fields": {"count": 7}})), "count"), Ok(7));
    }
}
