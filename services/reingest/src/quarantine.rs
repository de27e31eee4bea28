//! Quarantine of records that must not be retried again.
//!
//! Unparseable lines are kept verbatim; records over the reingest ceiling are
//! kept as structured JSON with their counter as it was read. Records that
//! were routed forward but never delivered are kept with their counter
//! already incremented, exactly as they would have been sent.
//!
//! The whole collection is written once per run as a JSON array next to the
//! original object, under a configured key prefix.

use crate::error::{ReingestError, StorageError};
use crate::storage::ObjectStore;
use crate::unpack::EventRecord;
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, instrument, warn};

const CONTENT_TYPE_JSON: &str = "application/json";

/// One quarantined value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QuarantineEntry {
    /// Text that could not be unpacked, stored as a JSON string
    Raw(String),
    /// A record that is no longer eligible for reingestion
    Record(EventRecord),
}

/// Everything quarantined during one run
#[derive(Debug, Default)]
pub struct QuarantineCollection {
    entries: Vec<QuarantineEntry>,
    raw_lines: usize,
}

impl QuarantineCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quarantine text verbatim
    pub fn push_raw(&mut self, line: impl Into<String>) {
        self.raw_lines += 1;
        self.entries.push(QuarantineEntry::Raw(line.into()));
    }

    /// Quarantine a structured record
    pub fn push_record(&mut self, record: EventRecord) {
        self.entries.push(QuarantineEntry::Record(record));
    }

    pub fn extend_records(&mut self, records: impl IntoIterator<Item = EventRecord>) {
        for record in records {
            self.push_record(record);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of raw text entries
    pub fn raw_lines(&self) -> usize {
        self.raw_lines
    }

    /// Number of structured record entries
    pub fn records(&self) -> usize {
        self.entries.len() - self.raw_lines
    }

    pub fn entries(&self) -> &[QuarantineEntry] {
        &self.entries
    }

    /// Serialize the collection as one JSON array
    pub fn to_json(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(&self.entries).map(Bytes::from)
    }

    /// Write the collection to `<prefix><key>` in `bucket`, if non-empty.
    ///
    /// Returns the key written, or `None` when there was nothing to write.
    #[instrument(skip(self, store), fields(entries = self.entries.len()))]
    pub async fn dump(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        prefix: &str,
        key: &str,
    ) -> Result<Option<String>, ReingestError> {
        if self.is_empty() {
            return Ok(None);
        }

        let quarantine_key = quarantine_key(prefix, key);
        warn!(
            entries = self.entries.len(),
            raw_lines = self.raw_lines,
            prefix,
            "Records exceeded max reingestion attempts or could not be delivered, dumping to quarantine"
        );

        let body = self.to_json()?;
        store
            .put_object(bucket, &quarantine_key, body, CONTENT_TYPE_JSON)
            .await
            .map_err(|source: StorageError| ReingestError::QuarantineDump {
                key: quarantine_key.clone(),
                source,
            })?;

        metrics::counter!("reingest.records.quarantined").increment(self.records() as u64);
        metrics::counter!("reingest.lines.quarantined").increment(self.raw_lines as u64);
        info!(bucket, key = %quarantine_key, "Uploaded quarantined records");

        Ok(Some(quarantine_key))
    }
}

/// Key of the quarantine object for an archive object key
pub fn quarantine_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}
