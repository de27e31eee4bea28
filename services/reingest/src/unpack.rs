//! Unpacking of Firehose backup objects into individual event records.
//!
//! A backup object is newline-delimited JSON. Each line is an envelope whose
//! `rawData` field holds a base64-encoded batch, which is itself
//! newline-delimited JSON event records.

use crate::error::UnpackError;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// A single event record: one JSON object from an inner batch.
pub type EventRecord = Map<String, Value>;

/// One line of a backup object, as written by Firehose on delivery failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OuterRecord {
    /// Decoded inner batch
    #[serde(with = "base64_serde")]
    pub raw_data: Vec<u8>,
    /// Delivery error code reported by Firehose
    #[serde(default)]
    pub error_code: Option<String>,
    /// Delivery error message reported by Firehose
    #[serde(default)]
    pub error_message: Option<String>,
    /// Delivery attempts Firehose made before backing up
    #[serde(default)]
    pub attempts_made: Option<u64>,
}

/// Base64 serialization helper
mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.trim()).map_err(serde::de::Error::custom)
    }
}

impl OuterRecord {
    /// Parse one line of a backup object
    pub fn parse(line: &str) -> Result<Self, UnpackError> {
        serde_json::from_str(line).map_err(UnpackError::OuterJson)
    }

    /// Split the inner batch into event records.
    ///
    /// A single malformed record fails the whole batch.
    pub fn events(&self) -> Result<Vec<EventRecord>, UnpackError> {
        let text = String::from_utf8_lossy(&self.raw_data);

        text.trim()
            .split('\n')
            .map(|candidate| match serde_json::from_str(candidate) {
                Ok(Value::Object(record)) => Ok(record),
                Ok(_) => Err(UnpackError::NotAnObject),
                Err(e) => {
                    debug!(line = candidate, "Failed to parse event record as JSON");
                    Err(UnpackError::InnerJson(e))
                }
            })
            .collect()
    }
}

/// A non-empty line of a backup object and the records it unpacked to.
#[derive(Debug)]
pub struct OuterLine<'a> {
    /// Line exactly as stored
    pub raw: &'a str,
    /// Unpacked event records, or why the line could not be unpacked
    pub events: Result<Vec<EventRecord>, UnpackError>,
}

/// Unpack decompressed backup text line by line. Empty lines are skipped.
pub fn unpack(text: &str) -> impl Iterator<Item = OuterLine<'_>> {
    text.split('\n')
        .filter(|line| !line.is_empty())
        .map(|raw| OuterLine {
            raw,
            events: unpack_line(raw),
        })
}

/// Unpack a single line into its event records
pub fn unpack_line(line: &str) -> Result<Vec<EventRecord>, UnpackError> {
    let outer = OuterRecord::parse(line)?;

    if outer.error_code.is_some() || outer.attempts_made.is_some() {
        debug!(
            error_code = outer.error_code.as_deref().unwrap_or_default(),
            error_message = outer.error_message.as_deref().unwrap_or_default(),
            attempts_made = outer.attempts_made.unwrap_or_default(),
            "Unpacking backed-up batch"
        );
    }

    outer.events()
}
