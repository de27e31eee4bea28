//! In-memory collaborators and fixtures for exercising whole runs.

use crate::error::{SinkError, StorageError};
use crate::firehose::DeliverySink;
use crate::retry::RetryPolicy;
use crate::storage::ObjectStore;
use async_trait::async_trait;
use aws_lambda_events::event::s3::S3Event;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A retry policy that never waits long
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(1),
    }
}

/// A backup line wrapping `inner` as base64 `rawData`
pub fn outer_line(inner: &str) -> String {
    json!({
        "rawData": STANDARD.encode(inner),
        "errorCode": "Splunk.ProxyWithoutStickySessions",
        "errorMessage": "If you have a proxy between Firehose and HEC, enable sticky sessions",
        "attemptsMade": 0,
        "arrivalTimestamp": 1705312800000u64,
        "attemptEndingTimestamp": 1705313100000u64,
        "EventId": "49546986683135544286507457936321625675700192471156785154.0"
    })
    .to_string()
}

/// `n` newline-separated event records. With a `count`, each carries
/// `fields.count`; without one, records have no `fields` at all.
pub fn record_lines(n: usize, count: Option<u64>) -> String {
    (0..n)
        .map(|i| {
            let mut record = json!({
                "event": format!("event-{i}"),
                "sourcetype": "app:log"
            });
            if let Some(count) = count {
                record["fields"] = json!({"host": "web-1", "count": count});
            }
            record.to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// An S3 put notification for each `(bucket, key)`
pub fn s3_event(objects: &[(&str, &str)]) -> S3Event {
    let records: Vec<Value> = objects
        .iter()
        .map(|(bucket, key)| {
            json!({
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "awsRegion": "us-east-1",
                "eventTime": "2024-01-15T10:00:00.000Z",
                "eventName": "ObjectCreated:Put",
                "userIdentity": {"principalId": "AWS:EXAMPLE"},
                "requestParameters": {"sourceIPAddress": "127.0.0.1"},
                "responseElements": {
                    "x-amz-request-id": "EXAMPLE123456789",
                    "x-amz-id-2": "EXAMPLE123/abcdefghijklmnopqrstuvwxyz"
                },
                "s3": {
                    "s3SchemaVersion": "1.0",
                    "configurationId": "splashback",
                    "bucket": {
                        "name": bucket,
                        "ownerIdentity": {"principalId": "EXAMPLE"},
                        "arn": format!("arn:aws:s3:::{bucket}")
                    },
                    "object": {
                        "key": key,
                        "size": 1024,
                        "eTag": "0123456789abcdef0123456789abcdef",
                        "sequencer": "0A1B2C3D4E5F678901"
                    }
                }
            })
        })
        .collect();

    serde_json::from_value(json!({ "Records": records })).unwrap()
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<(String, String), Bytes>,
    content_types: HashMap<(String, String), String>,
    deleted: Vec<(String, String)>,
    fail_puts: bool,
}

/// [`ObjectStore`] over a shared in-memory map
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, body: impl Into<Bytes>) -> Self {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((bucket.to_string(), key.to_string()), body.into());
        self
    }

    /// Make every write fail
    pub fn failing_puts(self) -> Self {
        self.state.lock().unwrap().fail_puts = true;
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// A stored object parsed as JSON
    pub fn json(&self, bucket: &str, key: &str) -> Option<Value> {
        self.object(bucket, key)
            .map(|body| serde_json::from_slice(&body).unwrap())
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .content_types
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys deleted so far, in order
    pub fn deleted(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .deleted
            .iter()
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.object(bucket, key).ok_or_else(|| StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_puts {
            return Err(StorageError::Request("simulated write failure".into()));
        }
        let id = (bucket.to_string(), key.to_string());
        state.content_types.insert(id.clone(), content_type.to_string());
        state.objects.insert(id, body);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let id = (bucket.to_string(), key.to_string());
        state.objects.remove(&id);
        state.deleted.push(id);
        Ok(())
    }
}

#[derive(Default)]
struct SinkState {
    calls: Vec<Vec<Bytes>>,
    succeed_first: Option<usize>,
    successes: usize,
}

/// [`DeliverySink`] recording every call, optionally going down after a
/// number of accepted batches
#[derive(Clone, Default)]
pub struct ScriptedSink {
    state: Arc<Mutex<SinkState>>,
}

impl ScriptedSink {
    /// A sink that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that accepts `n` batches, then is unavailable for good
    pub fn failing_after(n: usize) -> Self {
        let sink = Self::default();
        sink.state.lock().unwrap().succeed_first = Some(n);
        sink
    }

    /// Every batch received, including rejected ones
    pub fn calls(&self) -> Vec<Vec<Bytes>> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Records from accepted batches, flattened in delivery order
    pub fn delivered(&self) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        let accepted = state.succeed_first.unwrap_or(usize::MAX);
        state
            .calls
            .iter()
            .take(accepted)
            .flatten()
            .flat_map(|entry| match serde_json::from_slice::<Value>(entry).unwrap() {
                Value::Array(records) => records,
                other => panic!("entry is not a JSON array: {other}"),
            })
            .collect()
    }
}

#[async_trait]
impl DeliverySink for ScriptedSink {
    async fn put_record_batch(&self, entries: Vec<Bytes>) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(entries);

        match state.succeed_first {
            Some(limit) if state.successes >= limit => {
                Err(SinkError::Unavailable("simulated outage".into()))
            }
            _ => {
                state.successes += 1;
                Ok(())
            }
        }
    }
}
