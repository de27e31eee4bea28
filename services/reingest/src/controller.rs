//! Reingestion of one archived backup object.
//!
//! A run fetches the object, unpacks it line by line, routes every event
//! record either back to the delivery stream or into quarantine, writes the
//! quarantine object, and finally deletes the original. Only a failed fetch
//! stops the run before the delete.

use crate::batcher::{FlushFailure, PendingBatch};
use crate::config::Config;
use crate::decompress::decompress;
use crate::error::{LineError, RecordError, ReingestError};
use crate::firehose::DeliverySink;
use crate::quarantine::QuarantineCollection;
use crate::retry::RetryPolicy;
use crate::router::{Route, Router};
use crate::storage::ObjectStore;
use crate::unpack::{unpack, EventRecord};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// An archived backup object, identified by bucket and key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveObject {
    pub bucket: String,
    pub key: String,
}

impl ArchiveObject {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ArchiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// What a completed run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Non-empty lines in the object
    pub lines: usize,
    /// Event records unpacked from lines that parsed
    pub events: usize,
    /// Records accepted by the delivery stream
    pub forwarded: usize,
    /// Successful delivery-stream requests
    pub flushes: usize,
    /// Structured records written to quarantine. Over-ceiling records keep
    /// their counter as read; undelivered ones carry the incremented counter.
    pub quarantined_records: usize,
    /// Raw lines written to quarantine
    pub quarantined_lines: usize,
    /// Key of the quarantine object, if one was written
    pub quarantine_key: Option<String>,
    /// Whether the original object was deleted
    pub deleted: bool,
}

/// Result reported back to the invoking host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Runs reingestion against explicit storage and delivery collaborators
pub struct Reingestor {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn DeliverySink>,
    router: Router,
    retry_policy: RetryPolicy,
    failed_prefix: String,
}

impl Reingestor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn DeliverySink>,
        router: Router,
        retry_policy: RetryPolicy,
        failed_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sink,
            router,
            retry_policy,
            failed_prefix: failed_prefix.into(),
        }
    }

    /// Build a reingestor from loaded configuration
    pub fn from_config(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        Self::new(
            store,
            sink,
            Router::new(config.max_reingest, config.reingest_field.clone()),
            config.retry_policy(),
            config.s3_failed_prefix.clone(),
        )
    }

    /// Reingest one archived object.
    ///
    /// Returns an error if any stage failed. Unless the fetch failed, the
    /// original object has been deleted (or a delete attempted) either way.
    #[instrument(skip(self), fields(bucket = %object.bucket, key = %object.key))]
    pub async fn run(&self, object: &ArchiveObject) -> Result<RunReport, ReingestError> {
        info!("Attempting reingestion on {}", object.key);

        let blob = self
            .store
            .get_object(&object.bucket, &object.key)
            .await
            .map_err(|source| ReingestError::Fetch {
                bucket: object.bucket.clone(),
                key: object.key.clone(),
                source,
            })?;
        debug!(size_bytes = blob.len(), "Successfully retrieved data from S3");

        let text = decompress(&blob);

        let mut report = RunReport::default();
        let mut quarantine = QuarantineCollection::new();
        let mut batch = PendingBatch::new(self.sink.as_ref(), &self.retry_policy);
        let mut first_error: Option<ReingestError> = None;

        let mut lines = unpack(&text);
        for line in lines.by_ref() {
            report.lines += 1;

            let routed = match line.events {
                Ok(events) => {
                    report.events += events.len();
                    self.route_line(events).map_err(LineError::from)
                }
                Err(e) => Err(LineError::from(e)),
            };

            let (forward, held) = match routed {
                Ok(routes) => routes,
                Err(e) => {
                    error!(error = %e, line = report.lines, "Failed to process line, quarantining it");
                    quarantine.push_raw(line.raw);
                    continue;
                }
            };

            quarantine.extend_records(held);

            if let Err(failure) = batch.push_group(forward).await {
                preserve_undelivered(&mut quarantine, &failure);
                first_error = Some(failure.into());
                break;
            }
        }

        if first_error.is_some() {
            // Delivery is down; keep the lines not yet processed as they are
            let mut skipped = 0usize;
            for line in lines {
                report.lines += 1;
                skipped += 1;
                quarantine.push_raw(line.raw);
            }
            warn!(skipped, "Delivery failed, quarantining unprocessed lines");
        } else if let Err(failure) = batch.flush().await {
            preserve_undelivered(&mut quarantine, &failure);
            first_error = Some(failure.into());
        }

        report.forwarded = batch.delivered_records();
        report.flushes = batch.flushes();
        report.quarantined_records = quarantine.records();
        report.quarantined_lines = quarantine.raw_lines();

        match quarantine
            .dump(self.store.as_ref(), &object.bucket, &self.failed_prefix, &object.key)
            .await
        {
            Ok(key) => report.quarantine_key = key,
            Err(e) => {
                error!(error = %e, "Failed to write quarantine object");
                first_error.get_or_insert(e);
            }
        }

        report.deleted = self.delete_original(object).await;

        match first_error {
            Some(e) => {
                metrics::counter!("reingest.runs.failed").increment(1);
                error!(error = %e, ?report, "Reingestion failed on {}", object.key);
                Err(e)
            }
            None => {
                info!(
                    forwarded = report.forwarded,
                    quarantined = report.quarantined_records + report.quarantined_lines,
                    "Successfully completed reingestion on {}",
                    object.key
                );
                Ok(report)
            }
        }
    }

    /// Route every record of one line, or none of them
    fn route_line(
        &self,
        events: Vec<EventRecord>,
    ) -> Result<(Vec<EventRecord>, Vec<EventRecord>), RecordError> {
        let mut forward = Vec::with_capacity(events.len());
        let mut held = Vec::new();

        for event in events {
            match self.router.classify(event)? {
                Route::Forward(record) => forward.push(record),
                Route::Quarantine(record) => held.push(record),
            }
        }

        Ok((forward, held))
    }

    /// Best-effort delete of the original object
    async fn delete_original(&self, object: &ArchiveObject) -> bool {
        debug!("Deleting original record object {}", object);

        match self.store.delete_object(&object.bucket, &object.key).await {
            Ok(()) => {
                debug!("Successfully deleted original record object {}", object);
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to delete original record object {}", object);
                false
            }
        }
    }
}

/// Move entries that never reached the stream into quarantine, in their
/// forward-ready (incremented) form
fn preserve_undelivered(quarantine: &mut QuarantineCollection, failure: &FlushFailure) {
    for entry in &failure.undelivered {
        match serde_json::from_slice::<Vec<EventRecord>>(entry) {
            Ok(records) => quarantine.extend_records(records),
            Err(_) => quarantine.push_raw(String::from_utf8_lossy(entry)),
        }
    }
}
