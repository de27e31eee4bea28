//! Re-batching of forwarded records into bounded delivery-stream requests.
//!
//! Each outer line's forwarded records become one sink entry (a JSON array).
//! Entries accumulate until the next one would push the batch past the
//! sink's per-request limit, at which point the batch is flushed first.

use crate::error::{ReingestError, SinkError};
use crate::firehose::{DeliverySink, MAX_BATCH_RECORDS};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::unpack::EventRecord;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, error, instrument};

/// A flush that exhausted its retries, with everything it failed to deliver
#[derive(Debug)]
pub struct FlushFailure {
    /// Attempts made for the failed request
    pub attempts: u32,
    /// Error of the final attempt
    pub source: SinkError,
    /// Entries that never reached the sink, in order
    pub undelivered: Vec<Bytes>,
}

impl From<FlushFailure> for ReingestError {
    fn from(failure: FlushFailure) -> Self {
        ReingestError::Delivery {
            entries: failure.undelivered.len(),
            attempts: failure.attempts,
            source: failure.source,
        }
    }
}

/// Sink entries waiting to be delivered
pub struct PendingBatch<'a> {
    sink: &'a dyn DeliverySink,
    policy: &'a RetryPolicy,
    max_entries: usize,
    entries: Vec<Bytes>,
    pending_records: usize,
    delivered_records: usize,
    flushes: usize,
}

impl<'a> PendingBatch<'a> {
    /// Create an empty batch flushing to `sink` under `policy`
    pub fn new(sink: &'a dyn DeliverySink, policy: &'a RetryPolicy) -> Self {
        Self::with_max_entries(sink, policy, MAX_BATCH_RECORDS)
    }

    pub fn with_max_entries(
        sink: &'a dyn DeliverySink,
        policy: &'a RetryPolicy,
        max_entries: usize,
    ) -> Self {
        Self {
            sink,
            policy,
            max_entries: max_entries.max(1),
            entries: Vec::with_capacity(max_entries),
            pending_records: 0,
            delivered_records: 0,
            flushes: 0,
        }
    }

    /// Append one outer line's forwarded records as a single entry.
    ///
    /// Flushes the current batch first if it is already full. An empty
    /// group is ignored.
    pub async fn push_group(&mut self, records: Vec<EventRecord>) -> Result<(), FlushFailure> {
        if records.is_empty() {
            return Ok(());
        }

        let count = records.len();
        let entry = Bytes::from(Value::Array(records.into_iter().map(Value::Object).collect()).to_string());

        if self.entries.len() >= self.max_entries {
            if let Err(mut failure) = self.flush().await {
                failure.undelivered.push(entry);
                return Err(failure);
            }
        }

        self.entries.push(entry);
        self.pending_records += count;
        Ok(())
    }

    /// Deliver all pending entries. Does nothing when empty.
    #[instrument(skip(self), fields(entries = self.entries.len()))]
    pub async fn flush(&mut self) -> Result<(), FlushFailure> {
        if self.entries.is_empty() {
            return Ok(());
        }

        let entries = std::mem::take(&mut self.entries);
        let records = std::mem::take(&mut self.pending_records);
        let total = entries.len();
        let sink = self.sink;
        let batch = entries.as_slice();

        let result = retry_with_backoff(self.policy, "put_record_batch", move || {
            sink.put_record_batch(batch.to_vec())
        })
        .await;

        match result {
            Ok(()) => {
                self.flushes += 1;
                self.delivered_records += records;
                metrics::counter!("reingest.flushes").increment(1);
                metrics::counter!("reingest.records.forwarded").increment(records as u64);
                debug!(entries = total, records, "Reingested {total}/{total} entries to the stream");
                Ok(())
            }
            Err(e) => {
                metrics::counter!("reingest.flush.failures").increment(1);
                error!(
                    entries = total,
                    attempts = e.attempts,
                    error = %e.source,
                    "Failed to deliver batch to the stream"
                );
                Err(FlushFailure {
                    attempts: e.attempts,
                    source: e.source,
                    undelivered: entries,
                })
            }
        }
    }

    /// Entries waiting for the next flush
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records delivered by successful flushes so far
    pub fn delivered_records(&self) -> usize {
        self.delivered_records
    }

    /// Successful flushes so far
    pub fn flushes(&self) -> usize {
        self.flushes
    }
}
