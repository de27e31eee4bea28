//! Streaming delivery sink: writes reingested batches back to Firehose.

use crate::config::Config;
use crate::error::SinkError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_firehose::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_firehose::operation::put_record_batch::{PutRecordBatchError, PutRecordBatchOutput};
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record;
use aws_sdk_firehose::Client as FirehoseClient;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

/// Most records Firehose accepts in one `PutRecordBatch` call
pub const MAX_BATCH_RECORDS: usize = 500;

/// A stream that accepts bounded batches of opaque records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Deliver one batch of at most [`MAX_BATCH_RECORDS`] entries
    async fn put_record_batch(&self, entries: Vec<Bytes>) -> Result<(), SinkError>;
}

/// [`DeliverySink`] writing to a Firehose delivery stream
pub struct FirehoseSink {
    client: FirehoseClient,
    stream_name: String,
}

impl FirehoseSink {
    /// Create a sink for the configured delivery stream
    pub async fn new(config: &Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        info!(
            stream = %config.firehose_dest,
            region = %config.region,
            "Firehose sink initialized"
        );

        Self {
            client: FirehoseClient::new(&aws_config),
            stream_name: config.firehose_dest.clone(),
        }
    }
}

#[async_trait]
impl DeliverySink for FirehoseSink {
    #[instrument(skip(self, entries), fields(stream = %self.stream_name, entries = entries.len()))]
    async fn put_record_batch(&self, entries: Vec<Bytes>) -> Result<(), SinkError> {
        let total = entries.len();
        let records = entries
            .into_iter()
            .map(|data| Record::builder().data(Blob::new(data.to_vec())).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SinkError::Build(e.to_string()))?;

        let response = self
            .client
            .put_record_batch()
            .delivery_stream_name(&self.stream_name)
            .set_records(Some(records))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        check_response(&response, total)?;

        debug!(total, "Batch accepted by Firehose");
        Ok(())
    }
}

/// Surface per-record rejections in an otherwise successful response
fn check_response(response: &PutRecordBatchOutput, total: usize) -> Result<(), SinkError> {
    let failed = usize::try_from(response.failed_put_count()).unwrap_or_default();
    if failed == 0 {
        return Ok(());
    }

    let first_error = response
        .request_responses()
        .iter()
        .find_map(|entry| entry.error_code())
        .unwrap_or("unknown");
    warn!(failed, total, first_error, "Firehose rejected part of the batch");
    Err(SinkError::PartialFailure { failed, total })
}

fn classify_sdk_error(err: SdkError<PutRecordBatchError>) -> SinkError {
    let message = DisplayErrorContext(&err).to_string();

    match err.as_service_error() {
        Some(se) => classify_service_error(se, message),
        None => SinkError::Transport(message),
    }
}

fn classify_service_error(err: &PutRecordBatchError, message: String) -> SinkError {
    if err.code() == Some("ThrottlingException") {
        SinkError::Throttled(message)
    } else if err.is_service_unavailable_exception() {
        SinkError::Unavailable(message)
    } else {
        SinkError::Rejected(message)
    }
}
