//! S3 notifications that trigger reingestion.

use crate::controller::{ArchiveObject, Reingestor, RunOutcome};
use crate::error::ReingestError;
use aws_lambda_events::event::s3::{S3Event, S3EventRecord};
use thiserror::Error;
use tracing::{debug, error, info};

/// A notification record that does not identify an object
#[derive(Error, Debug, PartialEq)]
pub enum TriggerError {
    #[error("Notification contains no records")]
    Empty,

    #[error("Notification record {index} has no bucket name")]
    MissingBucket { index: usize },

    #[error("Notification record {index} has no object key")]
    MissingKey { index: usize },
}

/// Objects named by an S3 notification, in order
pub fn archive_objects(event: &S3Event) -> Vec<Result<ArchiveObject, TriggerError>> {
    if event.records.is_empty() {
        return vec![Err(TriggerError::Empty)];
    }

    event
        .records
        .iter()
        .enumerate()
        .map(|(index, record)| archive_object(index, record))
        .collect()
}

fn archive_object(index: usize, record: &S3EventRecord) -> Result<ArchiveObject, TriggerError> {
    let bucket = record
        .s3
        .bucket
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(TriggerError::MissingBucket { index })?;
    let key = record
        .s3
        .object
        .key
        .as_deref()
        .filter(|key| !key.is_empty())
        .ok_or(TriggerError::MissingKey { index })?;

    Ok(ArchiveObject::new(bucket, decode_key(key)))
}

/// Decode an object key as it appears in S3 notifications (`+` for space,
/// percent-escapes for everything else)
pub fn decode_key(key: &str) -> String {
    let spaced = key.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Reingest every object in a notification and summarize the outcome.
///
/// Failures after a run has started changing state are reported in the
/// outcome. A fetch failure changes nothing, so the first one is returned as
/// an error instead, letting the host retry the invocation.
pub async fn handle_event(
    reingestor: &Reingestor,
    event: &S3Event,
) -> Result<RunOutcome, ReingestError> {
    match serde_json::to_string(event) {
        Ok(json) => debug!(event = %json, "Received S3 notification"),
        Err(e) => error!(error = %e, "Unable to log notification as JSON"),
    }

    let mut failure: Option<String> = None;
    let mut unfetched: Option<ReingestError> = None;

    for target in archive_objects(event) {
        let result = match target {
            Ok(object) => match reingestor.run(&object).await {
                Ok(_) => Ok(()),
                Err(e @ ReingestError::Fetch { .. }) => {
                    error!(error = %e, "Archive object could not be fetched");
                    unfetched.get_or_insert(e);
                    continue;
                }
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };

        if let Err(e) = result {
            error!(error = %e, "Reingestion did not complete");
            failure.get_or_insert(e);
        }
    }

    if let Some(e) = unfetched {
        return Err(e);
    }

    match failure {
        Some(e) => Ok(RunOutcome::failure(e)),
        None => {
            info!("All notified objects reingested");
            Ok(RunOutcome::success())
        }
    }
}
