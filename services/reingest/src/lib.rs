//! Nier Reingest Service
//!
//! Splashback reingestion for Firehose delivery streams. When a delivery
//! stream cannot hand records to its destination it backs them up to S3.
//! This service is triggered by those backup objects, unwraps the records,
//! and writes them back into the stream. Each record carries a reingest
//! counter so a record that keeps failing is eventually quarantined instead
//! of looping forever.
//!
//! ## Flow
//!
//! ```text
//! S3 notification         S3 backup object          Firehose stream
//! ┌──────────────┐       ┌──────────────┐          ┌──────────────┐
//! │ Trigger      │──────▶│ gzip/plain   │          │ PutRecord    │
//! └──────────────┘       │ JSON lines   │          │ Batch        │
//!                        └──────────────┘          └──────────────┘
//!                               │                         ▲
//!                               ▼                         │
//!                        ┌──────────────┐          ┌──────────────┐
//!                        │ Unpack +     │─────────▶│ Batcher      │
//!                        │ Router       │          │ (500/request)│
//!                        └──────────────┘          └──────────────┘
//!                               │
//!                               ▼
//!                        ┌──────────────┐
//!                        │ Quarantine   │──▶ <failed prefix><key>
//!                        └──────────────┘
//! ```

pub mod batcher;
pub mod config;
pub mod controller;
pub mod decompress;
pub mod error;
pub mod firehose;
pub mod quarantine;
pub mod retry;
pub mod router;
pub mod storage;
pub mod trigger;
pub mod unpack;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use controller::{ArchiveObject, Reingestor, RunOutcome, RunReport};
pub use error::{ReingestError, SinkError, StorageError};
pub use firehose::{DeliverySink, FirehoseSink};
pub use router::{Route, Router};
pub use storage::{ObjectStore, S3ObjectStore};
pub use trigger::handle_event;
