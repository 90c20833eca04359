//! Worker loop, Stage-1 trigger ingest, and ambient configuration for the
//! fire/smoke detection ETL.

pub mod config;
pub mod error;
pub mod event_sink;
#[cfg(test)]
mod fake_queue;
pub mod stage1;
pub mod worker;

pub use config::Config;
pub use error::WorkerError;
pub use event_sink::{EventSink, LoggingEventSink, NoopEventSink};
pub use worker::WorkerLoop;
