//! Domain types and pure extraction logic for the fire/smoke detection ETL.
//!
//! This crate has no I/O: it decodes the source engine's reference-
//! compressed JSON format (`resolver`), derives structured, honestly
//! nullable fields from it (`extract`), and defines the analytics-side
//! row types everything downstream writes (`types`). Nothing here talks
//! to Postgres or the filesystem — those live in `cinderwatch-postgres`
//! and `cinderwatch-images`.

pub mod extract;
pub mod ports;
pub mod resolver;
pub mod types;

use serde_json::Value;

/// Parse a source execution's raw `execution_data.data` JSON string into
/// the array-of-nodes the resolver expects.
pub fn parse_blob(raw: &str) -> Result<Vec<Value>, serde_json::Error> {
    serde_json::from_str(raw)
}
