//! Diagnostic log: structured records of failed platform calls.
//!
//! Every entry gets an identifier of the form `YYYYMMDD` followed by 32 hex
//! characters, so the day it was written is recoverable from the id alone.
//! Callers keep the id and later fetch the entry through the same sink.

mod file;
mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StoreError};

pub use file::FileDiagnosticLog;
pub use sqlite::SqliteDiagnosticLog;

/// A single diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    /// Short description of what went wrong.
    pub name: String,
    /// Request/response context.
    pub data: serde_json::Value,
}

impl DiagnosticEntry {
    /// Build an entry stamped with the current time and a fresh id.
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        let recorded_at = Utc::now();
        Self {
            id: format!(
                "{}{}",
                recorded_at.format("%Y%m%d"),
                Uuid::new_v4().simple()
            ),
            recorded_at,
            name: name.into(),
            data,
        }
    }
}

/// Split an id into its day and the per-entry tag.
pub(crate) fn parse_id(id: &str) -> Result<(NaiveDate, &str)> {
    if id.len() <= 8 || !id.is_char_boundary(8) {
        return Err(StoreError::MalformedId(id.to_string()));
    }
    let (day, tag) = id.split_at(8);
    let date = NaiveDate::parse_from_str(day, "%Y%m%d")
        .map_err(|_| StoreError::MalformedId(id.to_string()))?;
    Ok((date, tag))
}

/// Append-only sink for diagnostic entries.
pub trait DiagnosticSink: Send + Sync + std::fmt::Debug {
    /// Persist an already-built entry.
    fn append(&self, entry: &DiagnosticEntry) -> Result<()>;

    /// Look an entry up by id.
    fn fetch(&self, id: &str) -> Result<Option<DiagnosticEntry>>;

    /// Build, persist and return the id of a new entry.
    fn record(&self, name: &str, data: serde_json::Value) -> Result<String> {
        let entry = DiagnosticEntry::new(name, data);
        self.append(&entry)?;
        tracing::warn!(log_id = %entry.id, name = %entry.name, "diagnostic entry recorded");
        Ok(entry.id)
    }
}

/// Shared diagnostic sink for use across async contexts.
pub type SharedDiagnosticSink = Arc<dyn DiagnosticSink>;
