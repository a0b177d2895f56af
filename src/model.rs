//! # Data Model
//!
//! Alerts as they live in the source collection, and the dashboard documents
//! derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Storage-assigned identifier for alert documents.
///
/// Ids are handed out in insertion order, so ordering by id is ordering by
/// arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Critical => "Critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Priority::Low),
            "Medium" => Ok(Priority::Medium),
            "High" => Ok(Priority::High),
            "Critical" => Ok(Priority::Critical),
            other => anyhow::bail!("unknown priority: {other}"),
        }
    }
}

/// A single alert record.
///
/// This is also the projected shape stored inside dashboard documents: the
/// storage id is never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub name: String,
    pub priority: Priority,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub cleared: bool,
}

impl Alert {
    pub fn new(
        name: impl Into<String>,
        priority: Priority,
        created_at: OffsetDateTime,
        cleared: bool,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            created_at,
            cleared,
        }
    }

    /// Encode as a schemaless source document.
    pub fn to_document(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a source document. Fails on missing fields, wrong types or an
    /// unknown priority; unknown extra fields are ignored.
    pub fn from_document(document: &serde_json::Value) -> anyhow::Result<Self> {
        Ok(Alert::deserialize(document)?)
    }
}

/// An alert paired with the id the source store assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAlert {
    pub id: AlertId,
    pub alert: Alert,
}

/// A dashboard document: a keyed, ordered batch of projected alerts.
///
/// `count` always equals `values.len()`; the only way to build one is
/// through [`Bucket::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(rename = "_id")]
    id: String,
    values: Vec<Alert>,
    count: u64,
}

impl Bucket {
    pub fn new(id: impl Into<String>, values: Vec<Alert>) -> Self {
        let count = values.len() as u64;
        Self {
            id: id.into(),
            values,
            count,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn values(&self) -> &[Alert] {
        &self.values
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_values(self) -> Vec<Alert> {
        self.values
    }
}

/// Format the id of a numbered bucket: `prefix` followed by the decimal number.
pub fn bucket_id(prefix: &str, number: u64) -> String {
    format!("{prefix}{number}")
}

/// Parse the number back out of a bucket id carrying `prefix`.
pub fn parse_bucket_number(prefix: &str, id: &str) -> Option<u64> {
    id.strip_prefix(prefix)?.parse().ok()
}
