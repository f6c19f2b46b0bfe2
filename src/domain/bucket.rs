//! Bucket counters and entries

use super::ids::Qualifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ring state of one bucket series
///
/// `in_progress` is set between a rotation and the end of the export of the
/// vacated bucket. A set marker on load means the previous export crashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounter {
    pub qualifier: Qualifier,
    pub current: u32,
    pub max_buckets: u32,
    pub in_progress: Option<u32>,
}

impl BucketCounter {
    pub fn new(qualifier: Qualifier, max_buckets: u32) -> Self {
        Self {
            qualifier,
            current: 0,
            max_buckets,
            in_progress: None,
        }
    }

    /// Bucket that follows `current` in the ring
    pub fn next_bucket(&self) -> u32 {
        if self.max_buckets == 0 {
            return 0;
        }
        (self.current + 1) % self.max_buckets
    }
}

/// How a bucket entry is applied downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    #[default]
    Upsert,
    Delete,
}

impl EntryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryMode::Upsert => "upsert",
            EntryMode::Delete => "delete",
        }
    }
}

impl fmt::Display for EntryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(EntryMode::Upsert),
            "delete" => Ok(EntryMode::Delete),
            other => Err(format!("Unknown entry mode '{other}'")),
        }
    }
}

/// One accumulated record inside a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketEntry {
    /// Reference used to page through a bucket
    pub record_ref: String,
    pub partition_key: String,
    pub record_key: String,
    #[serde(default)]
    pub mode: EntryMode,
    pub payload: serde_json::Value,
}
