//! Candidate job sourcing from external game archives.
//!
//! A job source returns a deduplicated batch of candidate analysis jobs,
//! excluding identifiers the engine has already analyzed. Sources must
//! tolerate partial upstream failure and must never error on an empty
//! result; an empty batch simply means nothing new is available.

pub mod archive;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::types::Job;

pub use archive::HttpArchiveSource;

/// Time window constraining which games a fetch may return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchWindow {
    /// Only games newer than this instant, when set.
    pub newer_than: Option<DateTime<Utc>>,
    /// Only games older than this instant, when set.
    pub older_than: Option<DateTime<Utc>>,
}

impl FetchWindow {
    /// An unconstrained window.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Window open toward the past from `instant`.
    pub fn older_than(instant: DateTime<Utc>) -> Self {
        Self {
            newer_than: None,
            older_than: Some(instant),
        }
    }

    /// Window open toward the present from `instant`.
    pub fn newer_than(instant: DateTime<Utc>) -> Self {
        Self {
            newer_than: Some(instant),
            older_than: None,
        }
    }
}

/// Source of candidate analysis jobs.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Fetches up to `count` candidate jobs inside `window`, excluding any
    /// whose identifier appears in `exclude`.
    ///
    /// Partial upstream failures are tolerated: the call returns whatever
    /// subset succeeded, and an empty result is `Ok(vec![])`, never an error.
    async fn fetch_candidates(
        &self,
        exclude: &HashSet<String>,
        count: usize,
        window: FetchWindow,
    ) -> Result<Vec<Job>, SourceError>;
}
