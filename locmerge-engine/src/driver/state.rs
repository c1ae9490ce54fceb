//! Driver state machine and pass bookkeeping
//!
//! Idle → SelectingDomain → Traversing ⇄ AwaitingReview → Draining → Idle

use crate::geo::Domain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    Idle,
    SelectingDomain,
    Traversing,
    AwaitingReview,
    Draining,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Idle => "idle",
            DriverState::SelectingDomain => "selecting domain",
            DriverState::Traversing => "traversing",
            DriverState::AwaitingReview => "awaiting review",
            DriverState::Draining => "draining",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub old_state: DriverState,
    pub new_state: DriverState,
    pub transitioned_at: DateTime<Utc>,
}

/// Persisted record of the pass in progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    pub pass_id: Uuid,
    pub domain: Domain,
    /// Phonetic coder the pass was started with
    pub coder: String,
    pub started_at: DateTime<Utc>,
    pub regions_total: u64,
    pub regions_finished: u64,
    pub proposals_offered: u64,
    pub collisions_suppressed: u64,
    pub merges: u64,
    pub exclusions_recorded: u64,
    pub peak_resident_regions: u64,
    /// Times the pass was resumed after an interruption
    #[serde(default)]
    pub resumes: u32,
}

impl PassRecord {
    pub fn new(domain: Domain, coder: &str, regions_total: u64) -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            domain,
            coder: coder.to_string(),
            started_at: Utc::now(),
            regions_total,
            regions_finished: 0,
            proposals_offered: 0,
            collisions_suppressed: 0,
            merges: 0,
            exclusions_recorded: 0,
            peak_resident_regions: 0,
            resumes: 0,
        }
    }

    /// Percentage of regions finished (0.0 - 100.0)
    pub fn percent_complete(&self) -> f64 {
        if self.regions_total == 0 {
            100.0
        } else {
            self.regions_finished as f64 / self.regions_total as f64 * 100.0
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        Self::new(Domain::Subset(vec![1]), "soundex", 1)
    }
}

/// Outcome of a drained pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub pass_id: Uuid,
    pub regions_processed: u64,
    pub proposals_offered: u64,
    /// Collisions dropped because every candidate was already excluded
    pub collisions_suppressed: u64,
    pub merges: u64,
    pub exclusions_recorded: u64,
    pub peak_resident_regions: u64,
    pub resumes: u32,
}

impl From<&PassRecord> for PassSummary {
    fn from(record: &PassRecord) -> Self {
        Self {
            pass_id: record.pass_id,
            regions_processed: record.regions_finished,
            proposals_offered: record.proposals_offered,
            collisions_suppressed: record.collisions_suppressed,
            merges: record.merges,
            exclusions_recorded: record.exclusions_recorded,
            peak_resident_regions: record.peak_resident_regions,
            resumes: record.resumes,
        }
    }
}
