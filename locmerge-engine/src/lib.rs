//! locmerge-engine library interface
//!
//! Locality consolidation: finds collecting-locality records filed under the
//! same or bordering regions whose descriptions sound alike, asks a reviewer
//! whether they name the same place, and records the answer so the same
//! pairing is never asked about again.

pub mod config;
pub mod driver;
pub mod error;
pub mod geo;
pub mod index;
pub mod matcher;
pub mod phonetic;
pub mod reviewer;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod utils;
pub mod yield_timer;

pub use crate::config::EngineSettings;
pub use crate::driver::state::{DriverState, PassRecord, PassSummary};
pub use crate::driver::ConsolidationDriver;
pub use crate::error::{ConsolidationError, ConsolidationResult};
pub use crate::geo::{AdjacencyGraph, Domain};
pub use crate::reviewer::{
    review_channel, ChannelReviewer, MatchProposal, ReviewDecision, ReviewRequest, Reviewer,
    ReviewerError,
};
pub use crate::source::{LocalitySource, MemoryLocalitySource, MergeWriter};
pub use crate::yield_timer::{IntervalYielder, YieldTimer, Yielder};
