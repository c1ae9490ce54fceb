//! Consolidation domain selection

use super::adjacency::AdjacencyGraph;
use crate::error::ConsolidationError;
use locmerge_common::{Rank, RegionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

/// Scope chosen for a consolidation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Domain {
    Country(RegionId),
    State(RegionId),
    /// Explicit region list, e.g. the regions touched by an imported file
    Subset(Vec<RegionId>),
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Country(id) => write!(f, "country {}", id),
            Domain::State(id) => write!(f, "state {}", id),
            Domain::Subset(ids) => write!(f, "subset of {} regions", ids.len()),
        }
    }
}

impl Domain {
    /// Most specific regions under the domain
    pub fn resolve(&self, graph: &AdjacencyGraph) -> Result<BTreeSet<RegionId>, ConsolidationError> {
        let regions = match self {
            Domain::Country(id) => leaves_of_rank(graph, *id, Rank::Country)?,
            Domain::State(id) => leaves_of_rank(graph, *id, Rank::State)?,
            Domain::Subset(ids) => {
                let mut regions = BTreeSet::new();
                for &id in ids {
                    if graph.entity(id).is_none() {
                        warn!(region = id, "Unknown region in domain subset, skipping");
                        continue;
                    }
                    regions.extend(graph.leaf_regions_under(id));
                }
                regions
            }
        };

        if regions.is_empty() {
            return Err(ConsolidationError::InvalidDomain(format!(
                "{} contains no known regions",
                self
            )));
        }
        Ok(regions)
    }
}

fn leaves_of_rank(
    graph: &AdjacencyGraph,
    id: RegionId,
    expected: Rank,
) -> Result<BTreeSet<RegionId>, ConsolidationError> {
    match graph.rank_of(id) {
        Some(rank) if rank == expected => Ok(graph.leaf_regions_under(id)),
        Some(rank) => Err(ConsolidationError::InvalidDomain(format!(
            "region {} is a {}, not a {}",
            id, rank, expected
        ))),
        None => Err(ConsolidationError::InvalidDomain(format!(
            "region {} is unknown",
            id
        ))),
    }
}
