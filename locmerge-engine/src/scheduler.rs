//! Region scheduler
//!
//! Chooses the traversal order of a pass and decides when a loaded region can
//! leave the work store. Two counters drive it:
//!
//! - `adjacent_completed` per unprocessed region: how many of its neighbors
//!   are finished. The next region is the one with the most finished
//!   neighbors, which keeps the set of resident regions small.
//! - `pending_neighbors` per loaded region: how many unprocessed regions
//!   still list it as a neighbor. At zero the region is evicted.
//!
//! A loaded region is never evicted while it is itself unprocessed or while
//! an unprocessed region lists it as a neighbor; if its counter claims
//! otherwise the counter is recomputed instead.

use crate::geo::AdjacencyGraph;
use locmerge_common::{Rank, RegionId};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Unprocessed {
    rank: Rank,
    adjacent_completed: u32,
}

/// Persisted form of an unprocessed region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnprocessedRegion {
    pub id: RegionId,
    pub rank: Rank,
    pub adjacent_completed: u32,
}

/// Persisted form of a loaded region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedRegion {
    pub id: RegionId,
    pub pending_neighbors: i64,
}

/// Worklist as stored in the work keyspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub unprocessed: Vec<UnprocessedRegion>,
    pub loaded: Vec<LoadedRegion>,
    pub finished: Vec<RegionId>,
    pub last_finished: Option<RegionId>,
}

impl SchedulerSnapshot {
    pub fn loaded_ids(&self) -> BTreeSet<RegionId> {
        self.loaded.iter().map(|l| l.id).collect()
    }
}

pub struct RegionScheduler {
    graph: Arc<AdjacencyGraph>,
    unprocessed: BTreeMap<RegionId, Unprocessed>,
    loaded: BTreeMap<RegionId, i64>,
    finished: BTreeSet<RegionId>,
    last_finished: Option<RegionId>,
}

impl RegionScheduler {
    /// Scheduler for a fresh pass over `regions`
    pub fn new(graph: Arc<AdjacencyGraph>, regions: &BTreeSet<RegionId>) -> Self {
        let unprocessed = regions
            .iter()
            .map(|&id| {
                let rank = graph.rank_of(id).unwrap_or_else(|| {
                    warn!(region = id, "Region has no entity record, treating as coarsest rank");
                    Rank::Earth
                });
                (
                    id,
                    Unprocessed {
                        rank,
                        adjacent_completed: 0,
                    },
                )
            })
            .collect();

        Self {
            graph,
            unprocessed,
            loaded: BTreeMap::new(),
            finished: BTreeSet::new(),
            last_finished: None,
        }
    }

    pub fn restore(graph: Arc<AdjacencyGraph>, snapshot: &SchedulerSnapshot) -> Self {
        Self {
            graph,
            unprocessed: snapshot
                .unprocessed
                .iter()
                .map(|u| {
                    (
                        u.id,
                        Unprocessed {
                            rank: u.rank,
                            adjacent_completed: u.adjacent_completed,
                        },
                    )
                })
                .collect(),
            loaded: snapshot
                .loaded
                .iter()
                .map(|l| (l.id, l.pending_neighbors))
                .collect(),
            finished: snapshot.finished.iter().copied().collect(),
            last_finished: snapshot.last_finished,
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            unprocessed: self
                .unprocessed
                .iter()
                .map(|(&id, u)| UnprocessedRegion {
                    id,
                    rank: u.rank,
                    adjacent_completed: u.adjacent_completed,
                })
                .collect(),
            loaded: self
                .loaded
                .iter()
                .map(|(&id, &pending_neighbors)| LoadedRegion {
                    id,
                    pending_neighbors,
                })
                .collect(),
            finished: self.finished.iter().copied().collect(),
            last_finished: self.last_finished,
        }
    }

    /// Next region to process, or `None` when traversal is complete
    ///
    /// Prefers unprocessed neighbors of the region finished last: most
    /// finished neighbors first, then finest rank, then lowest id. Without
    /// such a neighbor it restarts from the finest-rank unprocessed regions.
    /// Does not change any state.
    pub fn pick_next(&self) -> Option<RegionId> {
        if let Some(last) = self.last_finished {
            let adjacent = self
                .graph
                .neighbors_of(last)
                .iter()
                .filter_map(|id| self.unprocessed.get(id).map(|u| (*id, *u)))
                .max_by_key(|(id, u)| (u.adjacent_completed, u.rank, Reverse(*id)));
            if let Some((id, _)) = adjacent {
                return Some(id);
            }
        }

        let finest = self.unprocessed.values().map(|u| u.rank).max()?;
        self.unprocessed
            .iter()
            .filter(|(_, u)| u.rank == finest)
            .max_by_key(|(id, u)| (u.adjacent_completed, Reverse(**id)))
            .map(|(id, _)| *id)
    }

    /// Record that `region`'s localities are now resident
    pub fn on_region_loaded(&mut self, region: RegionId) {
        if self.loaded.contains_key(&region) {
            return;
        }
        let pending = self.unprocessed_referrers(region);
        self.loaded.insert(region, pending);
        debug!(region, pending_neighbors = pending, "Region loaded");
    }

    /// Mark `region` finished; returns the regions to evict
    pub fn on_region_finished(&mut self, region: RegionId) -> Vec<RegionId> {
        if self.unprocessed.remove(&region).is_none() {
            warn!(region, "Finishing a region that is not unprocessed");
            return Vec::new();
        }
        self.finished.insert(region);
        self.last_finished = Some(region);

        let graph = Arc::clone(&self.graph);
        let neighbors = graph.neighbors_of(region);

        let mut candidates = vec![region];
        for neighbor in neighbors {
            if let Some(u) = self.unprocessed.get_mut(neighbor) {
                u.adjacent_completed += 1;
            }
            if let Some(pending) = self.loaded.get_mut(neighbor) {
                *pending -= 1;
                candidates.push(*neighbor);
            }
        }

        let mut evicted = Vec::new();
        for candidate in candidates {
            if self.unprocessed.contains_key(&candidate) {
                continue;
            }
            let Some(&pending) = self.loaded.get(&candidate) else {
                continue;
            };
            if pending > 0 {
                continue;
            }

            let still_needed = self.unprocessed_referrers(candidate);
            if still_needed > 0 {
                debug!(
                    region = candidate,
                    pending_neighbors = pending,
                    still_needed,
                    "Counter drifted, recomputed instead of evicting"
                );
                self.loaded.insert(candidate, still_needed);
                continue;
            }

            self.loaded.remove(&candidate);
            evicted.push(candidate);
        }

        debug!(region, evicted = evicted.len(), "Region finished");
        evicted
    }

    /// Evict every loaded region; used when traversal completes
    pub fn drain(&mut self) -> Vec<RegionId> {
        let drained: Vec<RegionId> = self.loaded.keys().copied().collect();
        self.loaded.clear();
        drained
    }

    fn unprocessed_referrers(&self, region: RegionId) -> i64 {
        self.graph
            .referrers_of(region)
            .iter()
            .filter(|r| self.unprocessed.contains_key(*r))
            .count() as i64
    }

    pub fn is_complete(&self) -> bool {
        self.unprocessed.is_empty()
    }

    pub fn is_loaded(&self, region: RegionId) -> bool {
        self.loaded.contains_key(&region)
    }

    pub fn is_unprocessed(&self, region: RegionId) -> bool {
        self.unprocessed.contains_key(&region)
    }

    pub fn is_finished(&self, region: RegionId) -> bool {
        self.finished.contains(&region)
    }

    pub fn loaded_regions(&self) -> impl Iterator<Item = RegionId> + '_ {
        self.loaded.keys().copied()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn unprocessed_count(&self) -> usize {
        self.unprocessed.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    pub fn pending_neighbor_count(&self, region: RegionId) -> Option<i64> {
        self.loaded.get(&region).copied()
    }

    pub fn adjacent_completed_count(&self, region: RegionId) -> Option<u32> {
        self.unprocessed.get(&region).map(|u| u.adjacent_completed)
    }

    pub fn graph(&self) -> &Arc<AdjacencyGraph> {
        &self.graph
    }
}
