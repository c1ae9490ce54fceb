//! Locality source and merge writer collaborators
//!
//! The host application supplies localities (from its database session or an
//! imported file) and writes merges back. `MemoryLocalitySource` does both
//! over an in-memory record set.

use crate::geo::AdjacencyGraph;
use async_trait::async_trait;
use locmerge_common::{LocalityId, PendingLocality, RegionId, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait LocalitySource: Send + Sync {
    /// Localities filed under `region`; empty when there are none
    async fn fetch_localities_by_region(&self, region: RegionId) -> Result<Vec<PendingLocality>>;

    async fn fetch_adjacency(&self) -> Result<Arc<AdjacencyGraph>>;
}

#[async_trait]
pub trait MergeWriter: Send + Sync {
    /// Replace `keep` (by id) with its merged content and remove `discard`
    ///
    /// A merge interrupted before this returned is handed over again on
    /// resume, so applying the same merge twice must leave the same records.
    async fn merge_localities(&self, keep: &PendingLocality, discard: &PendingLocality) -> Result<()>;
}

/// A merge as recorded by `MemoryLocalitySource`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedMerge {
    pub keep: LocalityId,
    pub discard: LocalityId,
}

pub struct MemoryLocalitySource {
    graph: Arc<AdjacencyGraph>,
    localities: Mutex<BTreeMap<LocalityId, PendingLocality>>,
    merges: Mutex<Vec<AppliedMerge>>,
    fetches: Mutex<Vec<RegionId>>,
}

impl MemoryLocalitySource {
    pub fn new(graph: AdjacencyGraph, localities: Vec<PendingLocality>) -> Self {
        Self {
            graph: Arc::new(graph),
            localities: Mutex::new(localities.into_iter().map(|l| (l.id, l)).collect()),
            merges: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Current records, ordered by id
    pub async fn localities(&self) -> Vec<PendingLocality> {
        self.localities.lock().await.values().cloned().collect()
    }

    pub async fn merges(&self) -> Vec<AppliedMerge> {
        self.merges.lock().await.clone()
    }

    /// Regions fetched so far, in fetch order
    pub async fn fetched_regions(&self) -> Vec<RegionId> {
        self.fetches.lock().await.clone()
    }
}

#[async_trait]
impl LocalitySource for MemoryLocalitySource {
    async fn fetch_localities_by_region(&self, region: RegionId) -> Result<Vec<PendingLocality>> {
        self.fetches.lock().await.push(region);
        let localities = self.localities.lock().await;
        Ok(localities
            .values()
            .filter(|l| l.geo_id == region)
            .cloned()
            .collect())
    }

    async fn fetch_adjacency(&self) -> Result<Arc<AdjacencyGraph>> {
        Ok(Arc::clone(&self.graph))
    }
}

#[async_trait]
impl MergeWriter for MemoryLocalitySource {
    async fn merge_localities(&self, keep: &PendingLocality, discard: &PendingLocality) -> Result<()> {
        let mut localities = self.localities.lock().await;
        localities.remove(&discard.id);
        localities.insert(keep.id, keep.clone());
        drop(localities);

        self.merges.lock().await.push(AppliedMerge {
            keep: keep.id,
            discard: discard.id,
        });
        debug!(keep = keep.id, discard = discard.id, "Merged in memory source");
        Ok(())
    }
}
