//! Geographic adjacency graph
//!
//! Read-only after load. Adjacency is a relation separate from the entity
//! tree: bordering regions may have different parents and different ranks.
//! The data is expected to be symmetric; `validate_symmetry` reports where it
//! is not, and the rest of the engine copes with asymmetric entries.

use locmerge_common::{GeoEntity, Rank, RegionId, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

static NO_REGIONS: BTreeSet<RegionId> = BTreeSet::new();

/// `to` is listed as a neighbor of `from`, but not the other way round
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AsymmetricEdge {
    pub from: RegionId,
    pub to: RegionId,
}

/// On-disk form: `{ "entities": [...], "adjacency": { "<id>": [ids] } }`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AdjacencyFile {
    pub entities: Vec<GeoEntity>,
    #[serde(default)]
    pub adjacency: BTreeMap<RegionId, Vec<RegionId>>,
}

#[derive(Debug, Clone, Default)]
pub struct AdjacencyGraph {
    entities: BTreeMap<RegionId, GeoEntity>,
    neighbors: BTreeMap<RegionId, BTreeSet<RegionId>>,
    referrers: BTreeMap<RegionId, BTreeSet<RegionId>>,
    children: BTreeMap<RegionId, BTreeSet<RegionId>>,
}

impl AdjacencyGraph {
    /// Build the graph; self-loops are dropped with a warning
    pub fn new<I>(entities: Vec<GeoEntity>, edges: I) -> Self
    where
        I: IntoIterator<Item = (RegionId, Vec<RegionId>)>,
    {
        let mut graph = Self::default();

        for entity in entities {
            if let Some(parent) = entity.parent_id {
                graph.children.entry(parent).or_default().insert(entity.id);
            }
            graph.entities.insert(entity.id, entity);
        }

        for (region, bordering) in edges {
            for neighbor in bordering {
                if neighbor == region {
                    warn!(region, "Dropping self-adjacency");
                    continue;
                }
                graph.neighbors.entry(region).or_default().insert(neighbor);
                graph.referrers.entry(neighbor).or_default().insert(region);
            }
        }

        debug!(
            entities = graph.entities.len(),
            regions_with_neighbors = graph.neighbors.len(),
            "Adjacency graph built"
        );
        graph
    }

    pub fn from_file(file: AdjacencyFile) -> Self {
        Self::new(file.entities, file.adjacency)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: AdjacencyFile = serde_json::from_str(json)?;
        Ok(Self::from_file(file))
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Regions bordering `region`
    pub fn neighbors_of(&self, region: RegionId) -> &BTreeSet<RegionId> {
        self.neighbors.get(&region).unwrap_or(&NO_REGIONS)
    }

    /// Regions that list `region` as a neighbor
    ///
    /// Equals `neighbors_of` when the data is symmetric.
    pub fn referrers_of(&self, region: RegionId) -> &BTreeSet<RegionId> {
        self.referrers.get(&region).unwrap_or(&NO_REGIONS)
    }

    /// Finest rank present in the graph (`Earth` when empty)
    pub fn most_specific_rank(&self) -> Rank {
        self.entities
            .values()
            .map(|e| e.rank)
            .max()
            .unwrap_or(Rank::Earth)
    }

    pub fn entity(&self, region: RegionId) -> Option<&GeoEntity> {
        self.entities.get(&region)
    }

    pub fn rank_of(&self, region: RegionId) -> Option<Rank> {
        self.entities.get(&region).map(|e| e.rank)
    }

    pub fn children_of(&self, region: RegionId) -> &BTreeSet<RegionId> {
        self.children.get(&region).unwrap_or(&NO_REGIONS)
    }

    /// Childless descendants of `region`; `region` itself when it has no children
    pub fn leaf_regions_under(&self, region: RegionId) -> BTreeSet<RegionId> {
        let mut leaves = BTreeSet::new();
        let mut stack = vec![region];
        let mut seen = BTreeSet::new();

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let children = self.children_of(current);
            if children.is_empty() {
                leaves.insert(current);
            } else {
                stack.extend(children.iter().copied());
            }
        }
        leaves
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Every edge whose reverse edge is missing
    pub fn validate_symmetry(&self) -> Vec<AsymmetricEdge> {
        let mut violations = Vec::new();
        for (&from, bordering) in &self.neighbors {
            for &to in bordering {
                if !self.neighbors_of(to).contains(&from) {
                    violations.push(AsymmetricEdge { from, to });
                }
            }
        }
        violations
    }
}
