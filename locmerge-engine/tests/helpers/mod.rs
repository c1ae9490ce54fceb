//! Shared fixtures for the engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use locmerge_common::{Error, GeoEntity, LocalityId, PendingLocality, Rank, RegionId};
use locmerge_engine::phonetic::PhoneticCoder;
use locmerge_engine::store::{ExclusionStore, SeriesRelation, WorkStore};
use locmerge_engine::{
    AdjacencyGraph, ConsolidationDriver, EngineSettings, IntervalYielder, LocalitySource,
    MatchProposal, MemoryLocalitySource, MergeWriter, ReviewDecision, Reviewer, ReviewerError,
    Yielder,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const STATE_ID: RegionId = 10;

/// Counties `ids`, all under one state, joined by symmetric `borders`
pub fn county_graph(ids: &[RegionId], borders: &[(RegionId, RegionId)]) -> AdjacencyGraph {
    let mut entities = vec![GeoEntity {
        id: STATE_ID,
        rank: Rank::State,
        name: "Test State".to_string(),
        parent_id: None,
    }];
    entities.extend(ids.iter().map(|&id| GeoEntity {
        id,
        rank: Rank::County,
        name: format!("County {}", id),
        parent_id: Some(STATE_ID),
    }));

    let mut edges: Vec<(RegionId, Vec<RegionId>)> = ids.iter().map(|&id| (id, Vec::new())).collect();
    for &(a, b) in borders {
        for (region, list) in edges.iter_mut() {
            if *region == a {
                list.push(b);
            } else if *region == b {
                list.push(a);
            }
        }
    }
    AdjacencyGraph::new(entities, edges)
}

/// Counties in a line: ids[0] - ids[1] - ... - ids[n-1]
pub fn line_graph(ids: &[RegionId]) -> AdjacencyGraph {
    let borders: Vec<(RegionId, RegionId)> = ids.windows(2).map(|w| (w[0], w[1])).collect();
    county_graph(ids, &borders)
}

/// How the scripted reviewer answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Different,
    KeepLeft,
    KeepRight,
    /// Claim a merged record under an id that belongs to neither side
    KeepId(LocalityId),
}

/// Reviewer that answers from a script and records what it was shown
pub struct ScriptedReviewer {
    answer: Answer,
    fail_after: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    proposals: Mutex<Vec<MatchProposal>>,
}

impl ScriptedReviewer {
    pub fn answering(answer: Answer) -> Self {
        Self {
            answer,
            fail_after: None,
            cancel_after: None,
            proposals: Mutex::new(Vec::new()),
        }
    }

    pub fn always_different() -> Self {
        Self::answering(Answer::Different)
    }

    /// Answer `answered` proposals, then disconnect
    pub fn failing_after(mut self, answered: usize) -> Self {
        self.fail_after = Some(answered);
        self
    }

    /// Answer `answered` proposals, then cancel `token` and never answer
    pub fn cancelling_after(mut self, answered: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((answered, token));
        self
    }

    pub fn proposals(&self) -> Vec<MatchProposal> {
        self.proposals.lock().unwrap().clone()
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.lock().unwrap().len()
    }
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    async fn propose_match(&self, proposal: MatchProposal) -> Result<ReviewDecision, ReviewerError> {
        let seen = {
            let mut proposals = self.proposals.lock().unwrap();
            proposals.push(proposal.clone());
            proposals.len()
        };

        if let Some(limit) = self.fail_after {
            if seen > limit {
                return Err(ReviewerError::Disconnected);
            }
        }
        if let Some((limit, token)) = &self.cancel_after {
            if seen > *limit {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }

        Ok(match self.answer {
            Answer::Different => ReviewDecision::Different,
            Answer::KeepLeft => ReviewDecision::Same {
                merged: merged_record(&proposal.left, &proposal.right),
            },
            Answer::KeepRight => ReviewDecision::Same {
                merged: merged_record(&proposal.right, &proposal.left),
            },
            Answer::KeepId(id) => {
                let mut merged = merged_record(&proposal.left, &proposal.right);
                merged.id = id;
                ReviewDecision::Same { merged }
            }
        })
    }
}

/// `keep` with the other record's remarks folded in
pub fn merged_record(keep: &PendingLocality, other: &PendingLocality) -> PendingLocality {
    let mut merged = keep.clone();
    if !other.remarks.is_empty() {
        merged.remarks = format!("{} {}", merged.remarks, other.remarks).trim().to_string();
    }
    merged
}

pub fn source(graph: AdjacencyGraph, localities: Vec<PendingLocality>) -> Arc<MemoryLocalitySource> {
    Arc::new(MemoryLocalitySource::new(graph, localities))
}

/// Merge writer over a memory source whose first calls fail
pub struct FlakyMergeWriter {
    inner: Arc<MemoryLocalitySource>,
    failures: AtomicUsize,
}

impl FlakyMergeWriter {
    pub fn failing_first(inner: &Arc<MemoryLocalitySource>, failures: usize) -> Self {
        Self {
            inner: Arc::clone(inner),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl MergeWriter for FlakyMergeWriter {
    async fn merge_localities(
        &self,
        keep: &PendingLocality,
        discard: &PendingLocality,
    ) -> locmerge_common::Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Internal("merge target unavailable".to_string()));
        }
        self.inner.merge_localities(keep, discard).await
    }
}

/// Never yields; counts how often it was asked
pub struct CountingYielder {
    ticks: Arc<AtomicU64>,
}

impl CountingYielder {
    pub fn new() -> (Self, Arc<AtomicU64>) {
        let ticks = Arc::new(AtomicU64::new(0));
        (
            Self {
                ticks: Arc::clone(&ticks),
            },
            ticks,
        )
    }
}

impl Yielder for CountingYielder {
    fn tick(&mut self) -> bool {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        false
    }
}

/// Driver over an in-memory source with a yield point every few steps
pub fn build_driver(
    source: &Arc<MemoryLocalitySource>,
    reviewer: &Arc<ScriptedReviewer>,
    stores: &(WorkStore, ExclusionStore),
    coder: &Arc<dyn PhoneticCoder>,
) -> ConsolidationDriver {
    let merge_writer: Arc<dyn MergeWriter> = source.clone();
    build_driver_with_writer(source, reviewer, stores, coder, merge_writer)
}

/// As `build_driver`, writing merges through `merge_writer`
pub fn build_driver_with_writer(
    source: &Arc<MemoryLocalitySource>,
    reviewer: &Arc<ScriptedReviewer>,
    stores: &(WorkStore, ExclusionStore),
    coder: &Arc<dyn PhoneticCoder>,
    merge_writer: Arc<dyn MergeWriter>,
) -> ConsolidationDriver {
    let locality_source: Arc<dyn LocalitySource> = source.clone();
    let reviewer: Arc<dyn Reviewer> = reviewer.clone();

    ConsolidationDriver::new(
        locality_source,
        reviewer,
        merge_writer,
        stores.0.clone(),
        stores.1.clone(),
        EngineSettings::default(),
    )
    .unwrap()
    .with_coder(Arc::clone(coder))
    .with_yielder(Box::new(IntervalYielder::new(3)))
}

/// Every recorded decision, as comparable tuples
pub async fn decision_set(
    exclusions: &ExclusionStore,
) -> BTreeSet<(String, Vec<String>, Vec<String>, Vec<String>, bool)> {
    let entries: Vec<(String, Vec<locmerge_engine::store::SeriesLink>)> =
        exclusions.kv().scan_prefix("series:").await.unwrap();

    let mut decisions = BTreeSet::new();
    for (key, links) in entries {
        for link in links {
            decisions.insert((
                key.clone(),
                link.words,
                link.peer.word_series,
                link.peer.phonetic_series,
                link.relation == SeriesRelation::Excluded,
            ));
        }
    }
    decisions
}

/// Six counties in a line; neighbors i and i+1 share one phrase
pub const CHAIN_PHRASES: [&str; 6] = [
    "Mill Creek",
    "Bear Flat",
    "Moose Meadow",
    "Cedar Spring",
    "Granite Ridge",
    "Aspen Hollow",
];

pub fn chain_regions() -> Vec<RegionId> {
    (0..CHAIN_PHRASES.len() as RegionId).map(|i| 101 + i).collect()
}

/// County i holds phrase i and phrase i+1, so each border yields one collision
pub fn chain_localities() -> Vec<PendingLocality> {
    let regions = chain_regions();
    let mut localities = Vec::new();
    for (i, &region) in regions.iter().enumerate() {
        let base = region * 10;
        localities.push(PendingLocality::new(base + 1, region, CHAIN_PHRASES[i]));
        if i + 1 < CHAIN_PHRASES.len() {
            localities.push(PendingLocality::new(base + 2, region, CHAIN_PHRASES[i + 1]));
        }
    }
    localities
}

/// Counties 101 and 102 each hold both phrases, so each phrase collides once
pub fn twin_localities() -> Vec<PendingLocality> {
    vec![
        PendingLocality::new(1, 101, "Riverside Canyon"),
        PendingLocality::new(2, 101, "Granite Ridge"),
        PendingLocality::new(3, 102, "Riverside Canyon"),
        PendingLocality::new(4, 102, "Granite Ridge"),
    ]
}
