//! Consolidation driver
//!
//! Runs one pass at a time over a domain. For each region chosen by the
//! scheduler the driver loads the region and its neighbors, searches for
//! phonetic collisions, asks the reviewer about every collision that still
//! has undecided candidates, and commits the region:
//!
//! 1. staged exclusions (exclusion keyspace, one transaction)
//! 2. scheduler finish, evicting regions no longer needed
//! 3. pass record, worklist, evictions and index spill (work keyspace, one
//!    transaction)
//!
//! A failure before step 1 loses only the current region's staged
//! exclusions; the region is processed again on resume. Merges are durable
//! as soon as the reviewer answers:
//!
//! 1. synonyms for the offered candidates (exclusion keyspace)
//! 2. merged record, discard removal and a pending-merge marker (work
//!    keyspace, one transaction)
//! 3. the merge writer
//! 4. marker cleared
//!
//! Resuming or abandoning a pass first replays a merge still marked pending.

pub mod state;

use crate::config::EngineSettings;
use crate::error::{ConsolidationError, ConsolidationResult};
use crate::geo::{AdjacencyGraph, Domain};
use crate::index::PhoneticIndex;
use crate::matcher::{collisions_from, collisions_involving, region_members, Collision, ResidentLocality};
use crate::phonetic::{code_locality, coder_by_name, PhoneticCoder};
use crate::reviewer::{MatchProposal, ReviewDecision, Reviewer, ReviewerError};
use crate::scheduler::RegionScheduler;
use crate::source::{LocalitySource, MergeWriter};
use crate::store::{ExclusionStore, WorkStore};
use crate::yield_timer::Yielder;
use locmerge_common::{Error, LocalityId, PendingLocality, RegionId, SeriesPair};
use state::{DriverState, PassRecord, PassSummary, StateTransition};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// In-memory state of the pass being run
struct PassContext {
    record: PassRecord,
    scheduler: RegionScheduler,
    index: PhoneticIndex,
    residents: HashMap<LocalityId, ResidentLocality>,
}

/// Review state of the region being processed
#[derive(Default)]
struct RegionReview {
    exclusions: Vec<(SeriesPair, SeriesPair)>,
    /// Locality pairs already looked at, left id first
    seen: HashSet<(LocalityId, LocalityId)>,
}

impl RegionReview {
    fn excludes(&self, left: &SeriesPair, right: &SeriesPair) -> bool {
        self.exclusions
            .iter()
            .any(|(a, b)| (a == left && b == right) || (a == right && b == left))
    }
}

pub struct ConsolidationDriver {
    source: Arc<dyn LocalitySource>,
    reviewer: Arc<dyn Reviewer>,
    merge_writer: Arc<dyn MergeWriter>,
    work_store: WorkStore,
    exclusions: ExclusionStore,
    coder: Arc<dyn PhoneticCoder>,
    settings: EngineSettings,
    state: DriverState,
    yielder: Box<dyn Yielder>,
}

impl ConsolidationDriver {
    pub fn new(
        source: Arc<dyn LocalitySource>,
        reviewer: Arc<dyn Reviewer>,
        merge_writer: Arc<dyn MergeWriter>,
        work_store: WorkStore,
        exclusions: ExclusionStore,
        settings: EngineSettings,
    ) -> locmerge_common::Result<Self> {
        let coder = settings.coder()?;
        let yielder = Box::new(settings.yield_timer());

        Ok(Self {
            source,
            reviewer,
            merge_writer,
            work_store,
            exclusions,
            coder,
            settings,
            state: DriverState::Idle,
            yielder,
        })
    }

    /// Replace the configured coder
    pub fn with_coder(mut self, coder: Arc<dyn PhoneticCoder>) -> Self {
        self.coder = coder;
        self
    }

    /// Replace the time-based yielder
    pub fn with_yielder(mut self, yielder: Box<dyn Yielder>) -> Self {
        self.yielder = yielder;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn coder(&self) -> &Arc<dyn PhoneticCoder> {
        &self.coder
    }

    pub fn work_store(&self) -> &WorkStore {
        &self.work_store
    }

    pub fn exclusion_store(&self) -> &ExclusionStore {
        &self.exclusions
    }

    fn transition_to(&mut self, new_state: DriverState) -> StateTransition {
        let transition = StateTransition {
            old_state: self.state,
            new_state,
            transitioned_at: chrono::Utc::now(),
        };
        debug!(from = %transition.old_state, to = %new_state, "Driver state transition");
        self.state = new_state;
        transition
    }

    pub async fn has_resumable_pass(&self) -> locmerge_common::Result<bool> {
        Ok(self.work_store.load_pass().await?.is_some())
    }

    /// Run a full pass over `domain`
    ///
    /// Refuses to start while an interrupted pass is stored; resume or
    /// abandon it first.
    pub async fn start_pass(
        &mut self,
        domain: Domain,
        cancel: &CancellationToken,
    ) -> ConsolidationResult<PassSummary> {
        if let Some(existing) = self.work_store.load_pass().await? {
            return Err(ConsolidationError::PassInProgress(existing.pass_id));
        }

        self.transition_to(DriverState::SelectingDomain);
        let ctx = match self.select_domain(domain).await {
            Ok(ctx) => ctx,
            Err(e) => {
                self.transition_to(DriverState::Idle);
                return Err(e);
            }
        };

        info!(
            pass_id = %ctx.record.pass_id,
            domain = %ctx.record.domain,
            regions = ctx.record.regions_total,
            coder = %ctx.record.coder,
            "Consolidation pass started"
        );
        self.run(ctx, cancel).await
    }

    async fn select_domain(&mut self, domain: Domain) -> ConsolidationResult<PassContext> {
        let graph = self.source.fetch_adjacency().await?;
        log_asymmetries(&graph);

        let regions = domain.resolve(&graph)?;
        let record = PassRecord::new(domain, self.coder.name(), regions.len() as u64);
        let scheduler = RegionScheduler::new(graph, &regions);

        // Leftovers of a pass that never got its record written
        self.work_store.clear().await?;
        self.work_store
            .begin_pass(&record, &scheduler.snapshot())
            .await?;

        Ok(PassContext {
            record,
            scheduler,
            index: PhoneticIndex::new(),
            residents: HashMap::new(),
        })
    }

    /// Continue the stored pass from its last committed region
    pub async fn resume_pass(&mut self, cancel: &CancellationToken) -> ConsolidationResult<PassSummary> {
        let Some(mut record) = self.work_store.load_pass().await? else {
            return Err(ConsolidationError::NoResumablePass);
        };
        let snapshot = self
            .work_store
            .load_worklist()
            .await?
            .ok_or_else(|| Error::NotFound(format!("worklist of pass {}", record.pass_id)))?;

        if record.coder != self.coder.name() {
            let coder = coder_by_name(&record.coder).ok_or_else(|| {
                Error::Config(format!("Pass was started with unknown coder '{}'", record.coder))
            })?;
            warn!(
                configured = self.coder.name(),
                recorded = %record.coder,
                "Resuming with the coder the pass was started with"
            );
            self.coder = coder;
        }

        // The stored record already counts a replayed merge
        self.replay_pending_merge().await?;

        let graph = self.source.fetch_adjacency().await?;
        let scheduler = RegionScheduler::restore(graph, &snapshot);
        record.resumes += 1;

        let purged = self
            .work_store
            .purge_regions_except(&snapshot.loaded_ids())
            .await?;

        let mut ctx = PassContext {
            record,
            scheduler,
            index: PhoneticIndex::new(),
            residents: HashMap::new(),
        };

        let loaded: Vec<RegionId> = ctx.scheduler.loaded_regions().collect();
        for &region in &loaded {
            let localities = self.work_store.region_localities(region).await?;
            for locality in localities {
                let resident = self.prepare(region, locality);
                admit(&mut ctx, resident);
            }
        }

        info!(
            pass_id = %ctx.record.pass_id,
            regions_finished = ctx.record.regions_finished,
            regions_total = ctx.record.regions_total,
            resident_regions = loaded.len(),
            purged = purged.len(),
            "Consolidation pass resumed"
        );
        self.run(ctx, cancel).await
    }

    /// Drop the stored pass; recorded reviewer decisions and merges are kept
    pub async fn abandon_pass(&mut self) -> locmerge_common::Result<Option<Uuid>> {
        let abandoned = self.work_store.load_pass().await?.map(|p| p.pass_id);
        self.replay_pending_merge().await?;
        self.work_store.clear().await?;
        self.transition_to(DriverState::Idle);

        if let Some(pass_id) = abandoned {
            info!(pass_id = %pass_id, "Consolidation pass abandoned");
        }
        Ok(abandoned)
    }

    /// Hand a merge interrupted before the merge writer confirmed it to the
    /// writer again
    async fn replay_pending_merge(&self) -> locmerge_common::Result<()> {
        let Some(pending) = self.work_store.pending_merge().await? else {
            return Ok(());
        };
        info!(
            keep = pending.keep.id,
            discard = pending.discard.id,
            "Replaying interrupted merge"
        );
        self.merge_writer
            .merge_localities(&pending.keep, &pending.discard)
            .await?;
        self.work_store.clear_pending_merge().await
    }

    async fn run(&mut self, ctx: PassContext, cancel: &CancellationToken) -> ConsolidationResult<PassSummary> {
        let pass_id = ctx.record.pass_id;
        match self.traverse(ctx, cancel).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.transition_to(DriverState::Idle);
                warn!(
                    pass_id = %pass_id,
                    error = %e,
                    resumable = e.is_resumable(),
                    "Consolidation pass aborted"
                );
                Err(e)
            }
        }
    }

    async fn traverse(&mut self, mut ctx: PassContext, cancel: &CancellationToken) -> ConsolidationResult<PassSummary> {
        self.transition_to(DriverState::Traversing);

        while let Some(region) = ctx.scheduler.pick_next() {
            if cancel.is_cancelled() {
                return Err(ConsolidationError::Cancelled);
            }
            self.process_region(&mut ctx, region, cancel).await?;
        }

        self.drain(ctx).await
    }

    async fn process_region(
        &mut self,
        ctx: &mut PassContext,
        region: RegionId,
        cancel: &CancellationToken,
    ) -> ConsolidationResult<()> {
        let graph: Arc<AdjacencyGraph> = Arc::clone(ctx.scheduler.graph());

        // The region itself, then its bordering regions, inside the domain or not
        let mut needed = vec![region];
        needed.extend(graph.neighbors_of(region).iter().copied());
        for r in needed {
            if !ctx.scheduler.is_loaded(r) {
                self.load_region(ctx, r, cancel).await?;
            }
        }
        ctx.record.peak_resident_regions = ctx
            .record
            .peak_resident_regions
            .max(ctx.scheduler.loaded_count() as u64);

        let mut queue: VecDeque<Collision> = VecDeque::new();
        for id in region_members(region, &ctx.residents) {
            self.maybe_yield(cancel).await?;
            if let Some(left) = ctx.residents.get(&id) {
                let scheduler = &ctx.scheduler;
                queue.extend(collisions_from(left, region, &ctx.index, &ctx.residents, |r| {
                    scheduler.is_finished(r)
                }));
            }
        }
        debug!(region, collisions = queue.len(), "Collision search done");

        let mut review = RegionReview::default();
        while let Some(collision) = queue.pop_front() {
            self.maybe_yield(cancel).await?;
            let merged = self
                .review_collision(ctx, collision, &mut review, cancel)
                .await?;
            let Some((keep, discard)) = merged else {
                continue;
            };

            // The kept record was rewritten; search its pairings again
            queue.retain(|c| !c.involves(keep) && !c.involves(discard));
            let scheduler = &ctx.scheduler;
            let rewritten = collisions_involving(keep, region, &ctx.index, &ctx.residents, |r| {
                scheduler.is_finished(r)
            });
            debug!(region, keep, collisions = rewritten.len(), "Merged record searched again");
            queue.extend(rewritten);
        }

        self.commit_region(ctx, region, review).await
    }

    /// Fetch, code, persist and index one region
    async fn load_region(
        &mut self,
        ctx: &mut PassContext,
        region: RegionId,
        cancel: &CancellationToken,
    ) -> ConsolidationResult<()> {
        let fetched = self.source.fetch_localities_by_region(region).await?;

        let mut prepared = Vec::with_capacity(fetched.len());
        for locality in fetched {
            // Already resident under another region, e.g. after a merge
            if ctx.residents.contains_key(&locality.id) {
                continue;
            }
            prepared.push(self.prepare(region, locality));
            self.maybe_yield(cancel).await?;
        }

        let localities: Vec<PendingLocality> = prepared.iter().map(|r| r.locality.clone()).collect();
        self.work_store.load_region(region, &localities).await?;

        for resident in prepared {
            admit(ctx, resident);
        }
        ctx.scheduler.on_region_loaded(region);

        debug!(region, localities = localities.len(), "Region loaded");
        Ok(())
    }

    /// Code a locality's words for residence under `region`
    fn prepare(&self, region: RegionId, mut locality: PendingLocality) -> ResidentLocality {
        let words = code_locality(self.coder.as_ref(), &locality, self.settings.min_word_len);
        locality.phonetic_codes = words.iter().map(|w| w.code.clone()).collect();
        ResidentLocality {
            locality,
            region,
            words,
        }
    }

    /// Ask the reviewer about one collision; returns `(keep, discard)` after a merge
    async fn review_collision(
        &mut self,
        ctx: &mut PassContext,
        collision: Collision,
        review: &mut RegionReview,
        cancel: &CancellationToken,
    ) -> ConsolidationResult<Option<(LocalityId, LocalityId)>> {
        // Either side may have been merged away since the search
        let (Some(left), Some(right)) = (
            ctx.residents.get(&collision.left),
            ctx.residents.get(&collision.right),
        ) else {
            debug!(left = collision.left, right = collision.right, "Collision partner merged away");
            return Ok(None);
        };
        let first_look = review.seen.insert((collision.left, collision.right));

        let mut undecided = Vec::new();
        for candidate in collision.candidates {
            if review.excludes(&candidate.left, &candidate.right) {
                continue;
            }
            if self
                .exclusions
                .is_excluded(&candidate.left, &candidate.right)
                .await?
            {
                continue;
            }
            undecided.push(candidate);
        }

        if undecided.is_empty() {
            if first_look {
                ctx.record.collisions_suppressed += 1;
            }
            debug!(
                left = collision.left,
                right = collision.right,
                "Every candidate already excluded, not asking"
            );
            return Ok(None);
        }

        let proposal = MatchProposal {
            left: left.locality.clone(),
            right: right.locality.clone(),
            candidates: undecided.clone(),
        };
        let (left_id, right_id) = (proposal.left.id, proposal.right.id);

        self.transition_to(DriverState::AwaitingReview);
        ctx.record.proposals_offered += 1;
        debug!(left = left_id, right = right_id, candidates = undecided.len(), "Proposing match");

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConsolidationError::Cancelled),
            decision = self.reviewer.propose_match(proposal) => decision?,
        };
        self.transition_to(DriverState::Traversing);

        match decision {
            ReviewDecision::Different => {
                debug!(left = left_id, right = right_id, "Reviewer: different");
                review
                    .exclusions
                    .extend(undecided.into_iter().map(|c| (c.left, c.right)));
                Ok(None)
            }
            ReviewDecision::Same { merged } => {
                debug!(left = left_id, right = right_id, keep = merged.id, "Reviewer: same");
                let discard_id = if merged.id == left_id {
                    right_id
                } else if merged.id == right_id {
                    left_id
                } else {
                    return Err(ReviewerError::Failed(format!(
                        "merged record id {} is neither {} nor {}",
                        merged.id, left_id, right_id
                    ))
                    .into());
                };
                let keep_id = merged.id;
                let synonyms: Vec<(SeriesPair, SeriesPair)> =
                    undecided.into_iter().map(|c| (c.left, c.right)).collect();
                self.apply_merge(ctx, merged, discard_id, &synonyms).await?;
                Ok(Some((keep_id, discard_id)))
            }
        }
    }

    async fn apply_merge(
        &mut self,
        ctx: &mut PassContext,
        merged: PendingLocality,
        discard_id: LocalityId,
        synonyms: &[(SeriesPair, SeriesPair)],
    ) -> ConsolidationResult<()> {
        let Some(discard) = ctx.residents.get(&discard_id).map(|r| r.locality.clone()) else {
            return Ok(());
        };
        let keep_region = ctx
            .residents
            .get(&merged.id)
            .map(|r| r.region)
            .unwrap_or(merged.geo_id);

        let resident = self.prepare(keep_region, merged);

        self.exclusions.record_synonyms(synonyms).await?;
        self.work_store
            .apply_merge(&resident.locality, &discard)
            .await?;
        self.merge_writer
            .merge_localities(&resident.locality, &discard)
            .await?;
        self.work_store.clear_pending_merge().await?;

        ctx.index.deindex_locality(discard_id);
        ctx.residents.remove(&discard_id);
        ctx.record.merges += 1;

        info!(
            keep = resident.locality.id,
            discard = discard_id,
            synonyms = synonyms.len(),
            "Localities merged"
        );
        admit(ctx, resident);
        Ok(())
    }

    async fn commit_region(
        &mut self,
        ctx: &mut PassContext,
        region: RegionId,
        review: RegionReview,
    ) -> ConsolidationResult<()> {
        self.exclusions.record_exclusions(&review.exclusions).await?;
        ctx.record.exclusions_recorded += review.exclusions.len() as u64;

        let evicted = ctx.scheduler.on_region_finished(region);
        evict(ctx, &evicted);
        ctx.record.regions_finished += 1;

        let spill = ctx.index.take_spill();
        self.work_store
            .commit_region(&ctx.record, &ctx.scheduler.snapshot(), &evicted, &spill)
            .await?;

        info!(
            region,
            finished = ctx.record.regions_finished,
            total = ctx.record.regions_total,
            exclusions = review.exclusions.len(),
            evicted = evicted.len(),
            resident = ctx.scheduler.loaded_count(),
            "Region committed"
        );
        Ok(())
    }

    async fn drain(&mut self, mut ctx: PassContext) -> ConsolidationResult<PassSummary> {
        self.transition_to(DriverState::Draining);

        let evicted = ctx.scheduler.drain();
        evict(&mut ctx, &evicted);
        if !ctx.index.is_empty() || !ctx.residents.is_empty() {
            warn!(
                codes = ctx.index.len(),
                residents = ctx.residents.len(),
                "Localities left resident after draining"
            );
            let leftover: Vec<LocalityId> = ctx.residents.keys().copied().collect();
            for id in leftover {
                ctx.index.deindex_locality(id);
                ctx.residents.remove(&id);
            }
        }

        let spill = ctx.index.take_spill();
        self.work_store
            .finish_pass(&ctx.scheduler.snapshot(), &evicted, &spill)
            .await?;

        self.transition_to(DriverState::Idle);
        let summary = PassSummary::from(&ctx.record);
        info!(
            pass_id = %summary.pass_id,
            regions = summary.regions_processed,
            proposals = summary.proposals_offered,
            suppressed = summary.collisions_suppressed,
            merges = summary.merges,
            exclusions = summary.exclusions_recorded,
            peak_resident = summary.peak_resident_regions,
            "Consolidation pass complete"
        );
        Ok(summary)
    }

    async fn maybe_yield(&mut self, cancel: &CancellationToken) -> ConsolidationResult<()> {
        if self.yielder.tick() {
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                return Err(ConsolidationError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Index a prepared locality and make it resident
fn admit(ctx: &mut PassContext, resident: ResidentLocality) {
    ctx.index.index_locality(&resident.locality);
    ctx.residents.insert(resident.locality.id, resident);
}

/// Remove the localities of evicted regions from the resident set and index
fn evict(ctx: &mut PassContext, evicted: &[RegionId]) {
    if evicted.is_empty() {
        return;
    }
    let gone: Vec<LocalityId> = ctx
        .residents
        .values()
        .filter(|r| evicted.contains(&r.region))
        .map(|r| r.locality.id)
        .collect();
    for id in gone {
        ctx.index.deindex_locality(id);
        ctx.residents.remove(&id);
    }
}

fn log_asymmetries(graph: &AdjacencyGraph) {
    let violations = graph.validate_symmetry();
    for v in &violations {
        warn!(from = v.from, to = v.to, "Asymmetric adjacency entry");
    }
    if !violations.is_empty() {
        warn!(violations = violations.len(), "Adjacency data is not symmetric");
    }
}
