//! Interrupted passes over file-backed stores
//!
//! A pass stopped by a reviewer failure or cancellation and then resumed
//! must end with the same recorded decisions as an uninterrupted pass.

mod helpers;

use helpers::{
    build_driver, build_driver_with_writer, chain_localities, chain_regions, decision_set,
    line_graph, source, twin_localities, Answer, FlakyMergeWriter, ScriptedReviewer, STATE_ID,
};
use locmerge_common::config::StatePaths;
use locmerge_engine::phonetic::{all_coders, coder_by_name, PhoneticCoder};
use locmerge_engine::store::open_stores;
use locmerge_engine::{ConsolidationError, Domain, MergeWriter, PassSummary, ReviewerError};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn stores_at(dir: &Path) -> (locmerge_engine::store::WorkStore, locmerge_engine::store::ExclusionStore) {
    open_stores(&StatePaths::new(dir), 1000).await.unwrap()
}

/// Uninterrupted reference pass; returns its summary and recorded decisions
async fn reference_pass(
    coder: &Arc<dyn PhoneticCoder>,
) -> (
    PassSummary,
    std::collections::BTreeSet<(String, Vec<String>, Vec<String>, Vec<String>, bool)>,
) {
    let dir = TempDir::new().unwrap();
    let stores = stores_at(dir.path()).await;
    let src = source(line_graph(&chain_regions()), chain_localities());
    let reviewer = Arc::new(ScriptedReviewer::always_different());
    let mut driver = build_driver(&src, &reviewer, &stores, coder);

    let summary = driver
        .start_pass(Domain::State(STATE_ID), &CancellationToken::new())
        .await
        .unwrap();
    let decisions = decision_set(&stores.1).await;
    (summary, decisions)
}

#[tokio::test]
async fn test_resume_after_reviewer_disconnect_matches_uninterrupted() {
    for coder in all_coders() {
        let (reference, reference_decisions) = reference_pass(&coder).await;
        assert_eq!(reference.proposals_offered, 5);

        let dir = TempDir::new().unwrap();
        let src = source(line_graph(&chain_regions()), chain_localities());

        {
            let stores = stores_at(dir.path()).await;
            let reviewer = Arc::new(ScriptedReviewer::always_different().failing_after(2));
            let mut driver = build_driver(&src, &reviewer, &stores, &coder);

            let err = driver
                .start_pass(Domain::State(STATE_ID), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ConsolidationError::Reviewer(ReviewerError::Disconnected)));
            assert!(err.is_resumable());

            // Counties 101 and 102 were committed before the third proposal
            let stored = stores.0.load_pass().await.unwrap().unwrap();
            assert_eq!(stored.regions_finished, 2);
            assert_eq!(stored.proposals_offered, 2);
            stores.0.kv().close().await;
            stores.1.kv().close().await;
        }

        // Reopen from disk, as after a restart
        let stores = stores_at(dir.path()).await;
        let reviewer = Arc::new(ScriptedReviewer::always_different());
        let mut driver = build_driver(&src, &reviewer, &stores, &coder);
        assert!(driver.has_resumable_pass().await.unwrap());

        let summary = driver.resume_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.resumes, 1);
        assert_eq!(summary.regions_processed, reference.regions_processed);
        assert_eq!(summary.proposals_offered, reference.proposals_offered);
        assert_eq!(summary.exclusions_recorded, reference.exclusions_recorded);
        // The county that was interrupted is asked about again
        assert_eq!(reviewer.proposal_count(), 3);

        assert_eq!(decision_set(&stores.1).await, reference_decisions);
        assert!(!driver.has_resumable_pass().await.unwrap());
        assert_eq!(stores.0.resident_locality_count().await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_cancel_during_review_then_resume() {
    for coder in all_coders() {
        let (reference, reference_decisions) = reference_pass(&coder).await;

        let dir = TempDir::new().unwrap();
        let stores = stores_at(dir.path()).await;
        let src = source(line_graph(&chain_regions()), chain_localities());

        let cancel = CancellationToken::new();
        let reviewer = Arc::new(ScriptedReviewer::always_different().cancelling_after(3, cancel.clone()));
        let mut driver = build_driver(&src, &reviewer, &stores, &coder);

        let err = driver
            .start_pass(Domain::State(STATE_ID), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::Cancelled));
        assert_eq!(stores.0.load_pass().await.unwrap().unwrap().regions_finished, 3);

        let reviewer = Arc::new(ScriptedReviewer::always_different());
        let mut driver = build_driver(&src, &reviewer, &stores, &coder);
        let summary = driver.resume_pass(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.regions_processed, reference.regions_processed);
        assert_eq!(summary.proposals_offered, reference.proposals_offered);
        assert_eq!(reviewer.proposal_count(), 2);
        assert_eq!(decision_set(&stores.1).await, reference_decisions);
    }
}

#[tokio::test]
async fn test_cancel_before_first_region() {
    for coder in all_coders() {
        let dir = TempDir::new().unwrap();
        let stores = stores_at(dir.path()).await;
        let src = source(line_graph(&chain_regions()), chain_localities());
        let reviewer = Arc::new(ScriptedReviewer::always_different());
        let mut driver = build_driver(&src, &reviewer, &stores, &coder);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = driver
            .start_pass(Domain::State(STATE_ID), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::Cancelled));
        assert!(src.fetched_regions().await.is_empty());

        let stored = stores.0.load_pass().await.unwrap().unwrap();
        assert_eq!(stored.regions_finished, 0);
        assert_eq!(stored.regions_total, 6);

        let summary = driver.resume_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.regions_processed, 6);
        assert_eq!(summary.proposals_offered, 5);
        assert_eq!(summary.resumes, 1);
    }
}

#[tokio::test]
async fn test_resume_uses_coder_the_pass_started_with() {
    let dir = TempDir::new().unwrap();
    let stores = stores_at(dir.path()).await;
    let src = source(line_graph(&chain_regions()), chain_localities());
    let reviewer = Arc::new(ScriptedReviewer::always_different());
    let soundex = coder_by_name("soundex").unwrap();
    let exact = coder_by_name("exact").unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut first = build_driver(&src, &reviewer, &stores, &soundex);
    assert!(first.start_pass(Domain::State(STATE_ID), &cancel).await.is_err());

    let mut second = build_driver(&src, &reviewer, &stores, &exact);
    let summary = second.resume_pass(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.coder().name(), "soundex");
    assert_eq!(summary.regions_processed, 6);
}

#[tokio::test]
async fn test_second_interruption_counts_resumes() {
    let coder = all_coders().remove(0);
    let dir = TempDir::new().unwrap();
    let stores = stores_at(dir.path()).await;
    let src = source(line_graph(&chain_regions()), chain_localities());

    let failing = Arc::new(ScriptedReviewer::always_different().failing_after(1));
    let mut driver = build_driver(&src, &failing, &stores, &coder);
    assert!(driver
        .start_pass(Domain::State(STATE_ID), &CancellationToken::new())
        .await
        .is_err());

    let failing = Arc::new(ScriptedReviewer::always_different().failing_after(1));
    let mut driver = build_driver(&src, &failing, &stores, &coder);
    assert!(driver.resume_pass(&CancellationToken::new()).await.is_err());
    assert_eq!(stores.0.load_pass().await.unwrap().unwrap().resumes, 1);

    let reviewer = Arc::new(ScriptedReviewer::always_different());
    let mut driver = build_driver(&src, &reviewer, &stores, &coder);
    let summary = driver.resume_pass(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.resumes, 2);
    assert_eq!(summary.regions_processed, 6);
    assert_eq!(summary.proposals_offered, 5);
}

/// Uninterrupted pass over the twin counties, merging every proposal
async fn merging_reference(
    coder: &Arc<dyn PhoneticCoder>,
) -> std::collections::BTreeSet<(String, Vec<String>, Vec<String>, Vec<String>, bool)> {
    let dir = TempDir::new().unwrap();
    let stores = stores_at(dir.path()).await;
    let src = source(line_graph(&[101, 102]), twin_localities());
    let reviewer = Arc::new(ScriptedReviewer::answering(Answer::KeepLeft));
    let mut driver = build_driver(&src, &reviewer, &stores, coder);

    let summary = driver
        .start_pass(Domain::State(STATE_ID), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.merges, 2);
    decision_set(&stores.1).await
}

fn ids(localities: &[locmerge_common::PendingLocality]) -> Vec<i64> {
    localities.iter().map(|l| l.id).collect()
}

#[tokio::test]
async fn test_merge_then_disconnect_in_same_region_keeps_synonym() {
    for coder in all_coders() {
        let reference = merging_reference(&coder).await;
        // One link per synonym: both halves share the word series
        assert_eq!(reference.len(), 2);

        let dir = TempDir::new().unwrap();
        let stores = stores_at(dir.path()).await;
        let src = source(line_graph(&[101, 102]), twin_localities());

        let reviewer = Arc::new(ScriptedReviewer::answering(Answer::KeepLeft).failing_after(1));
        let mut driver = build_driver(&src, &reviewer, &stores, &coder);
        let err = driver
            .start_pass(Domain::State(STATE_ID), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::Reviewer(ReviewerError::Disconnected)));

        // The first merge is durable together with its synonym
        assert_eq!(ids(&src.localities().await), vec![1, 2, 4]);
        let first = &reviewer.proposals()[0].candidates[0];
        assert_eq!(
            stores.1.synonyms_of(&first.left).await.unwrap(),
            vec![first.right.clone()]
        );
        assert_eq!(stores.0.load_pass().await.unwrap().unwrap().merges, 1);

        let reviewer = Arc::new(ScriptedReviewer::answering(Answer::KeepLeft));
        let mut driver = build_driver(&src, &reviewer, &stores, &coder);
        let summary = driver.resume_pass(&CancellationToken::new()).await.unwrap();

        assert_eq!(reviewer.proposal_count(), 1);
        assert_eq!(summary.merges, 2);
        assert_eq!(ids(&src.localities().await), vec![1, 2]);
        assert_eq!(decision_set(&stores.1).await, reference);
    }
}

#[tokio::test]
async fn test_failed_merge_write_is_replayed_on_resume() {
    for coder in all_coders() {
        let reference = merging_reference(&coder).await;

        let dir = TempDir::new().unwrap();
        let stores = stores_at(dir.path()).await;
        let src = source(line_graph(&[101, 102]), twin_localities());
        let writer: Arc<dyn MergeWriter> = Arc::new(FlakyMergeWriter::failing_first(&src, 1));

        let reviewer = Arc::new(ScriptedReviewer::answering(Answer::KeepLeft));
        let mut driver = build_driver_with_writer(&src, &reviewer, &stores, &coder, writer.clone());
        let err = driver
            .start_pass(Domain::State(STATE_ID), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::Storage(_)));
        assert!(err.is_resumable());

        // The work keyspace took the merge, the source did not
        let pending = stores.0.pending_merge().await.unwrap().unwrap();
        assert_eq!((pending.keep.id, pending.discard.id), (1, 3));
        assert!(stores.0.locality(3).await.unwrap().is_none());
        assert_eq!(ids(&src.localities().await), vec![1, 2, 3, 4]);

        let reviewer = Arc::new(ScriptedReviewer::answering(Answer::KeepLeft));
        let mut driver = build_driver_with_writer(&src, &reviewer, &stores, &coder, writer);
        let summary = driver.resume_pass(&CancellationToken::new()).await.unwrap();

        assert!(stores.0.pending_merge().await.unwrap().is_none());
        assert_eq!(ids(&src.localities().await), vec![1, 2]);
        assert_eq!(summary.merges, 2);
        // Locality 3 is gone, so only the second pairing is asked about
        assert_eq!(reviewer.proposal_count(), 1);
        assert_eq!(reviewer.proposals()[0].left.id, 2);
        assert_eq!(decision_set(&stores.1).await, reference);
    }
}

#[tokio::test]
async fn test_abandon_finishes_pending_merge() {
    let coder = coder_by_name("exact").unwrap();
    let dir = TempDir::new().unwrap();
    let stores = stores_at(dir.path()).await;
    let src = source(line_graph(&[101, 102]), twin_localities());
    let writer: Arc<dyn MergeWriter> = Arc::new(FlakyMergeWriter::failing_first(&src, 1));

    let reviewer = Arc::new(ScriptedReviewer::answering(Answer::KeepLeft));
    let mut driver = build_driver_with_writer(&src, &reviewer, &stores, &coder, writer);
    assert!(driver
        .start_pass(Domain::State(STATE_ID), &CancellationToken::new())
        .await
        .is_err());

    assert!(driver.abandon_pass().await.unwrap().is_some());
    assert!(stores.0.pending_merge().await.unwrap().is_none());
    assert!(!driver.has_resumable_pass().await.unwrap());
    assert_eq!(ids(&src.localities().await), vec![1, 2, 4]);
}
