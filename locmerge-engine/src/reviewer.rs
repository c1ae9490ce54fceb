//! Reviewer collaborator
//!
//! The reviewer (normally a person behind a UI) decides whether two
//! localities name the same place. `ChannelReviewer` forwards proposals over a
//! tokio channel so the host can answer them from another task.

use crate::matcher::CandidatePair;
use async_trait::async_trait;
use locmerge_common::PendingLocality;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Two localities and the word runs that made them collide
#[derive(Debug, Clone)]
pub struct MatchProposal {
    pub left: PendingLocality,
    pub right: PendingLocality,
    /// Run pairs not yet decided
    pub candidates: Vec<CandidatePair>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewDecision {
    /// Same place; `merged` is the record to keep, carrying the id of
    /// either the left or the right locality
    Same { merged: PendingLocality },
    Different,
}

#[derive(Debug, Error)]
pub enum ReviewerError {
    #[error("Reviewer disconnected")]
    Disconnected,

    #[error("Reviewer failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Wait, without timeout, for a decision on one proposal
    async fn propose_match(&self, proposal: MatchProposal) -> Result<ReviewDecision, ReviewerError>;
}

/// A proposal waiting for an answer on the host side
#[derive(Debug)]
pub struct ReviewRequest {
    pub proposal: MatchProposal,
    reply: oneshot::Sender<ReviewDecision>,
}

impl ReviewRequest {
    /// Answer the proposal; false if the driver stopped waiting
    pub fn respond(self, decision: ReviewDecision) -> bool {
        self.reply.send(decision).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct ChannelReviewer {
    tx: mpsc::Sender<ReviewRequest>,
}

/// Reviewer plus the receiving end the host answers from
pub fn review_channel(buffer: usize) -> (ChannelReviewer, mpsc::Receiver<ReviewRequest>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (ChannelReviewer { tx }, rx)
}

#[async_trait]
impl Reviewer for ChannelReviewer {
    async fn propose_match(&self, proposal: MatchProposal) -> Result<ReviewDecision, ReviewerError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(ReviewRequest { proposal, reply })
            .await
            .map_err(|_| ReviewerError::Disconnected)?;
        answer.await.map_err(|_| ReviewerError::Disconnected)
    }
}
