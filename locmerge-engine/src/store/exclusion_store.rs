//! Synonym/exclusion store
//!
//! Reviewer decisions are kept in the exclusion keyspace under
//! `series:{phonetic series}`. Each entry lists links from a concrete word
//! series filed under that phonetic series to a peer series pair, tagged as
//! synonym or exclusion. Every decision writes both halves of the link in one
//! transaction, so the relation stays symmetric on disk.

use super::kv::{KvKey, KvStore};
use crate::utils::retry_on_lock;
use locmerge_common::{Result, SeriesPair};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const SERIES_PREFIX: &str = "series:";

fn series_key(phonetic_key: &str) -> KvKey {
    KvKey::Str(format!("{}{}", SERIES_PREFIX, phonetic_key))
}

/// Kind of reviewer decision recorded between two series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesRelation {
    /// Judged to name the same place; never suppresses a match
    Synonym,
    /// Judged different; the pairing is never offered again
    Excluded,
}

/// One half of a recorded decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesLink {
    /// Word series of the owning side
    pub words: Vec<String>,
    pub peer: SeriesPair,
    pub relation: SeriesRelation,
}

/// Exclusion keyspace accessor
#[derive(Clone)]
pub struct ExclusionStore {
    kv: KvStore,
    max_lock_wait_ms: u64,
}

impl ExclusionStore {
    pub fn new(kv: KvStore, max_lock_wait_ms: u64) -> Self {
        Self {
            kv,
            max_lock_wait_ms,
        }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// Record the reviewer's answer for one pairing
    ///
    /// `equivalent` stores a synonym link, otherwise an exclusion. A later
    /// decision on the same pairing replaces the earlier one.
    pub async fn record_decision(&self, a: &SeriesPair, b: &SeriesPair, equivalent: bool) -> Result<()> {
        let relation = if equivalent {
            SeriesRelation::Synonym
        } else {
            SeriesRelation::Excluded
        };
        self.write_links("exclusion_record_decision", &[(a, b, relation)])
            .await
    }

    /// Record several exclusions in one transaction
    pub async fn record_exclusions(&self, pairs: &[(SeriesPair, SeriesPair)]) -> Result<()> {
        self.record_region(pairs, &[]).await
    }

    /// Record several synonyms in one transaction
    pub async fn record_synonyms(&self, pairs: &[(SeriesPair, SeriesPair)]) -> Result<()> {
        self.record_region(&[], pairs).await
    }

    /// Record exclusions and synonyms together, atomically
    pub async fn record_region(
        &self,
        exclusions: &[(SeriesPair, SeriesPair)],
        synonyms: &[(SeriesPair, SeriesPair)],
    ) -> Result<()> {
        let decisions: Vec<(&SeriesPair, &SeriesPair, SeriesRelation)> = exclusions
            .iter()
            .map(|(a, b)| (a, b, SeriesRelation::Excluded))
            .chain(synonyms.iter().map(|(a, b)| (a, b, SeriesRelation::Synonym)))
            .collect();
        if decisions.is_empty() {
            return Ok(());
        }
        self.write_links("exclusion_record_region", &decisions).await
    }

    async fn write_links(
        &self,
        caller: &'static str,
        decisions: &[(&SeriesPair, &SeriesPair, SeriesRelation)],
    ) -> Result<()> {
        let halves: Vec<(String, SeriesLink)> = decisions
            .iter()
            .flat_map(|&(a, b, relation)| [half(a, b, relation), half(b, a, relation)])
            .collect();

        let kv = &self.kv;
        let halves_ref = &halves;
        retry_on_lock(caller, self.max_lock_wait_ms, move || async move {
            let mut tx = kv.begin(caller).await?;

            // Both halves often share one phonetic series; merge per key first
            let mut by_key: BTreeMap<&str, Vec<SeriesLink>> = BTreeMap::new();
            for (key, link) in halves_ref {
                if !by_key.contains_key(key.as_str()) {
                    let existing: Vec<SeriesLink> = tx.get(series_key(key)).await?.unwrap_or_default();
                    by_key.insert(key.as_str(), existing);
                }
                if let Some(links) = by_key.get_mut(key.as_str()) {
                    upsert_link(links, link.clone());
                }
            }

            for (key, links) in &by_key {
                tx.put(series_key(key), links).await?;
            }

            tx.commit().await
        })
        .await?;

        debug!(caller, decisions = decisions.len(), "Recorded series decisions");
        Ok(())
    }

    /// Whether `a` and `b` were judged different; symmetric in its arguments
    pub async fn is_excluded(&self, a: &SeriesPair, b: &SeriesPair) -> Result<bool> {
        if self.has_link(a, b, SeriesRelation::Excluded).await? {
            return Ok(true);
        }
        self.has_link(b, a, SeriesRelation::Excluded).await
    }

    async fn has_link(&self, owner: &SeriesPair, peer: &SeriesPair, relation: SeriesRelation) -> Result<bool> {
        let links = self.links_for_key(&owner.key()).await?;
        Ok(links
            .iter()
            .any(|l| l.relation == relation && l.words == owner.word_series && &l.peer == peer))
    }

    /// Series pairs recorded as different from `pair`
    pub async fn exclusions_of(&self, pair: &SeriesPair) -> Result<Vec<SeriesPair>> {
        self.peers(pair, SeriesRelation::Excluded).await
    }

    /// Series pairs recorded as naming the same place as `pair`
    pub async fn synonyms_of(&self, pair: &SeriesPair) -> Result<Vec<SeriesPair>> {
        self.peers(pair, SeriesRelation::Synonym).await
    }

    async fn peers(&self, pair: &SeriesPair, relation: SeriesRelation) -> Result<Vec<SeriesPair>> {
        let links = self.links_for_key(&pair.key()).await?;
        Ok(links
            .into_iter()
            .filter(|l| l.relation == relation && l.words == pair.word_series)
            .map(|l| l.peer)
            .collect())
    }

    /// Every link filed under a phonetic series key (codes space-joined, sorted)
    pub async fn links_for_key(&self, phonetic_key: &str) -> Result<Vec<SeriesLink>> {
        Ok(self.kv.get(series_key(phonetic_key)).await?.unwrap_or_default())
    }
}

fn half(owner: &SeriesPair, peer: &SeriesPair, relation: SeriesRelation) -> (String, SeriesLink) {
    (
        owner.key(),
        SeriesLink {
            words: owner.word_series.clone(),
            peer: peer.clone(),
            relation,
        },
    )
}

fn upsert_link(links: &mut Vec<SeriesLink>, link: SeriesLink) {
    match links
        .iter_mut()
        .find(|l| l.words == link.words && l.peer == link.peer)
    {
        Some(existing) => existing.relation = link.relation,
        None => links.push(link),
    }
}
