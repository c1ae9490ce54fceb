//! Phonetic index over the resident localities
//!
//! Maps each phonetic code to the localities holding a word with that code.
//! A code's reference count is the number of such localities, not of words,
//! and a code whose count reaches zero is removed on the spot. Codes changed
//! since the last commit are tracked so they can be spilled to the work
//! keyspace.

use crate::store::PhoneticSpill;
use locmerge_common::{LocalityId, PendingLocality};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
struct IndexEntry {
    locality_ids: BTreeSet<LocalityId>,
    ref_count: u32,
}

#[derive(Debug, Default)]
pub struct PhoneticIndex {
    entries: HashMap<String, IndexEntry>,
    codes_by_locality: HashMap<LocalityId, BTreeSet<String>>,
    dirty: BTreeSet<String>,
}

impl PhoneticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `locality` under each of its distinct codes
    ///
    /// A locality already indexed is first removed, so re-indexing after a
    /// merge replaces the old registration.
    pub fn index_locality(&mut self, locality: &PendingLocality) {
        self.deindex_locality(locality.id);

        let codes: BTreeSet<String> = locality.phonetic_codes.iter().cloned().collect();
        for code in &codes {
            let entry = self.entries.entry(code.clone()).or_default();
            if entry.locality_ids.insert(locality.id) {
                entry.ref_count += 1;
            }
            self.dirty.insert(code.clone());
        }
        self.codes_by_locality.insert(locality.id, codes);
    }

    /// Drop `locality` from every code it holds; returns whether it was indexed
    pub fn deindex_locality(&mut self, locality: LocalityId) -> bool {
        let Some(codes) = self.codes_by_locality.remove(&locality) else {
            return false;
        };

        for code in codes {
            if let Some(entry) = self.entries.get_mut(&code) {
                if entry.locality_ids.remove(&locality) {
                    entry.ref_count = entry.ref_count.saturating_sub(1);
                }
                if entry.ref_count == 0 {
                    self.entries.remove(&code);
                }
            }
            self.dirty.insert(code);
        }
        true
    }

    /// Localities holding `code`
    pub fn candidates_for(&self, code: &str) -> Option<&BTreeSet<LocalityId>> {
        self.entries.get(code).map(|e| &e.locality_ids)
    }

    pub fn ref_count(&self, code: &str) -> u32 {
        self.entries.get(code).map_or(0, |e| e.ref_count)
    }

    pub fn codes_of(&self, locality: LocalityId) -> Option<&BTreeSet<String>> {
        self.codes_by_locality.get(&locality)
    }

    pub fn contains_locality(&self, locality: LocalityId) -> bool {
        self.codes_by_locality.contains_key(&locality)
    }

    /// Number of live codes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn locality_count(&self) -> usize {
        self.codes_by_locality.len()
    }

    /// Changes since the last call, for the work keyspace
    pub fn take_spill(&mut self) -> Vec<PhoneticSpill> {
        std::mem::take(&mut self.dirty)
            .into_iter()
            .map(|code| {
                let ids = self
                    .entries
                    .get(&code)
                    .map(|e| e.locality_ids.iter().copied().collect());
                (code, ids)
            })
            .collect()
    }

    /// Forget everything, including pending spill
    pub fn clear(&mut self) {
        self.entries.clear();
        self.codes_by_locality.clear();
        self.dirty.clear();
    }
}
