//! Collision search between resident localities
//!
//! Two localities collide when they share a phonetic code. Each collision is
//! reduced to candidate run pairs: runs of adjacent words, one per locality,
//! whose sorted codes are equal. Only maximal run pairs are kept, i.e. pairs
//! not contained (on both sides) in a longer pair already found.

use crate::index::PhoneticIndex;
use crate::phonetic::CodedWord;
use locmerge_common::{LocalityId, PendingLocality, RegionId, SeriesPair};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A locality held in the work set, with the region it is filed under
#[derive(Debug, Clone)]
pub struct ResidentLocality {
    pub locality: PendingLocality,
    pub region: RegionId,
    pub words: Vec<CodedWord>,
}

/// Matching word runs, one per side
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidatePair {
    pub left: SeriesPair,
    pub right: SeriesPair,
}

/// Two localities with at least one candidate run pair
#[derive(Debug, Clone, PartialEq)]
pub struct Collision {
    pub left: LocalityId,
    pub right: LocalityId,
    pub candidates: Vec<CandidatePair>,
}

impl Collision {
    pub fn involves(&self, id: LocalityId) -> bool {
        self.left == id || self.right == id
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    left_start: usize,
    right_start: usize,
    len: usize,
}

impl Window {
    fn contains(&self, left_start: usize, right_start: usize, len: usize) -> bool {
        self.left_start <= left_start
            && left_start + len <= self.left_start + self.len
            && self.right_start <= right_start
            && right_start + len <= self.right_start + self.len
    }
}

/// Maximal runs of adjacent words with equal sorted codes
pub fn matching_runs(left: &[CodedWord], right: &[CodedWord]) -> Vec<CandidatePair> {
    let left_codes: HashSet<&str> = left.iter().map(|w| w.code.as_str()).collect();
    let shared: HashSet<&str> = right
        .iter()
        .map(|w| w.code.as_str())
        .filter(|c| left_codes.contains(c))
        .collect();
    if shared.is_empty() {
        return Vec::new();
    }

    // A run can only span words whose codes both sides hold
    let left_usable: Vec<bool> = left.iter().map(|w| shared.contains(w.code.as_str())).collect();
    let right_usable: Vec<bool> = right.iter().map(|w| shared.contains(w.code.as_str())).collect();
    let longest = longest_usable(&left_usable).min(longest_usable(&right_usable));

    let mut found: Vec<Window> = Vec::new();
    for len in (1..=longest).rev() {
        let mut right_by_key: HashMap<Vec<&str>, Vec<usize>> = HashMap::new();
        for start in usable_starts(&right_usable, len) {
            right_by_key
                .entry(sorted_codes(&right[start..start + len]))
                .or_default()
                .push(start);
        }
        if right_by_key.is_empty() {
            continue;
        }

        let mut this_len = Vec::new();
        for left_start in usable_starts(&left_usable, len) {
            let key = sorted_codes(&left[left_start..left_start + len]);
            let Some(right_starts) = right_by_key.get(&key) else {
                continue;
            };
            for &right_start in right_starts {
                if found.iter().any(|w| w.contains(left_start, right_start, len)) {
                    continue;
                }
                this_len.push(Window {
                    left_start,
                    right_start,
                    len,
                });
            }
        }
        found.extend(this_len);
    }

    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|w| CandidatePair {
            left: series(&left[w.left_start..w.left_start + w.len]),
            right: series(&right[w.right_start..w.right_start + w.len]),
        })
        .filter(|pair| seen.insert(pair.clone()))
        .collect()
}

fn longest_usable(usable: &[bool]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for &u in usable {
        current = if u { current + 1 } else { 0 };
        longest = longest.max(current);
    }
    longest
}

fn usable_starts(usable: &[bool], len: usize) -> impl Iterator<Item = usize> + '_ {
    (0..usable.len().saturating_sub(len - 1))
        .filter(move |&start| usable[start..start + len].iter().all(|&u| u))
}

fn sorted_codes(words: &[CodedWord]) -> Vec<&str> {
    let mut codes: Vec<&str> = words.iter().map(|w| w.code.as_str()).collect();
    codes.sort_unstable();
    codes
}

fn series(words: &[CodedWord]) -> SeriesPair {
    SeriesPair::new(
        words.iter().map(|w| w.word.clone()).collect(),
        words.iter().map(|w| w.code.clone()).collect(),
    )
}

/// Localities filed under `region`, ordered by id
pub fn region_members(region: RegionId, residents: &HashMap<LocalityId, ResidentLocality>) -> Vec<LocalityId> {
    let mut ids: Vec<LocalityId> = residents
        .values()
        .filter(|r| r.region == region)
        .map(|r| r.locality.id)
        .collect();
    ids.sort_unstable();
    ids
}

fn partners_of(id: LocalityId, index: &PhoneticIndex) -> BTreeSet<LocalityId> {
    let Some(codes) = index.codes_of(id) else {
        return BTreeSet::new();
    };
    codes
        .iter()
        .filter_map(|code| index.candidates_for(code))
        .flatten()
        .copied()
        .filter(|&partner| partner != id)
        .collect()
}

fn collision(left: &ResidentLocality, right: &ResidentLocality) -> Option<Collision> {
    let candidates = matching_runs(&left.words, &right.words);
    if candidates.is_empty() {
        return None;
    }
    Some(Collision {
        left: left.locality.id,
        right: right.locality.id,
        candidates,
    })
}

/// Collisions with `left`, a locality of `region`, on the left side
///
/// Partners filed under finished regions are skipped, their pairings having
/// been examined when that region was processed. A partner inside `region`
/// is only paired with a lower-id `left`, so calling this for every member
/// reports each pair once.
pub fn collisions_from<F>(
    left: &ResidentLocality,
    region: RegionId,
    index: &PhoneticIndex,
    residents: &HashMap<LocalityId, ResidentLocality>,
    is_finished: F,
) -> Vec<Collision>
where
    F: Fn(RegionId) -> bool,
{
    let mut collisions = Vec::new();
    for partner_id in partners_of(left.locality.id, index) {
        let Some(right) = residents.get(&partner_id) else {
            continue;
        };
        if right.region == region && partner_id < left.locality.id {
            continue;
        }
        if right.region != region && is_finished(right.region) {
            continue;
        }
        collisions.extend(collision(left, right));
    }
    collisions
}

/// Every collision of `subject` that belongs to `region`'s search
///
/// Used after `subject` was rewritten by a merge. `subject` may be filed
/// under a neighbor of `region`; it is then only paired with members of
/// `region`, on the right side.
pub fn collisions_involving<F>(
    subject_id: LocalityId,
    region: RegionId,
    index: &PhoneticIndex,
    residents: &HashMap<LocalityId, ResidentLocality>,
    is_finished: F,
) -> Vec<Collision>
where
    F: Fn(RegionId) -> bool,
{
    let Some(subject) = residents.get(&subject_id) else {
        return Vec::new();
    };

    let mut collisions = Vec::new();
    for partner_id in partners_of(subject_id, index) {
        let Some(partner) = residents.get(&partner_id) else {
            continue;
        };
        let (left, right) = match (subject.region == region, partner.region == region) {
            (true, true) if subject_id < partner_id => (subject, partner),
            (true, true) => (partner, subject),
            (true, false) if !is_finished(partner.region) => (subject, partner),
            (false, true) if !is_finished(subject.region) => (partner, subject),
            _ => continue,
        };
        collisions.extend(collision(left, right));
    }
    collisions
}

/// Collisions of `region`'s localities against every indexed locality
///
/// Pairs inside `region` are reported once, with the lower id on the left.
pub fn find_collisions<F>(
    region: RegionId,
    index: &PhoneticIndex,
    residents: &HashMap<LocalityId, ResidentLocality>,
    is_finished: F,
) -> Vec<Collision>
where
    F: Fn(RegionId) -> bool,
{
    region_members(region, residents)
        .into_iter()
        .filter_map(|id| residents.get(&id))
        .flat_map(|left| collisions_from(left, region, index, residents, &is_finished))
        .collect()
}
