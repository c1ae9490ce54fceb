//! Locality work store
//!
//! Persists the working set of a pass in the work keyspace:
//!
//! | Key | Value |
//! |-----|-------|
//! | `locality:{id}` | `PendingLocality` |
//! | `region:{id}` | locality ids filed under the region |
//! | `phonetic:{code}` | locality ids holding the code (index spill) |
//! | `worklist` | `SchedulerSnapshot` |
//! | `pass` | `PassRecord` (absent once the pass completes) |
//! | `merge_pending` | `PendingMerge` not yet confirmed by the merge writer |
//!
//! Every method that touches several keys does so in one transaction, so a
//! resumed pass always sees the state of the last completed step.

use super::kv::{KvKey, KvStore};
use crate::driver::state::PassRecord;
use crate::scheduler::SchedulerSnapshot;
use crate::utils::retry_on_lock;
use locmerge_common::{LocalityId, PendingLocality, RegionId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

const LOCALITY_PREFIX: &str = "locality:";
const REGION_PREFIX: &str = "region:";
const PHONETIC_PREFIX: &str = "phonetic:";
const WORKLIST_KEY: &str = "worklist";
const PASS_KEY: &str = "pass";
const PENDING_MERGE_KEY: &str = "merge_pending";

fn locality_key(id: LocalityId) -> KvKey {
    KvKey::Str(format!("{}{}", LOCALITY_PREFIX, id))
}

fn region_key(id: RegionId) -> KvKey {
    KvKey::Str(format!("{}{}", REGION_PREFIX, id))
}

fn phonetic_key(code: &str) -> KvKey {
    KvKey::Str(format!("{}{}", PHONETIC_PREFIX, code))
}

/// Change to one spilled phonetic index entry; `None` removes the entry
pub type PhoneticSpill = (String, Option<Vec<LocalityId>>);

/// A merge the work keyspace holds but the merge writer has not confirmed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMerge {
    pub keep: PendingLocality,
    pub discard: PendingLocality,
}

/// Work keyspace accessor
#[derive(Clone)]
pub struct WorkStore {
    kv: KvStore,
    max_lock_wait_ms: u64,
}

impl WorkStore {
    pub fn new(kv: KvStore, max_lock_wait_ms: u64) -> Self {
        Self {
            kv,
            max_lock_wait_ms,
        }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// Persist a freshly fetched region and its localities atomically
    pub async fn load_region(&self, region: RegionId, localities: &[PendingLocality]) -> Result<()> {
        let ids: Vec<LocalityId> = localities.iter().map(|l| l.id).collect();
        let kv = &self.kv;
        let ids_ref = &ids;

        retry_on_lock("work_load_region", self.max_lock_wait_ms, move || async move {
            let mut tx = kv.begin("work_load_region").await?;
            for locality in localities {
                tx.put(locality_key(locality.id), locality).await?;
            }
            tx.put(region_key(region), ids_ref).await?;
            tx.commit().await
        })
        .await?;

        debug!(region, localities = ids.len(), "Region stored in work keyspace");
        Ok(())
    }

    /// Resident localities filed under `region`; empty if the region is not loaded
    pub async fn region_localities(&self, region: RegionId) -> Result<Vec<PendingLocality>> {
        let ids: Vec<LocalityId> = self.kv.get(region_key(region)).await?.unwrap_or_default();

        let mut localities = Vec::with_capacity(ids.len());
        for id in ids {
            match self.kv.get::<PendingLocality>(locality_key(id)).await? {
                Some(locality) => localities.push(locality),
                None => warn!(region, locality = id, "Region lists a locality missing from the work keyspace"),
            }
        }
        Ok(localities)
    }

    pub async fn locality(&self, id: LocalityId) -> Result<Option<PendingLocality>> {
        self.kv.get(locality_key(id)).await
    }

    /// Ids of every region with a stored locality list
    pub async fn loaded_regions(&self) -> Result<Vec<RegionId>> {
        let entries: Vec<(String, Vec<LocalityId>)> = self.kv.scan_prefix(REGION_PREFIX).await?;
        let mut regions: Vec<RegionId> = entries
            .into_iter()
            .filter_map(|(key, _)| match key[REGION_PREFIX.len()..].parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(key = %key, "Ignoring malformed region key");
                    None
                }
            })
            .collect();
        regions.sort_unstable();
        Ok(regions)
    }

    pub async fn resident_locality_count(&self) -> Result<u64> {
        self.kv.count_prefix(LOCALITY_PREFIX).await
    }

    /// Replace the kept record with `merged` and drop `discard`
    ///
    /// The merged record stays filed under the region its id was loaded
    /// with; the discarded id is removed from its region's list. The same
    /// transaction counts the merge in the stored pass record and marks it
    /// pending until `clear_pending_merge`.
    pub async fn apply_merge(&self, merged: &PendingLocality, discard: &PendingLocality) -> Result<()> {
        let pending = PendingMerge {
            keep: merged.clone(),
            discard: discard.clone(),
        };
        let kv = &self.kv;
        let pending_ref = &pending;
        let discard_id = discard.id;

        retry_on_lock("work_apply_merge", self.max_lock_wait_ms, move || async move {
            let mut tx = kv.begin("work_apply_merge").await?;

            let stored: Option<PendingLocality> = tx.get(locality_key(discard_id)).await?;
            if let Some(stored) = stored {
                let key = region_key(stored.geo_id);
                let ids: Option<Vec<LocalityId>> = tx.get(key.clone()).await?;
                if let Some(mut ids) = ids {
                    ids.retain(|id| *id != discard_id);
                    tx.put(key, &ids).await?;
                }
            }
            tx.delete(locality_key(discard_id)).await?;
            tx.put(locality_key(pending_ref.keep.id), &pending_ref.keep).await?;

            let pass: Option<PassRecord> = tx.get(PASS_KEY).await?;
            if let Some(mut pass) = pass {
                pass.merges += 1;
                tx.put(PASS_KEY, &pass).await?;
            }
            tx.put(PENDING_MERGE_KEY, pending_ref).await?;

            tx.commit().await
        })
        .await?;

        debug!(keep = merged.id, discard = discard_id, "Merge applied to work keyspace");
        Ok(())
    }

    pub async fn pending_merge(&self) -> Result<Option<PendingMerge>> {
        self.kv.get(PENDING_MERGE_KEY).await
    }

    /// Mark the pending merge as written back
    pub async fn clear_pending_merge(&self) -> Result<()> {
        self.kv.delete(PENDING_MERGE_KEY).await?;
        Ok(())
    }

    /// Store a new pass and its initial worklist atomically
    pub async fn begin_pass(&self, pass: &PassRecord, snapshot: &SchedulerSnapshot) -> Result<()> {
        let kv = &self.kv;

        retry_on_lock("work_begin_pass", self.max_lock_wait_ms, move || async move {
            let mut tx = kv.begin("work_begin_pass").await?;
            tx.put(PASS_KEY, pass).await?;
            tx.put(WORKLIST_KEY, snapshot).await?;
            tx.commit().await
        })
        .await
    }

    /// Commit a finished region
    ///
    /// Writes the pass record and scheduler snapshot, removes the evicted
    /// regions with their localities and spills the changed index entries,
    /// all in one transaction.
    pub async fn commit_region(
        &self,
        pass: &PassRecord,
        snapshot: &SchedulerSnapshot,
        evicted: &[RegionId],
        spill: &[PhoneticSpill],
    ) -> Result<()> {
        self.commit("work_commit_region", Some(pass), snapshot, evicted, spill)
            .await
    }

    /// Final commit of a drained pass; removes the pass record
    pub async fn finish_pass(
        &self,
        snapshot: &SchedulerSnapshot,
        evicted: &[RegionId],
        spill: &[PhoneticSpill],
    ) -> Result<()> {
        self.commit("work_finish_pass", None, snapshot, evicted, spill)
            .await
    }

    async fn commit(
        &self,
        caller: &'static str,
        pass: Option<&PassRecord>,
        snapshot: &SchedulerSnapshot,
        evicted: &[RegionId],
        spill: &[PhoneticSpill],
    ) -> Result<()> {
        let kv = &self.kv;

        retry_on_lock(caller, self.max_lock_wait_ms, move || async move {
            let mut tx = kv.begin(caller).await?;

            match pass {
                Some(pass) => tx.put(PASS_KEY, pass).await?,
                None => {
                    tx.delete(PASS_KEY).await?;
                }
            }
            tx.put(WORKLIST_KEY, snapshot).await?;

            for &region in evicted {
                let ids: Vec<LocalityId> = tx.get(region_key(region)).await?.unwrap_or_default();
                for id in ids {
                    tx.delete(locality_key(id)).await?;
                }
                tx.delete(region_key(region)).await?;
            }

            for (code, ids) in spill {
                match ids {
                    Some(ids) => tx.put(phonetic_key(code), ids).await?,
                    None => {
                        tx.delete(phonetic_key(code)).await?;
                    }
                }
            }

            tx.commit().await
        })
        .await?;

        debug!(
            caller,
            evicted = evicted.len(),
            spilled = spill.len(),
            "Work keyspace commit"
        );
        Ok(())
    }

    pub async fn load_pass(&self) -> Result<Option<PassRecord>> {
        self.kv.get(PASS_KEY).await
    }

    pub async fn load_worklist(&self) -> Result<Option<SchedulerSnapshot>> {
        self.kv.get(WORKLIST_KEY).await
    }

    /// Spilled phonetic index entries, ordered by code
    pub async fn phonetic_entries(&self) -> Result<Vec<(String, Vec<LocalityId>)>> {
        let entries: Vec<(String, Vec<LocalityId>)> = self.kv.scan_prefix(PHONETIC_PREFIX).await?;
        Ok(entries
            .into_iter()
            .map(|(key, ids)| (key[PHONETIC_PREFIX.len()..].to_string(), ids))
            .collect())
    }

    /// Drop regions outside `keep` and every spilled index entry
    ///
    /// Used on resume, where the index is rebuilt from the surviving regions.
    pub async fn purge_regions_except(&self, keep: &BTreeSet<RegionId>) -> Result<Vec<RegionId>> {
        let stale: Vec<RegionId> = self
            .loaded_regions()
            .await?
            .into_iter()
            .filter(|r| !keep.contains(r))
            .collect();
        let codes: Vec<String> = self
            .phonetic_entries()
            .await?
            .into_iter()
            .map(|(code, _)| code)
            .collect();

        let kv = &self.kv;
        let (stale_ref, codes_ref) = (&stale, &codes);
        retry_on_lock("work_purge", self.max_lock_wait_ms, move || async move {
            let mut tx = kv.begin("work_purge").await?;
            for &region in stale_ref {
                let ids: Vec<LocalityId> = tx.get(region_key(region)).await?.unwrap_or_default();
                for id in ids {
                    tx.delete(locality_key(id)).await?;
                }
                tx.delete(region_key(region)).await?;
            }
            for code in codes_ref {
                tx.delete(phonetic_key(code)).await?;
            }
            tx.commit().await
        })
        .await?;

        if !stale.is_empty() {
            debug!(purged = stale.len(), "Purged regions no longer needed");
        }
        Ok(stale)
    }

    /// Remove everything, including any unfinished pass
    pub async fn clear(&self) -> Result<u64> {
        self.kv.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn work_store() -> WorkStore {
        let kv = KvStore::open_in_memory("work", 1000).await.unwrap();
        WorkStore::new(kv, 1000)
    }

    fn locality(id: LocalityId, region: RegionId, name: &str) -> PendingLocality {
        PendingLocality::new(id, region, name)
    }

    #[tokio::test]
    async fn test_region_round_trip() {
        let store = work_store().await;
        store
            .load_region(5, &[locality(1, 5, "Mill Creek"), locality(2, 5, "Bear Flat")])
            .await
            .unwrap();

        let loaded = store.region_localities(5).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(store.loaded_regions().await.unwrap(), vec![5]);
        assert!(store.region_localities(6).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_keeps_record_under_original_region() {
        let store = work_store().await;
        store.load_region(1, &[locality(10, 1, "Riverside Canyon")]).await.unwrap();
        store.load_region(2, &[locality(20, 2, "Riverside Canyon")]).await.unwrap();

        let merged = locality(10, 2, "Riverside Canyon Road");
        store.apply_merge(&merged, &locality(20, 2, "Riverside Canyon")).await.unwrap();

        let region1 = store.region_localities(1).await.unwrap();
        assert_eq!(region1.len(), 1);
        assert_eq!(region1[0].name, "Riverside Canyon Road");
        assert!(store.region_localities(2).await.unwrap().is_empty());
        assert!(store.locality(20).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_is_pending_until_cleared_and_counted() {
        let store = work_store().await;
        store
            .begin_pass(&PassRecord::for_test(), &SchedulerSnapshot::default())
            .await
            .unwrap();
        store.load_region(1, &[locality(10, 1, "Mill Creek"), locality(11, 1, "Mill Creek")]).await.unwrap();
        assert!(store.pending_merge().await.unwrap().is_none());

        let merged = locality(10, 1, "Mill Creek");
        let discard = locality(11, 1, "Mill Creek");
        store.apply_merge(&merged, &discard).await.unwrap();

        let pending = store.pending_merge().await.unwrap().unwrap();
        assert_eq!(pending.keep, merged);
        assert_eq!(pending.discard, discard);
        assert_eq!(store.load_pass().await.unwrap().unwrap().merges, 1);
        assert_eq!(store.region_localities(1).await.unwrap(), vec![merged]);

        store.clear_pending_merge().await.unwrap();
        assert!(store.pending_merge().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_evicts_region_and_spills_codes() {
        let store = work_store().await;
        store.load_region(1, &[locality(10, 1, "Mill Creek")]).await.unwrap();
        store.load_region(2, &[locality(20, 2, "Bear Flat")]).await.unwrap();

        let pass = PassRecord::for_test();
        let spill = vec![
            ("M400".to_string(), Some(vec![10])),
            ("B600".to_string(), None),
        ];
        store
            .commit_region(&pass, &SchedulerSnapshot::default(), &[2], &spill)
            .await
            .unwrap();

        assert_eq!(store.loaded_regions().await.unwrap(), vec![1]);
        assert!(store.locality(20).await.unwrap().is_none());
        assert_eq!(
            store.phonetic_entries().await.unwrap(),
            vec![("M400".to_string(), vec![10])]
        );
        assert!(store.load_pass().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_keeps_only_listed_regions() {
        let store = work_store().await;
        store.load_region(1, &[locality(10, 1, "Mill Creek")]).await.unwrap();
        store.load_region(2, &[locality(20, 2, "Bear Flat")]).await.unwrap();

        let keep: BTreeSet<RegionId> = [1].into_iter().collect();
        let purged = store.purge_regions_except(&keep).await.unwrap();

        assert_eq!(purged, vec![2]);
        assert_eq!(store.resident_locality_count().await.unwrap(), 1);
    }
}
