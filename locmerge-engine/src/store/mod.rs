//! Persistent stores
//!
//! Two independent keyspaces back a pass: the work keyspace (resident
//! localities, worklist, pass record, index spill) and the exclusion keyspace
//! (reviewer decisions, kept across passes).

pub mod exclusion_store;
pub mod kv;
pub mod work_store;

pub use exclusion_store::{ExclusionStore, SeriesLink, SeriesRelation};
pub use kv::{KvKey, KvStore, KvTransaction, KvWrite};
pub use work_store::{PendingMerge, PhoneticSpill, WorkStore};

use locmerge_common::config::StatePaths;
use locmerge_common::Result;

/// Keyspace names recorded inside the files
pub const WORK_KEYSPACE: &str = "work";
pub const EXCLUSION_KEYSPACE: &str = "exclusions";

/// Open both keyspaces under a state folder
pub async fn open_stores(paths: &StatePaths, max_lock_wait_ms: u64) -> Result<(WorkStore, ExclusionStore)> {
    paths.ensure_exists()?;
    let work = KvStore::open(&paths.work_db, WORK_KEYSPACE, max_lock_wait_ms).await?;
    let exclusions = KvStore::open(&paths.exclusion_db, EXCLUSION_KEYSPACE, max_lock_wait_ms).await?;
    Ok((
        WorkStore::new(work, max_lock_wait_ms),
        ExclusionStore::new(exclusions, max_lock_wait_ms),
    ))
}

/// Open both keyspaces in memory
pub async fn open_memory_stores(max_lock_wait_ms: u64) -> Result<(WorkStore, ExclusionStore)> {
    let work = KvStore::open_in_memory(WORK_KEYSPACE, max_lock_wait_ms).await?;
    let exclusions = KvStore::open_in_memory(EXCLUSION_KEYSPACE, max_lock_wait_ms).await?;
    Ok((
        WorkStore::new(work, max_lock_wait_ms),
        ExclusionStore::new(exclusions, max_lock_wait_ms),
    ))
}
