//! Durable storage collaborator.
//!
//! The engine never talks to a database directly. It reads and writes
//! records, the access log and Hebbian rows through [`RecordStore`], which
//! the SQLite backend implements. Other backends only need to honour the
//! same contract: each call either succeeds or fails cleanly, and
//! `update_with` / `delete_where` are atomic with respect to other calls on
//! the same record.

mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::HashMap;

use crate::error::EngraveResult;
use crate::hebbian::Pair;
use crate::types::{AccessEvent, AccessHistory, HebbianLink, Record, RecordId, Tier};

/// Record, access-log and association persistence.
pub trait RecordStore: Send + Sync {
    /// Insert a new record and index its content for keyword search.
    fn insert(&self, record: &Record) -> EngraveResult<()>;

    fn get(&self, id: RecordId) -> EngraveResult<Option<Record>>;

    /// Fetch several records. Missing ids are skipped; order is unspecified.
    fn get_many(&self, ids: &[RecordId]) -> EngraveResult<Vec<Record>>;

    /// Atomically read, modify and write back one record.
    ///
    /// Returns the updated record, or `None` when the id does not exist.
    fn update_with(
        &self,
        id: RecordId,
        update: &mut dyn FnMut(&mut Record),
    ) -> EngraveResult<Option<Record>>;

    /// Delete a record if it still exists and `predicate` holds for its
    /// current state. Links, counters and access events go with it.
    ///
    /// Returns whether a row was deleted.
    fn delete_where(
        &self,
        id: RecordId,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> EngraveResult<bool>;

    /// Every record in a tier.
    fn scan_tier(&self, tier: Tier) -> EngraveResult<Vec<Record>>;

    /// Record counts per tier. Every tier is present, possibly with zero.
    fn count_by_tier(&self) -> EngraveResult<HashMap<Tier, usize>>;

    fn pinned_count(&self) -> EngraveResult<usize>;

    /// Keyword-index query returning `(id, raw score)`, higher is better.
    fn keyword_search(&self, query: &str, limit: usize) -> EngraveResult<Vec<(RecordId, f64)>>;

    fn append_access(&self, event: &AccessEvent) -> EngraveResult<()>;

    /// Summarised access history for each id, newest `limit` timestamps first.
    /// Ids without accesses map to an empty history.
    fn access_histories(
        &self,
        ids: &[RecordId],
        limit: usize,
    ) -> EngraveResult<HashMap<RecordId, AccessHistory>>;

    /// Insert or update a link, clearing any pending counter for its pair.
    fn upsert_link(&self, link: &HebbianLink) -> EngraveResult<()>;

    fn delete_link(&self, pair: Pair) -> EngraveResult<()>;

    fn load_links(&self) -> EngraveResult<Vec<HebbianLink>>;

    fn save_coactivation(&self, pair: Pair, count: u32) -> EngraveResult<()>;

    fn load_coactivations(&self) -> EngraveResult<Vec<(Pair, u32)>>;
}
