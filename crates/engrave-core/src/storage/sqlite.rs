//! SQLite-backed record store.
//!
//! Records live in `records`, with an FTS5 table `records_fts` as the keyword
//! index. The access log, Hebbian links and pending co-activation counters
//! reference `records` with `ON DELETE CASCADE`, so deleting a record removes
//! everything attached to it in one statement.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::RecordStore;
use crate::error::{EngraveError, EngraveResult};
use crate::hebbian::Pair;
use crate::types::{canonical_pair, AccessEvent, AccessHistory, HebbianLink, Record, RecordId, Tier};

const RECORD_COLUMNS: &str = "id, content, category, importance, tier, activation, stability, \
                              created_at, last_accessed, access_count, pinned, contradicted_by";

static SEARCH_TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}_]+").expect("valid FTS token regex"));

/// Build an FTS5 query matching any term of `query`. `None` when there are no terms.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = SEARCH_TERM
        .find_iter(query)
        .map(|m| format!("\"{}\"", m.as_str()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Fixed-width timestamps so lexical order matches time order.
fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_id(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| conversion_error(idx, e))
}

fn parse_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_enum<T>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(s).map_err(|e| conversion_error(idx, e))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let category: String = row.get(2)?;
    let tier: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let last_accessed: String = row.get(8)?;
    let contradicted_by: Option<String> = row.get(11)?;

    Ok(Record {
        id: parse_id(0, &id)?,
        content: row.get(1)?,
        category: parse_enum(2, &category)?,
        importance: row.get(3)?,
        tier: parse_enum(4, &tier)?,
        activation: row.get(5)?,
        stability: row.get(6)?,
        created_at: parse_time(7, &created_at)?,
        last_accessed: parse_time(8, &last_accessed)?,
        access_count: row.get(9)?,
        pinned: row.get(10)?,
        contradicted_by: contradicted_by.map(|s| parse_id(11, &s)).transpose()?,
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<HebbianLink> {
    let source: String = row.get(0)?;
    let target: String = row.get(1)?;
    let created_at: String = row.get(4)?;
    let last_reinforced: String = row.get(5)?;

    Ok(HebbianLink {
        source: parse_id(0, &source)?,
        target: parse_id(1, &target)?,
        strength: row.get(2)?,
        coactivation_count: row.get(3)?,
        created_at: parse_time(4, &created_at)?,
        last_reinforced: parse_time(5, &last_reinforced)?,
    })
}

fn select_record(conn: &Connection, id: RecordId) -> rusqlite::Result<Option<Record>> {
    conn.query_row(
        &format!("SELECT {} FROM records WHERE id = ?1", RECORD_COLUMNS),
        params![id.to_string()],
        record_from_row,
    )
    .optional()
}

/// SQLite implementation of [`RecordStore`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> EngraveResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> EngraveResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> EngraveResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngraveError::poisoned("sqlite connection"))
    }

    fn init_schema(&self) -> EngraveResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                category TEXT NOT NULL,
                importance REAL NOT NULL,
                tier TEXT NOT NULL DEFAULT 'working',
                activation REAL NOT NULL DEFAULT 1.0,
                stability REAL NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                pinned INTEGER NOT NULL DEFAULT 0,
                contradicted_by TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_records_tier ON records(tier);
            CREATE INDEX IF NOT EXISTS idx_records_pinned ON records(pinned);

            CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
                content,
                id UNINDEXED
            );

            CREATE TABLE IF NOT EXISTS access_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
                accessed_at TEXT NOT NULL,
                context TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_access_log_record
                ON access_log(record_id, accessed_at);

            CREATE TABLE IF NOT EXISTS hebbian_links (
                source_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
                target_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
                strength REAL NOT NULL,
                coactivation_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                last_reinforced TEXT NOT NULL,
                PRIMARY KEY (source_id, target_id),
                CHECK (source_id < target_id)
            );

            CREATE INDEX IF NOT EXISTS idx_hebbian_links_target ON hebbian_links(target_id);

            CREATE TABLE IF NOT EXISTS coactivations (
                source_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
                target_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
                count INTEGER NOT NULL,
                PRIMARY KEY (source_id, target_id),
                CHECK (source_id < target_id)
            );
            ",
        )?;

        Ok(())
    }
}

impl RecordStore for SqliteStore {
    fn insert(&self, record: &Record) -> EngraveResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                RECORD_COLUMNS
            ),
            params![
                record.id.to_string(),
                record.content,
                record.category.to_string(),
                record.importance,
                record.tier.to_string(),
                record.activation,
                record.stability,
                format_time(record.created_at),
                format_time(record.last_accessed),
                record.access_count,
                record.pinned,
                record.contradicted_by.map(|id| id.to_string()),
            ],
        )?;
        tx.execute(
            "INSERT INTO records_fts (content, id) VALUES (?1, ?2)",
            params![record.content, record.id.to_string()],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn get(&self, id: RecordId) -> EngraveResult<Option<Record>> {
        let conn = self.lock()?;
        Ok(select_record(&conn, id)?)
    }

    fn get_many(&self, ids: &[RecordId]) -> EngraveResult<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM records WHERE id = ?1",
            RECORD_COLUMNS
        ))?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = stmt
                .query_row(params![id.to_string()], record_from_row)
                .optional()?
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn update_with(
        &self,
        id: RecordId,
        update: &mut dyn FnMut(&mut Record),
    ) -> EngraveResult<Option<Record>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut record = match select_record(&tx, id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        update(&mut record);

        tx.execute(
            "UPDATE records
             SET importance = ?1, tier = ?2, activation = ?3, stability = ?4,
                 last_accessed = ?5, access_count = ?6, pinned = ?7, contradicted_by = ?8
             WHERE id = ?9",
            params![
                record.importance,
                record.tier.to_string(),
                record.activation,
                record.stability,
                format_time(record.last_accessed),
                record.access_count,
                record.pinned,
                record.contradicted_by.map(|id| id.to_string()),
                id.to_string(),
            ],
        )?;
        tx.commit()?;

        Ok(Some(record))
    }

    fn delete_where(
        &self,
        id: RecordId,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> EngraveResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let record = match select_record(&tx, id)? {
            Some(record) => record,
            None => return Ok(false),
        };
        if !predicate(&record) {
            return Ok(false);
        }

        let deleted = tx.execute("DELETE FROM records WHERE id = ?1", params![id.to_string()])?;
        tx.execute("DELETE FROM records_fts WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;

        debug!(record_id = %id, "Deleted record");
        Ok(deleted > 0)
    }

    fn scan_tier(&self, tier: Tier) -> EngraveResult<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE tier = ?1 ORDER BY created_at, id",
            RECORD_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![tier.to_string()], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count_by_tier(&self) -> EngraveResult<HashMap<Tier, usize>> {
        let conn = self.lock()?;
        let mut counts: HashMap<Tier, usize> = Tier::all().into_iter().map(|t| (t, 0)).collect();

        let mut stmt = conn.prepare("SELECT tier, COUNT(*) FROM records GROUP BY tier")?;
        let rows = stmt
            .query_map([], |row| {
                let tier: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((parse_enum::<Tier>(0, &tier)?, count as usize))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for (tier, count) in rows {
            counts.insert(tier, count);
        }
        Ok(counts)
    }

    fn pinned_count(&self) -> EngraveResult<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM records WHERE pinned = 1", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn keyword_search(&self, query: &str, limit: usize) -> EngraveResult<Vec<(RecordId, f64)>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, bm25(records_fts) FROM records_fts
             WHERE records_fts MATCH ?1
             ORDER BY bm25(records_fts), id
             LIMIT ?2",
        )?;

        let hits = stmt
            .query_map(params![fts, limit as i64], |row| {
                let id: String = row.get(0)?;
                let rank: f64 = row.get(1)?;
                // bm25() is negated: lower is a better match.
                Ok((parse_id(0, &id)?, -rank))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    fn append_access(&self, event: &AccessEvent) -> EngraveResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO access_log (record_id, accessed_at, context) VALUES (?1, ?2, ?3)",
            params![
                event.record_id.to_string(),
                format_time(event.timestamp),
                event.context,
            ],
        )?;
        Ok(())
    }

    fn access_histories(
        &self,
        ids: &[RecordId],
        limit: usize,
    ) -> EngraveResult<HashMap<RecordId, AccessHistory>> {
        let conn = self.lock()?;
        let mut recent_stmt = conn.prepare_cached(
            "SELECT accessed_at FROM access_log
             WHERE record_id = ?1
             ORDER BY accessed_at DESC, seq DESC
             LIMIT ?2",
        )?;
        let mut count_stmt =
            conn.prepare_cached("SELECT COUNT(*) FROM access_log WHERE record_id = ?1")?;

        let mut histories = HashMap::with_capacity(ids.len());
        for id in ids {
            let key = id.to_string();
            let recent = recent_stmt
                .query_map(params![key, limit as i64], |row| {
                    let ts: String = row.get(0)?;
                    parse_time(0, &ts)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            let total: i64 = count_stmt.query_row(params![key], |row| row.get(0))?;

            histories.insert(
                *id,
                AccessHistory {
                    recent,
                    total_count: total as u32,
                },
            );
        }
        Ok(histories)
    }

    fn upsert_link(&self, link: &HebbianLink) -> EngraveResult<()> {
        let (source, target) = canonical_pair(link.source, link.target);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO hebbian_links
             (source_id, target_id, strength, coactivation_count, created_at, last_reinforced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source_id, target_id) DO UPDATE SET
                strength = excluded.strength,
                coactivation_count = excluded.coactivation_count,
                last_reinforced = excluded.last_reinforced",
            params![
                source.to_string(),
                target.to_string(),
                link.strength,
                link.coactivation_count,
                format_time(link.created_at),
                format_time(link.last_reinforced),
            ],
        )?;
        tx.execute(
            "DELETE FROM coactivations WHERE source_id = ?1 AND target_id = ?2",
            params![source.to_string(), target.to_string()],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn delete_link(&self, pair: Pair) -> EngraveResult<()> {
        let (source, target) = canonical_pair(pair.0, pair.1);
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM hebbian_links WHERE source_id = ?1 AND target_id = ?2",
            params![source.to_string(), target.to_string()],
        )?;
        Ok(())
    }

    fn load_links(&self) -> EngraveResult<Vec<HebbianLink>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, strength, coactivation_count, created_at, last_reinforced
             FROM hebbian_links ORDER BY source_id, target_id",
        )?;
        let links = stmt
            .query_map([], link_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn save_coactivation(&self, pair: Pair, count: u32) -> EngraveResult<()> {
        let (source, target) = canonical_pair(pair.0, pair.1);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO coactivations (source_id, target_id, count) VALUES (?1, ?2, ?3)
             ON CONFLICT(source_id, target_id) DO UPDATE SET count = excluded.count",
            params![source.to_string(), target.to_string(), count],
        )?;
        Ok(())
    }

    fn load_coactivations(&self) -> EngraveResult<Vec<(Pair, u32)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT source_id, target_id, count FROM coactivations ORDER BY source_id, target_id")?;
        let rows = stmt
            .query_map([], |row| {
                let source: String = row.get(0)?;
                let target: String = row.get(1)?;
                let count: u32 = row.get(2)?;
                Ok(((parse_id(0, &source)?, parse_id(1, &target)?), count))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;
    use chrono::Duration;

    fn record(content: &str, importance: f64) -> Record {
        Record::new(content, Category::Factual, importance, 1.0, Utc::now())
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut original = record("likes tea", 0.8);
        original.contradicted_by = Some(Uuid::new_v4());
        store.insert(&original).unwrap();

        let loaded = store.get(original.id).unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_update_with_missing_returns_none() {
        let store = SqliteStore::in_memory().unwrap();
        let result = store.update_with(Uuid::new_v4(), &mut |r| r.pinned = true).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_update_with_persists() {
        let store = SqliteStore::in_memory().unwrap();
        let r = record("likes tea", 0.8);
        store.insert(&r).unwrap();

        let updated = store
            .update_with(r.id, &mut |rec| {
                rec.tier = Tier::Core;
                rec.access_count += 1;
                rec.importance = 0.9;
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.tier, Tier::Core);
        assert_eq!(store.get(r.id).unwrap().unwrap(), updated);
    }

    #[test]
    fn test_fts_query_quotes_each_term() {
        assert_eq!(
            fts_query("café, tea_time!").as_deref(),
            Some("\"café\" OR \"tea_time\"")
        );
        assert_eq!(fts_query("NEAR(\"x\""), Some("\"NEAR\" OR \"x\"".to_string()));
        assert!(fts_query(" -- ").is_none());
    }

    #[test]
    fn test_keyword_search_matches_any_term() {
        let store = SqliteStore::in_memory().unwrap();
        let tea = record("likes tea", 0.8);
        let coffee = record("likes coffee", 0.2);
        let other = record("rust is fast", 0.5);
        for r in [&tea, &coffee, &other] {
            store.insert(r).unwrap();
        }

        let hits = store.keyword_search("likes", 10).unwrap();
        let ids: Vec<RecordId> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(hits.len(), 2);
        assert!(ids.contains(&tea.id) && ids.contains(&coffee.id));
        assert!(hits.iter().all(|(_, score)| *score >= 0.0));

        let hits = store.keyword_search("coffee OR \"rust", 10).unwrap();
        assert_eq!(hits.len(), 2);

        assert!(store.keyword_search("   ?!", 10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_where_respects_predicate_and_cascades() {
        let store = SqliteStore::in_memory().unwrap();
        let a = record("alpha", 0.5);
        let b = record("beta", 0.5);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();
        store
            .append_access(&AccessEvent::new(a.id, Utc::now(), Some("q".into())))
            .unwrap();
        store
            .upsert_link(&HebbianLink::formed(a.id, b.id, 3, Utc::now()))
            .unwrap();

        assert!(!store.delete_where(a.id, &|r| r.pinned).unwrap());
        assert!(store.delete_where(a.id, &|r| !r.pinned).unwrap());
        assert!(!store.delete_where(a.id, &|_| true).unwrap());

        assert!(store.get(a.id).unwrap().is_none());
        assert!(store.load_links().unwrap().is_empty());
        assert!(store.keyword_search("alpha", 10).unwrap().is_empty());
        let histories = store.access_histories(&[a.id], 20).unwrap();
        assert_eq!(histories[&a.id].total_count, 0);
    }

    #[test]
    fn test_access_histories_newest_first_and_limited() {
        let store = SqliteStore::in_memory().unwrap();
        let r = record("alpha", 0.5);
        store.insert(&r).unwrap();
        let t0 = Utc::now();
        for i in 0..5 {
            store
                .append_access(&AccessEvent::new(r.id, t0 + Duration::seconds(i), None))
                .unwrap();
        }

        let histories = store.access_histories(&[r.id], 3).unwrap();
        let history = &histories[&r.id];
        assert_eq!(history.total_count, 5);
        assert_eq!(history.recent.len(), 3);
        assert_eq!(history.recent[0], t0 + Duration::seconds(4));
        assert!(history.recent[0] > history.recent[2]);
    }

    #[test]
    fn test_link_upsert_clears_counter() {
        let store = SqliteStore::in_memory().unwrap();
        let a = record("alpha", 0.5);
        let b = record("beta", 0.5);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        store.save_coactivation((b.id, a.id), 2).unwrap();
        assert_eq!(store.load_coactivations().unwrap(), vec![(canonical_pair(a.id, b.id), 2)]);

        let mut link = HebbianLink::formed(b.id, a.id, 3, Utc::now());
        store.upsert_link(&link).unwrap();
        assert!(store.load_coactivations().unwrap().is_empty());

        link.strength = 0.5;
        store.upsert_link(&link).unwrap();
        let links = store.load_links().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].strength, 0.5);
        assert!(links[0].source < links[0].target);

        store.delete_link((a.id, b.id)).unwrap();
        assert!(store.load_links().unwrap().is_empty());
    }

    #[test]
    fn test_count_by_tier_and_pinned() {
        let store = SqliteStore::in_memory().unwrap();
        let mut pinned = record("alpha", 0.5);
        pinned.pinned = true;
        pinned.tier = Tier::Core;
        store.insert(&pinned).unwrap();
        store.insert(&record("beta", 0.5)).unwrap();

        let counts = store.count_by_tier().unwrap();
        assert_eq!(counts[&Tier::Working], 1);
        assert_eq!(counts[&Tier::Core], 1);
        assert_eq!(counts[&Tier::Archive], 0);
        assert_eq!(store.pinned_count().unwrap(), 1);
        assert_eq!(store.scan_tier(Tier::Core).unwrap()[0].id, pinned.id);
    }

    #[test]
    fn test_file_backed_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        let r = record("persisted", 0.5);
        {
            let store = SqliteStore::new(&path).unwrap();
            store.insert(&r).unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.get(r.id).unwrap().unwrap().content, "persisted");
    }
}
