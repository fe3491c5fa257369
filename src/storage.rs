//! SQLite-backed event store.
//!
//! Events live in `events`; tags are normalized into one `tags` row per
//! value, keyed by `(event_id, tag_index, value_index)`, and reassembled in
//! that order on lookup.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::anyhow;
use rand::{seq::SliceRandom, thread_rng};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    event::{Event, Tag},
    verify::{SchnorrVerifier, Verifier},
};

type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    pubkey TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    kind INTEGER NOT NULL,
    content TEXT NOT NULL,
    sig TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tags (
    event_id TEXT NOT NULL REFERENCES events(id),
    key TEXT,
    tag_index INTEGER NOT NULL,
    value_index INTEGER NOT NULL,
    value TEXT,
    PRIMARY KEY (event_id, tag_index, value_index)
);
CREATE INDEX IF NOT EXISTS tags_event_id ON tags(event_id);
";

/// `value_index` of the row recording a tag entry that carries no values.
const KEY_ONLY: i64 = -1;

/// What happened to one event handed to [`Store::ingest_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Stored,
    /// Already present; nothing was written.
    Duplicate,
    /// Failed verification or cannot be represented; nothing was written.
    Rejected,
}

/// Persistent store for events and their tags.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    verifier: Arc<dyn Verifier>,
}

impl Store {
    /// Open (creating if needed) the database file at `path`.
    pub fn open(path: &Path, verifier: Arc<dyn Verifier>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened event database");
        Self::with_connection(conn, verifier)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(verifier: Arc<dyn Verifier>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, verifier)
    }

    fn with_connection(conn: Connection, verifier: Arc<dyn Verifier>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            verifier,
        };
        store.init()?;
        Ok(store)
    }

    /// Ensure the schema exists.
    pub fn init(&self) -> Result<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Store a verified event. Returns `false` without writing anything when
    /// verification fails; storing an already known event is a no-op.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn insert_event(&self, ev: &Event) -> Result<bool> {
        Ok(self.ingest_event(ev)? != Ingest::Rejected)
    }

    /// Store a verified event and report whether it was new.
    pub fn ingest_event(&self, ev: &Event) -> Result<Ingest> {
        if !self.verifier.verify(ev) {
            warn!(id = %ev.id, "rejecting event with invalid id or signature");
            return Ok(Ingest::Rejected);
        }
        let Ok(created_at) = i64::try_from(ev.created_at) else {
            warn!(id = %ev.id, created_at = ev.created_at, "rejecting event with out of range created_at");
            return Ok(Ingest::Rejected);
        };
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let inserted = insert_event_tx(&tx, ev, created_at)?;
        tx.commit()?;
        if inserted {
            debug!(id = %ev.id, tags = ev.tags.len(), "stored event");
            Ok(Ingest::Stored)
        } else {
            debug!(id = %ev.id, "event already stored");
            Ok(Ingest::Duplicate)
        }
    }

    /// Creation time of a known event.
    pub fn event_created_at(&self, id: &str) -> Result<Option<u64>> {
        let conn = self.lock()?;
        let created: Option<i64> = conn
            .query_row(
                "SELECT created_at FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        created.map(|c| to_u64("created_at", c)).transpose()
    }

    /// IDs of every stored event, in no particular order.
    pub fn list_event_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM events")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Number of stored events.
    pub fn count_events(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| StoreError::OutOfRange("event count", count))
    }

    /// Load a full event, tags included.
    pub fn get_event_by_id(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, pubkey, created_at, kind, content, sig FROM events WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, pubkey, created_at, kind, content, sig)) = row else {
            return Ok(None);
        };
        let tags = load_tags(&conn, &id)?;
        Ok(Some(Event {
            id,
            pubkey,
            kind: u32::try_from(kind).map_err(|_| StoreError::OutOfRange("kind", kind))?,
            created_at: to_u64("created_at", created_at)?,
            tags,
            content,
            sig,
        }))
    }

    /// Re-verify the signatures of a random sample of stored events.
    ///
    /// Uses the Schnorr verifier regardless of how the store was opened.
    /// Returns how many events were checked.
    pub fn verify_sample(&self, sample: usize) -> anyhow::Result<usize> {
        let mut ids = self.list_event_ids()?;
        let mut rng = thread_rng();
        ids.shuffle(&mut rng);
        let verifier = SchnorrVerifier::new();
        let take = sample.min(ids.len());
        for id in ids.iter().take(take) {
            let ev = self
                .get_event_by_id(id)?
                .ok_or_else(|| anyhow!("event {id} vanished during verification"))?;
            verifier
                .check(&ev)
                .map_err(|e| anyhow!("event {id} failed verification: {e}"))?;
        }
        Ok(take)
    }
}

/// Write the event row and, if it was new, its tag rows. Returns whether
/// the event row was new.
fn insert_event_tx(tx: &Transaction<'_>, ev: &Event, created_at: i64) -> Result<bool> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO events (id, pubkey, created_at, kind, content, sig)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![ev.id, ev.pubkey, created_at, ev.kind, ev.content, ev.sig],
    )?;
    if inserted == 0 {
        return Ok(false);
    }
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO tags (event_id, key, tag_index, value_index, value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (tag_index, tag) in ev.tags.iter().enumerate() {
        let tag_index = tag_index as i64;
        let values = tag.values();
        if values.is_empty() {
            stmt.execute(params![ev.id, tag.key(), tag_index, KEY_ONLY, None::<String>])?;
            continue;
        }
        for (value_index, value) in values.iter().enumerate() {
            stmt.execute(params![ev.id, tag.key(), tag_index, value_index as i64, value])?;
        }
    }
    Ok(true)
}

/// Rebuild the ordered tag list of an event from its rows.
fn load_tags(conn: &Connection, id: &str) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT tag_index, key, value_index, value FROM tags
         WHERE event_id = ?1
         ORDER BY tag_index, value_index",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;
    let mut tags: Vec<Tag> = Vec::new();
    let mut current: Option<i64> = None;
    for row in rows {
        let (tag_index, key, value_index, value) = row?;
        if current != Some(tag_index) {
            current = Some(tag_index);
            tags.push(Tag(key.into_iter().collect()));
        }
        if value_index == KEY_ONLY {
            continue;
        }
        if let (Some(tag), Some(value)) = (tags.last_mut(), value) {
            tag.0.push(value);
        }
    }
    Ok(tags)
}

fn to_u64(column: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::OutOfRange(column, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::{testing::signed_event, AcceptAll};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn memory_store() -> Store {
        Store::open_in_memory(Arc::new(SchnorrVerifier::new())).unwrap()
    }

    fn sample_event(id: &str, tags: Vec<Tag>) -> Event {
        Event {
            id: id.into(),
            pubkey: "pub".into(),
            kind: 1,
            created_at: 42,
            tags,
            content: "hello".into(),
            sig: String::new(),
        }
    }

    fn tag_row_count(store: &Store, id: &str) -> i64 {
        store
            .lock()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM tags WHERE event_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn insert_and_lookup() {
        let store = memory_store();
        let ev = signed_event(1, 1_700_000_000, vec![Tag(vec!["t".into(), "news".into()])], "hi");
        assert!(store.insert_event(&ev).unwrap());
        assert_eq!(store.get_event_by_id(&ev.id).unwrap(), Some(ev.clone()));
        assert_eq!(store.event_created_at(&ev.id).unwrap(), Some(1_700_000_000));
        assert_eq!(store.count_events().unwrap(), 1);
    }

    #[test]
    fn insert_is_idempotent() {
        let store = memory_store();
        let tags = vec![
            Tag(vec!["e".into(), "aa".into(), "wss://r".into()]),
            Tag(vec!["p".into(), "bb".into()]),
        ];
        let ev = signed_event(1, 5, tags, "x");
        assert!(store.insert_event(&ev).unwrap());
        let rows_once = tag_row_count(&store, &ev.id);
        let stored_once = store.get_event_by_id(&ev.id).unwrap();
        assert!(store.insert_event(&ev).unwrap());
        assert_eq!(tag_row_count(&store, &ev.id), rows_once);
        assert_eq!(rows_once, 3);
        assert_eq!(store.get_event_by_id(&ev.id).unwrap(), stored_once);
        assert_eq!(store.list_event_ids().unwrap(), vec![ev.id.clone()]);
    }

    #[test]
    fn tags_round_trip_in_order() {
        let store = memory_store();
        let tags = vec![
            Tag(vec!["p".into(), "z".into(), "y".into(), "x".into()]),
            Tag(vec!["e".into(), "b".into()]),
            Tag(vec!["p".into(), "a".into()]),
            Tag(vec!["t".into()]),
            Tag(vec![]),
            Tag(vec!["d".into(), String::new()]),
        ];
        let ev = signed_event(1, 1, tags.clone(), "");
        assert!(store.insert_event(&ev).unwrap());
        let loaded = store.get_event_by_id(&ev.id).unwrap().unwrap();
        assert_eq!(loaded.tags, tags);
    }

    #[test]
    fn rejects_bad_signature_without_writes() {
        let store = memory_store();
        let mut ev = signed_event(1, 1, vec![Tag(vec!["t".into(), "x".into()])], "");
        ev.sig.replace_range(0..2, "00");
        assert!(!store.insert_event(&ev).unwrap());
        assert_eq!(store.get_event_by_id(&ev.id).unwrap(), None);
        assert_eq!(store.event_created_at(&ev.id).unwrap(), None);
        assert_eq!(tag_row_count(&store, &ev.id), 0);
        assert_eq!(store.count_events().unwrap(), 0);
    }

    #[test]
    fn missing_event_is_absent_not_error() {
        let store = memory_store();
        assert_eq!(store.get_event_by_id("nope").unwrap(), None);
        assert_eq!(store.event_created_at("nope").unwrap(), None);
        assert!(store.list_event_ids().unwrap().is_empty());
    }

    #[test]
    fn lists_all_ids() {
        let store = Store::open_in_memory(Arc::new(AcceptAll)).unwrap();
        for id in ["a", "b", "c"] {
            assert!(store.insert_event(&sample_event(id, vec![])).unwrap());
        }
        let ids: HashSet<String> = store.list_event_ids().unwrap().into_iter().collect();
        let expected: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn tag_rows_require_existing_event() {
        let store = memory_store();
        let conn = store.lock().unwrap();
        let res = conn.execute(
            "INSERT INTO tags (event_id, key, tag_index, value_index, value)
             VALUES ('ghost', 't', 0, 0, 'v')",
            [],
        );
        assert!(res.is_err());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/events.sqlite3");
        let ev = signed_event(7, 99, vec![Tag(vec!["d".into(), "slug".into()])], "body");
        {
            let store = Store::open(&path, Arc::new(SchnorrVerifier::new())).unwrap();
            assert!(store.insert_event(&ev).unwrap());
        }
        let store = Store::open(&path, Arc::new(SchnorrVerifier::new())).unwrap();
        assert_eq!(store.get_event_by_id(&ev.id).unwrap(), Some(ev));
    }

    #[test]
    fn concurrent_inserts_of_same_event() {
        let store = memory_store();
        let ev = signed_event(1, 3, vec![Tag(vec!["t".into(), "a".into(), "b".into()])], "c");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let ev = ev.clone();
                std::thread::spawn(move || store.insert_event(&ev).unwrap())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(store.count_events().unwrap(), 1);
        assert_eq!(tag_row_count(&store, &ev.id), 2);
        assert_eq!(store.get_event_by_id(&ev.id).unwrap(), Some(ev));
    }

    #[test]
    fn ingest_reports_stored_duplicate_and_rejected() {
        let store = memory_store();
        let ev = signed_event(1, 10, vec![], "once");
        assert_eq!(store.ingest_event(&ev).unwrap(), Ingest::Stored);
        assert_eq!(store.ingest_event(&ev).unwrap(), Ingest::Duplicate);
        let mut forged = signed_event(1, 11, vec![], "forged");
        forged.sig = "00".repeat(64);
        assert_eq!(store.ingest_event(&forged).unwrap(), Ingest::Rejected);
        assert_eq!(store.count_events().unwrap(), 1);
    }

    #[test]
    fn reused_id_keeps_first_event_tags() {
        let store = Store::open_in_memory(Arc::new(AcceptAll)).unwrap();
        let first_tags = vec![Tag(vec!["a".into(), "1".into()])];
        let mut first = sample_event("x", first_tags.clone());
        first.content = "one".into();
        let mut second = sample_event(
            "x",
            vec![
                Tag(vec!["a".into(), "1".into(), "2".into()]),
                Tag(vec!["b".into(), "9".into()]),
            ],
        );
        second.content = "two".into();

        assert_eq!(store.ingest_event(&first).unwrap(), Ingest::Stored);
        assert_eq!(store.ingest_event(&second).unwrap(), Ingest::Duplicate);

        let loaded = store.get_event_by_id("x").unwrap().unwrap();
        assert_eq!(loaded.content, "one");
        assert_eq!(loaded.tags, first_tags);
        assert_eq!(tag_row_count(&store, "x"), 1);
    }

    #[test]
    fn out_of_range_created_at_is_rejected() {
        let store = Store::open_in_memory(Arc::new(AcceptAll)).unwrap();
        let mut ev = sample_event("far", vec![Tag(vec!["t".into(), "x".into()])]);
        ev.created_at = u64::MAX;
        assert_eq!(store.ingest_event(&ev).unwrap(), Ingest::Rejected);
        assert_eq!(store.get_event_by_id("far").unwrap(), None);
        assert_eq!(tag_row_count(&store, "far"), 0);
        assert_eq!(
            store.ingest_event(&sample_event("near", vec![])).unwrap(),
            Ingest::Stored
        );
    }

    #[test]
    fn open_reports_unusable_parent_directory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let err = Store::open(&blocker.join("events.sqlite3"), Arc::new(AcceptAll)).err();
        assert!(matches!(err, Some(StoreError::Io(_))));
    }

    #[test]
    fn verify_sample_checks_events() {
        let store = Store::open_in_memory(Arc::new(AcceptAll)).unwrap();
        let ev1 = signed_event(1, 1, vec![], "");
        let ev2 = signed_event(2, 1, vec![], "");
        store.insert_event(&ev1).unwrap();
        store.insert_event(&ev2).unwrap();
        assert_eq!(store.verify_sample(10).unwrap(), 2);
        assert_eq!(store.verify_sample(1).unwrap(), 1);
        // an unsigned event slips in when verification is disabled
        store.insert_event(&sample_event("bad", vec![])).unwrap();
        assert!(store.verify_sample(10).is_err());
    }
}
