use std::path::Path;
use std::sync::mpsc::{channel, Receiver, Sender};

use parking_lot::Mutex;
use rusqlite::{named_params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::StoreError;
use crate::store::{ChangeEvent, ChangeKind, Document, DocumentStore};

/// Revision-tracked document store over a single SQLite file. Multiple
/// handles opened on the same path see each other's revisions, which is
/// what makes the conflict-retry and cross-handle change tests honest.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // journal_mode returns a row, so it cannot go through execute.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        let store = Self {
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
        };
        store.apply_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
        };
        store.apply_schema()?;
        Ok(store)
    }

    fn apply_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                rev INTEGER NOT NULL,
                body TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                body TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_changes_doc ON changes(doc_id);
            ",
        )?;
        Ok(())
    }

    fn stored_rev(conn: &Connection, id: &str) -> Result<Option<u64>, StoreError> {
        let rev = conn
            .query_row(
                "SELECT rev FROM documents WHERE id = :id",
                named_params![":id": id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(rev.map(|r| r as u64))
    }

    fn record_change(
        conn: &Connection,
        id: &str,
        kind: ChangeKind,
        body: Option<&Value>,
    ) -> Result<ChangeEvent, StoreError> {
        let kind_str = match kind {
            ChangeKind::Put => "put",
            ChangeKind::Delete => "delete",
        };
        conn.execute(
            "INSERT INTO changes (doc_id, kind, body) VALUES (:id, :kind, :body)",
            named_params![
                ":id": id,
                ":kind": kind_str,
                ":body": body.map(|b| b.to_string()),
            ],
        )?;
        let seq = conn.last_insert_rowid() as u64;
        Ok(ChangeEvent {
            seq,
            id: id.to_string(),
            kind,
            body: body.cloned(),
        })
    }

    fn broadcast(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, id: &str) -> Result<Document, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT rev, body FROM documents WHERE id = :id",
                named_params![":id": id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((rev, body)) = row else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };
        Ok(Document {
            id: id.to_string(),
            rev: rev as u64,
            body: serde_json::from_str(&body)?,
        })
    }

    fn put(&self, id: &str, rev: Option<u64>, body: &Value) -> Result<u64, StoreError> {
        let (next, event) = {
            let conn = self.conn.lock();
            let stored = Self::stored_rev(&conn, id)?;
            if stored != rev {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    expected: rev,
                    stored,
                });
            }
            let next = stored.unwrap_or(0) + 1;
            conn.execute(
                "INSERT INTO documents (id, rev, body) VALUES (:id, :rev, :body)
                 ON CONFLICT(id) DO UPDATE SET rev = :rev, body = :body",
                named_params![":id": id, ":rev": next as i64, ":body": body.to_string()],
            )?;
            let event = Self::record_change(&conn, id, ChangeKind::Put, Some(body))?;
            (next, event)
        };
        self.broadcast(event);
        Ok(next)
    }

    fn delete(&self, id: &str, rev: u64) -> Result<(), StoreError> {
        let event = {
            let conn = self.conn.lock();
            let stored = Self::stored_rev(&conn, id)?;
            match stored {
                None => return Err(StoreError::NotFound { id: id.to_string() }),
                Some(current) if current != rev => {
                    return Err(StoreError::Conflict {
                        id: id.to_string(),
                        expected: Some(rev),
                        stored,
                    });
                }
                Some(_) => {}
            }
            conn.execute(
                "DELETE FROM documents WHERE id = :id",
                named_params![":id": id],
            )?;
            Self::record_change(&conn, id, ChangeKind::Delete, None)?
        };
        self.broadcast(event);
        Ok(())
    }

    fn enumerate(&self, prefix: &str) -> Result<Vec<Document>, StoreError> {
        let conn = self.conn.lock();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = conn.prepare(
            "SELECT id, rev, body FROM documents WHERE id LIKE :pattern ESCAPE '\\' ORDER BY id",
        )?;
        let mut rows = stmt.query(named_params![":pattern": pattern])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let rev: i64 = row.get(1)?;
            let body: String = row.get(2)?;
            documents.push(Document {
                id,
                rev: rev as u64,
                body: serde_json::from_str(&body)?,
            });
        }
        Ok(documents)
    }

    fn changes(&self, since: u64) -> Result<Vec<ChangeEvent>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT seq, doc_id, kind, body FROM changes WHERE seq > :since ORDER BY seq",
        )?;
        let mut rows = stmt.query(named_params![":since": since as i64])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let seq: i64 = row.get(0)?;
            let id: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let body: Option<String> = row.get(3)?;
            let kind = match kind.as_str() {
                "delete" => ChangeKind::Delete,
                _ => ChangeKind::Put,
            };
            let body = match body {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => None,
            };
            events.push(ChangeEvent {
                seq: seq as u64,
                id,
                kind,
                body,
            });
        }
        Ok(events)
    }

    fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn ping(&self) -> bool {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_temp() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.sqlite3")).unwrap();
        (store, dir)
    }

    #[test]
    fn put_get_delete_round_trip() {
        let (store, _dir) = open_temp();
        let rev = store.put("task/a", None, &json!({"n": 1})).unwrap();
        assert_eq!(rev, 1);

        let doc = store.get("task/a").unwrap();
        assert_eq!(doc.rev, 1);
        assert_eq!(doc.body, json!({"n": 1}));

        let rev = store.put("task/a", Some(1), &json!({"n": 2})).unwrap();
        assert_eq!(rev, 2);

        store.delete("task/a", 2).unwrap();
        assert!(matches!(
            store.get("task/a"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn stale_revision_is_a_conflict() {
        let (store, _dir) = open_temp();
        store.put("task/a", None, &json!({"n": 1})).unwrap();
        store.put("task/a", Some(1), &json!({"n": 2})).unwrap();

        let err = store.put("task/a", Some(1), &json!({"n": 3})).unwrap_err();
        assert!(err.is_conflict());

        let err = store.delete("task/a", 1).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn create_over_existing_conflicts() {
        let (store, _dir) = open_temp();
        store.put("task/a", None, &json!({})).unwrap();
        let err = store.put("task/a", None, &json!({})).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn enumerate_filters_by_prefix() {
        let (store, _dir) = open_temp();
        store.put("task/a", None, &json!({"t": "a"})).unwrap();
        store.put("task/b", None, &json!({"t": "b"})).unwrap();
        store.put("projects", None, &json!([])).unwrap();

        let docs = store.enumerate("task/").unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["task/a", "task/b"]);
    }

    #[test]
    fn changes_replay_and_live_feed_agree() {
        let (store, _dir) = open_temp();
        let rx = store.subscribe();

        store.put("task/a", None, &json!({"n": 1})).unwrap();
        store.put("task/a", Some(1), &json!({"n": 2})).unwrap();
        store.delete("task/a", 2).unwrap();

        let replay = store.changes(0).unwrap();
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[2].kind, ChangeKind::Delete);

        let live: Vec<ChangeEvent> = rx.try_iter().collect();
        assert_eq!(live, replay);

        let tail = store.changes(replay[1].seq).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].kind, ChangeKind::Delete);
    }

    #[test]
    fn two_handles_share_revisions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.sqlite3");
        let first = SqliteStore::open(&path).unwrap();
        let second = SqliteStore::open(&path).unwrap();

        first.put("task/a", None, &json!({"n": 1})).unwrap();
        let doc = second.get("task/a").unwrap();
        assert_eq!(doc.rev, 1);

        second.put("task/a", Some(1), &json!({"n": 2})).unwrap();
        let err = first.put("task/a", Some(1), &json!({"n": 3})).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn ping_succeeds_on_open_store() {
        let (store, _dir) = open_temp();
        assert!(store.ping());
    }
}
