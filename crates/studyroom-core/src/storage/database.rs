//! SQLite-backed document and replica storage.
//!
//! Provides persistent storage for:
//! - Session, user and task-group documents (JSON bodies keyed by collection/id)
//! - Session realtime replicas, so a CLI process can pick up where another left off
//!
//! Statements run on tokio's blocking pool against a single shared
//! connection.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use super::feed::ChangeFeed;
use super::store::{
    merge_member_states, DocumentStore, MemberStateChange, MemberStates, RealtimeStore, SessionQuery,
};
use crate::error::StoreError;
use crate::model::{MemberState, Session, SessionRealtime, TaskGroup, User};

const SESSIONS: &str = "sessions";
const USERS: &str = "users";
const TASK_GROUPS: &str = "task_groups";
const REALTIME: &str = "realtime";

/// SQLite database implementing [`DocumentStore`] and [`RealtimeStore`].
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    feed: ChangeFeed,
}

impl Database {
    /// Open (and migrate) a database file at `path`.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            feed: ChangeFeed::new(),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                collection  TEXT NOT NULL,
                id          TEXT NOT NULL,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE TABLE IF NOT EXISTS realtime (
                id    TEXT PRIMARY KEY,
                body  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(collection, created_at);",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Locked)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Locked)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("sqlite task failed: {e}")))?
    }

    async fn get_doc<T>(&self, collection: &'static str, id: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(|b| decode(collection, &id, &b)).transpose()
        })
        .await
    }

    async fn put_doc<T: Serialize>(
        &self,
        collection: &'static str,
        id: &str,
        created_at: String,
        doc: &T,
    ) -> Result<(), StoreError> {
        let body = encode(collection, id, doc)?;
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO documents (collection, id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![collection, id, body, created_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_docs<T>(&self, collection: &'static str) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, body FROM documents WHERE collection = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, body) = row?;
                out.push(decode(collection, &id, &body)?);
            }
            Ok(out)
        })
        .await
    }
}

fn read_replica(conn: &Connection, session_id: &str) -> Result<Option<SessionRealtime>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM realtime WHERE id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|b| decode(REALTIME, session_id, &b)).transpose()
}

fn write_replica(conn: &Connection, realtime: &SessionRealtime) -> Result<(), StoreError> {
    let body = encode(REALTIME, &realtime.id, realtime)?;
    conn.execute(
        "INSERT OR REPLACE INTO realtime (id, body) VALUES (?1, ?2)",
        params![realtime.id, body],
    )?;
    Ok(())
}

fn encode<T: Serialize>(collection: &'static str, id: &str, doc: &T) -> Result<String, StoreError> {
    serde_json::to_string(doc).map_err(|e| StoreError::Corrupt {
        collection,
        id: id.to_string(),
        message: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(collection: &'static str, id: &str, body: &str) -> Result<T, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
        collection,
        id: id.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl DocumentStore for Database {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.get_doc(SESSIONS, id).await
    }

    async fn put_session(&self, session: &Session) -> Result<(), StoreError> {
        self.put_doc(SESSIONS, &session.id, session.created_at.to_rfc3339(), session)
            .await
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![SESSIONS, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn query_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StoreError> {
        Ok(query.apply(self.list_docs::<Session>(SESSIONS).await?))
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.get_doc(USERS, id).await
    }

    async fn put_user(&self, user: &User) -> Result<(), StoreError> {
        self.put_doc(USERS, &user.id, user.created_at.to_rfc3339(), user)
            .await
    }

    async fn put_task_group(&self, group: &TaskGroup) -> Result<(), StoreError> {
        self.put_doc(TASK_GROUPS, &group.id, group.created_at.to_rfc3339(), group)
            .await
    }

    async fn task_groups_by_creator(&self, creator: &str) -> Result<Vec<TaskGroup>, StoreError> {
        Ok(self
            .list_docs::<TaskGroup>(TASK_GROUPS)
            .await?
            .into_iter()
            .filter(|g| g.creator == creator)
            .collect())
    }
}

#[async_trait]
impl RealtimeStore for Database {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRealtime>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| read_replica(conn, &session_id))
            .await
    }

    async fn put(&self, realtime: &SessionRealtime) -> Result<(), StoreError> {
        let replica = realtime.clone();
        let previous = self
            .with_conn(move |conn| {
                let previous = read_replica(conn, &replica.id)?;
                write_replica(conn, &replica)?;
                Ok(previous)
            })
            .await?;
        if let Some(previous) = previous {
            self.feed
                .publish_diff(&realtime.id, &previous.member_states, &realtime.member_states);
        }
        Ok(())
    }

    async fn put_merged(
        &self,
        realtime: &SessionRealtime,
        seen: &MemberStates,
    ) -> Result<MemberStates, StoreError> {
        let mut merged = realtime.clone();
        let seen = seen.clone();
        let (previous, merged) = self
            .with_conn(move |conn| {
                let previous = read_replica(conn, &merged.id)?;
                if let Some(stored) = &previous {
                    merge_member_states(&mut merged.member_states, &stored.member_states, &seen);
                }
                write_replica(conn, &merged)?;
                Ok((previous, merged))
            })
            .await?;
        if let Some(previous) = previous {
            self.feed
                .publish_diff(&merged.id, &previous.member_states, &merged.member_states);
        }
        Ok(merged.member_states)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM realtime WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await?;
        self.feed.close(session_id);
        Ok(())
    }

    async fn put_member_state(
        &self,
        session_id: &str,
        state: &MemberState,
    ) -> Result<bool, StoreError> {
        let id = session_id.to_string();
        let state = state.clone();
        let written = self
            .with_conn(move |conn| {
                let Some(mut replica) = read_replica(conn, &id)? else {
                    return Ok(None);
                };
                let before = replica.member_states.clone();
                replica.member_states.insert(state.id.clone(), state);
                write_replica(conn, &replica)?;
                Ok(Some((before, replica.member_states)))
            })
            .await?;
        let Some((before, after)) = written else {
            return Ok(false);
        };
        self.feed.publish_diff(session_id, &before, &after);
        Ok(true)
    }

    fn subscribe(&self, session_id: &str) -> broadcast::Receiver<MemberStateChange> {
        self.feed.subscribe(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Phase, TimerState, Visibility};
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    fn session(id: &str, creator: &str, age_min: i64) -> Session {
        let at = Utc::now() - Duration::minutes(age_min);
        Session {
            id: id.into(),
            name: "Deep Work".into(),
            creator: creator.into(),
            visibility: Visibility::Public,
            join_code: Some("123456".into()),
            status: Phase::Active,
            timer_state: TimerState::Stopped,
            active_count: 0,
            break_count: 0,
            long_break_count: 0,
            member_count: 0,
            members: HashMap::new(),
            created_at: at,
            updated_at: at,
            finished_at: None,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn session_roundtrip_and_query_order() {
        let db = Database::open_memory().unwrap();
        db.put_session(&session("old", "ada", 10)).await.unwrap();
        db.put_session(&session("new", "ada", 1)).await.unwrap();
        db.put_session(&session("bob", "bob", 5)).await.unwrap();

        let found = db.query_sessions(&SessionQuery::for_user("ada")).await.unwrap();
        let ids: Vec<_> = found.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        db.delete_session("old").await.unwrap();
        assert!(db.get_session("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studyroom.db");
        {
            let db = Database::open_at(&path).unwrap();
            let s = session("s1", "ada", 0);
            db.put_session(&s).await.unwrap();
            db.put(&SessionRealtime::for_session(&s, Some(1500))).await.unwrap();
            db.put_user(&User::new("ada", "Ada")).await.unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert!(db.get_session("s1").await.unwrap().is_some());
        assert_eq!(RealtimeStore::get(&db, "s1").await.unwrap().unwrap().time_left, Some(1500));
        assert_eq!(db.get_user("ada").await.unwrap().unwrap().level, 1);
    }

    #[tokio::test]
    async fn merged_put_keeps_member_written_by_client() {
        use crate::model::SessionMember;

        let db = Database::open_memory().unwrap();
        let s = session("s1", "ada", 0);
        let bob = SessionMember {
            id: "bob".into(),
            name: "Bob".into(),
            profile_pict: None,
        };
        let mut rt = SessionRealtime::for_session(&s, Some(1500));
        let mut connected = MemberState::joined(&bob);
        connected.is_connected = true;
        rt.member_states.insert("bob".into(), connected.clone());
        db.put(&rt).await.unwrap();
        let seen = rt.member_states.clone();

        let mut rx = db.subscribe("s1");
        let mut dropped = connected;
        dropped.is_connected = false;
        assert!(db.put_member_state("s1", &dropped).await.unwrap());
        assert!(!rx.recv().await.unwrap().state.is_connected);

        rt.time_left = Some(1499);
        let written = db.put_merged(&rt, &seen).await.unwrap();
        assert!(!written["bob"].is_connected);
        let stored = RealtimeStore::get(&db, "s1").await.unwrap().unwrap();
        assert_eq!(stored.time_left, Some(1499));
        assert!(!stored.member_states["bob"].is_connected);
    }

    #[tokio::test]
    async fn corrupt_body_is_reported() {
        let db = Database::open_memory().unwrap();
        db.conn()
            .unwrap()
            .execute(
                "INSERT INTO documents (collection, id, body, created_at) VALUES ('users', 'x', '{oops', '')",
                [],
            )
            .unwrap();
        assert!(matches!(db.get_user("x").await, Err(StoreError::Corrupt { .. })));
    }
}
