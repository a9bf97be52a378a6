//! SQLite-backed [`Store`].

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_protocol::{Message, PhoneNumber};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use crate::{Store, StoreError, User, schema};

/// A [`Store`] over a single SQLite connection.
///
/// Statements are short, so one connection behind a mutex is enough; each
/// call runs on Tokio's blocking pool so the async workers never wait on
/// disk I/O. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `path` and provisions the
    /// schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::info!(path = %path.as_ref().display(), journal_mode = %mode, "database opened");
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let millis: i64 = row.get(4)?;
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, millis))?;
    Ok(Message {
        id: row.get(0)?,
        sender: PhoneNumber::new(row.get::<_, String>(1)?),
        receiver: PhoneNumber::new(row.get::<_, String>(2)?),
        content: row.get(3)?,
        timestamp,
    })
}

impl Store for SqliteStore {
    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO users (phone_number, username, password, salt)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.phone.as_str(),
                    user.username,
                    user.password_hash,
                    user.salt
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict(user.phone))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn find_user(&self, phone: &PhoneNumber) -> Result<Option<User>, StoreError> {
        let phone = phone.clone();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT phone_number, username, password, salt
                     FROM users WHERE phone_number = ?1",
                    [phone.as_str()],
                    |row| {
                        Ok(User {
                            phone: PhoneNumber::new(row.get::<_, String>(0)?),
                            username: row.get(1)?,
                            password_hash: row.get(2)?,
                            salt: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn insert_message(
        &self,
        sender: &PhoneNumber,
        receiver: &PhoneNumber,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Message, StoreError> {
        let sender = sender.clone();
        let receiver = receiver.clone();
        let content = content.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (sender, receiver, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    sender.as_str(),
                    receiver.as_str(),
                    content,
                    timestamp.timestamp_millis()
                ],
            )?;
            Ok(Message {
                id: conn.last_insert_rowid(),
                sender,
                receiver,
                content,
                timestamp,
            })
        })
        .await
    }

    async fn query_messages(
        &self,
        a: &PhoneNumber,
        b: &PhoneNumber,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError> {
        let a = a.clone();
        let b = b.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, sender, receiver, content, timestamp FROM messages
                 WHERE ((sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1))
                   AND timestamp >= ?3
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let messages = stmt
                .query_map(
                    params![a.as_str(), b.as_str(), since.timestamp_millis()],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn user(phone: &str, name: &str) -> User {
        User {
            phone: phone.into(),
            username: name.into(),
            password_hash: vec![1, 2, 3],
            salt: vec![9; 24],
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[tokio::test]
    async fn test_insert_user_then_find_returns_same_user() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_user(user("111-111", "Alice")).await.unwrap();

        let found = store.find_user(&"111-111".into()).await.unwrap();
        assert_eq!(found, Some(user("111-111", "Alice")));
    }

    #[tokio::test]
    async fn test_find_user_unknown_returns_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.find_user(&"999-999".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_user_duplicate_returns_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_user(user("111-111", "Alice")).await.unwrap();

        let result = store.insert_user(user("111-111", "Mallory")).await;
        assert!(
            matches!(&result, Err(StoreError::Conflict(p)) if p.as_str() == "111-111"),
            "got {result:?}"
        );
        let kept = store.find_user(&"111-111".into()).await.unwrap().unwrap();
        assert_eq!(kept.username, "Alice");
    }

    #[tokio::test]
    async fn test_insert_message_assigns_increasing_ids() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = PhoneNumber::from("111-111");
        let b = PhoneNumber::from("222-222");

        let first = store.insert_message(&a, &b, "one", at(1_000)).await.unwrap();
        let second = store.insert_message(&b, &a, "two", at(1_000)).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(second.sender, b);
        assert_eq!(second.timestamp, at(1_000));
    }

    #[tokio::test]
    async fn test_query_messages_returns_both_directions_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = PhoneNumber::from("111-111");
        let b = PhoneNumber::from("222-222");
        let c = PhoneNumber::from("333-333");

        store.insert_message(&a, &b, "a->b", at(2_000)).await.unwrap();
        store.insert_message(&b, &a, "b->a", at(1_000)).await.unwrap();
        store.insert_message(&a, &c, "a->c", at(1_500)).await.unwrap();

        let messages = store.query_messages(&b, &a, at(0)).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["b->a", "a->b"]);
    }

    #[tokio::test]
    async fn test_query_messages_since_is_inclusive_lower_bound() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = PhoneNumber::from("111-111");
        let b = PhoneNumber::from("222-222");

        store.insert_message(&a, &b, "old", at(1_000)).await.unwrap();
        store.insert_message(&a, &b, "edge", at(2_000)).await.unwrap();
        store.insert_message(&a, &b, "new", at(3_000)).await.unwrap();

        let messages = store.query_messages(&a, &b, at(2_000)).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["edge", "new"]);
    }

    #[tokio::test]
    async fn test_query_messages_same_millisecond_ordered_by_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = PhoneNumber::from("111-111");
        let b = PhoneNumber::from("222-222");
        let now = Utc::now();

        for i in 0..5 {
            store
                .insert_message(&a, &b, &i.to_string(), now)
                .await
                .unwrap();
        }

        let messages = store
            .query_messages(&a, &b, now - TimeDelta::seconds(1))
            .await
            .unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(messages.len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_all_persist() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = PhoneNumber::from("111-111");
        let b = PhoneNumber::from("222-222");

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let (a, b) = (a.clone(), b.clone());
            tasks.push(tokio::spawn(async move {
                store
                    .insert_message(&a, &b, &format!("m{i}"), at(i))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let messages = store.query_messages(&a, &b, at(0)).await.unwrap();
        assert_eq!(messages.len(), 20);
    }

    #[tokio::test]
    async fn test_open_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_user(user("111-111", "Alice")).await.unwrap();
            store
                .insert_message(&"111-111".into(), &"222-222".into(), "hello", at(5))
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.find_user(&"111-111".into()).await.unwrap().is_some());
        let messages = reopened
            .query_messages(&"222-222".into(), &"111-111".into(), at(0))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
    }
}
