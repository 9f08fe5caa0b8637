//! Persistent SQLite store for users and their conversation history.

use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Fixed-width UTC format so that text ordering equals time ordering.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Errors from the conversation store.
#[derive(Debug)]
pub enum StoreError {
    /// SQLite rejected the statement or the connection failed.
    Sqlite(rusqlite::Error),
    /// A previous holder of the connection panicked.
    Poisoned,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "database error: {e}"),
            Self::Poisoned => write!(f, "database lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Poisoned => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

/// Who wrote a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A known user.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A persisted message. The role is kept raw; callers decide what to do
/// with values they don't recognize.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub text: String,
    pub role: String,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn insert_message(
    conn: &Connection,
    user_id: i64,
    username: &str,
    text: &str,
    role: Role,
    timestamp: DateTime<Utc>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO messages (user_id, username, text, role, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, username, text, role.as_str(), format_timestamp(timestamp)],
    )?;
    let id = conn.last_insert_rowid();
    debug!(
        user_id,
        role = role.as_str(),
        text_len = text.len(),
        message_id = id,
        "Message saved"
    );
    Ok(id)
}

/// SQLite-backed conversation store, shared across tasks.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let db = Self::with_connection(conn)?;
        let (messages, users) = db.counts()?;
        info!("Opened database {:?} ({} messages, {} users)", path, messages, users);
        Ok(db)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute_batch(r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT NOT NULL,
                last_name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users (id),
                username TEXT NOT NULL,
                text TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_user_timestamp ON messages(user_id, timestamp);
        "#)?;
        Ok(())
    }

    fn counts(&self) -> Result<(usize, usize), StoreError> {
        let conn = self.conn()?;
        let messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok((messages as usize, users as usize))
    }

    // ==================== USER METHODS ====================

    /// Insert or overwrite a user. Every column takes the latest value.
    pub fn upsert_user(
        &self,
        id: i64,
        username: Option<&str>,
        first_name: &str,
        last_name: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, username, first_name, last_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                created_at = excluded.created_at",
            params![id, username, first_name, last_name, format_timestamp(Utc::now())],
        )?;
        debug!(user_id = id, "User upserted");
        Ok(())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, username, first_name, last_name, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    let created_at: String = row.get(4)?;
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        first_name: row.get(2)?,
                        last_name: row.get(3)?,
                        created_at: parse_timestamp(4, &created_at)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // ==================== MESSAGE METHODS ====================

    /// Store a message stamped with the current time. Returns its id.
    ///
    /// The stamp never goes below the user's latest row, so a wall clock
    /// stepping backwards cannot reorder history.
    pub fn save_message(
        &self,
        user_id: i64,
        username: &str,
        text: &str,
        role: Role,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(timestamp) FROM messages WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        let mut timestamp = Utc::now();
        if let Some(latest) = latest {
            timestamp = timestamp.max(parse_timestamp(0, &latest)?);
        }
        insert_message(&conn, user_id, username, text, role, timestamp)
    }

    /// Store a message with an explicit timestamp. Returns its id.
    pub fn save_message_at(
        &self,
        user_id: i64,
        username: &str,
        text: &str,
        role: Role,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        insert_message(&conn, user_id, username, text, role, timestamp)
    }

    /// The last `limit` messages of a user, oldest first.
    ///
    /// With `before_id`, only messages with a smaller id are considered,
    /// which keeps the message being answered out of its own history.
    pub fn get_chat_history(
        &self,
        user_id: i64,
        limit: usize,
        before_id: Option<i64>,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, username, text, role, timestamp
             FROM messages
             WHERE user_id = ?1 AND (?2 IS NULL OR id < ?2)
             ORDER BY timestamp DESC, id DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![user_id, before_id, limit as i64], |row| {
            let timestamp: String = row.get(5)?;
            Ok(StoredMessage {
                id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                text: row.get(3)?,
                role: row.get(4)?,
                timestamp: parse_timestamp(5, &timestamp)?,
            })
        })?;

        let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        debug!(user_id, found = messages.len(), "Chat history retrieved");
        Ok(messages)
    }

    /// Delete every message. Users are kept. Returns the number removed.
    pub fn clear_all_chat_history(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM messages", [])?;
        Ok(removed)
    }

    /// Messages stored since midnight UTC.
    pub fn messages_today(&self) -> Result<usize, StoreError> {
        let midnight = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        self.messages_since(midnight)
    }

    pub fn messages_since(&self, since: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE timestamp >= ?1",
            params![format_timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Total message count.
    pub fn message_count(&self) -> Result<usize, StoreError> {
        Ok(self.counts()?.0)
    }

    /// Insert a row bypassing role validation.
    #[cfg(test)]
    pub(crate) fn insert_raw_message(
        &self,
        user_id: i64,
        text: &str,
        role: &str,
        timestamp: DateTime<Utc>,
    ) {
        self.conn()
            .unwrap()
            .execute(
                "INSERT INTO messages (user_id, username, text, role, timestamp)
                 VALUES (?1, 'raw', ?2, ?3, ?4)",
                params![user_id, text, role, format_timestamp(timestamp)],
            )
            .unwrap();
    }

    /// Make every message query fail, for exercising degraded paths.
    #[cfg(test)]
    pub(crate) fn break_messages_table(&self) {
        self.conn().unwrap().execute_batch("DROP TABLE messages").unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db_with_user(user_id: i64) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(user_id, Some("alice"), "Alice", None).unwrap();
        db
    }

    #[test]
    fn test_history_is_chronological_regardless_of_insert_order() {
        let db = db_with_user(100);
        let t1 = Utc::now() - Duration::minutes(3);
        let t2 = t1 + Duration::minutes(1);
        let t3 = t2 + Duration::minutes(1);

        db.save_message_at(100, "alice", "third", Role::User, t3).unwrap();
        db.save_message_at(100, "alice", "first", Role::User, t1).unwrap();
        db.save_message_at(100, "alice", "second", Role::Assistant, t2).unwrap();

        let history = db.get_chat_history(100, 20, None).unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_same_timestamp_ordered_by_id() {
        let db = db_with_user(100);
        let ts = Utc::now();
        db.save_message_at(100, "alice", "a", Role::User, ts).unwrap();
        db.save_message_at(100, "alice", "b", Role::Assistant, ts).unwrap();

        let history = db.get_chat_history(100, 20, None).unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_history_limit_keeps_most_recent() {
        let db = db_with_user(100);
        for i in 0..30 {
            db.save_message(100, "alice", &format!("msg {i}"), Role::User).unwrap();
        }

        let history = db.get_chat_history(100, 20, None).unwrap();
        assert_eq!(history.len(), 20);
        assert_eq!(history.first().unwrap().text, "msg 10");
        assert_eq!(history.last().unwrap().text, "msg 29");
    }

    #[test]
    fn test_history_before_id_excludes_current_message() {
        let db = db_with_user(100);
        db.save_message(100, "alice", "earlier", Role::User).unwrap();
        let current = db.save_message(100, "alice", "now", Role::User).unwrap();

        let history = db.get_chat_history(100, 20, Some(current)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "earlier");
    }

    #[test]
    fn test_history_is_per_user() {
        let db = db_with_user(100);
        db.upsert_user(200, None, "Bob", Some("Smith")).unwrap();
        db.save_message(100, "alice", "mine", Role::User).unwrap();
        db.save_message(200, "Bob", "his", Role::User).unwrap();

        let history = db.get_chat_history(200, 20, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "his");
        assert_eq!(history[0].role(), Some(Role::User));
    }

    #[test]
    fn test_upsert_user_last_write_wins() {
        let db = db_with_user(100);
        let first_seen = db.get_user(100).unwrap().unwrap().created_at;
        db.upsert_user(100, Some("alice_new"), "Alicia", Some("Doe")).unwrap();

        let user = db.get_user(100).unwrap().unwrap();
        assert!(user.created_at >= first_seen);
        assert_eq!(user.username.as_deref(), Some("alice_new"));
        assert_eq!(user.first_name, "Alicia");
        assert_eq!(user.last_name.as_deref(), Some("Doe"));
        assert!(db.get_user(999).unwrap().is_none());
    }

    #[test]
    fn test_save_message_never_stamps_before_latest_row() {
        let db = db_with_user(100);
        let ahead = Utc::now() + Duration::hours(1);
        db.save_message_at(100, "alice", "stamped ahead", Role::User, ahead).unwrap();
        db.save_message(100, "bot", "written after", Role::Assistant).unwrap();

        let history = db.get_chat_history(100, 20, None).unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["stamped ahead", "written after"]);
        assert!(history[1].timestamp >= history[0].timestamp);
    }

    #[test]
    fn test_message_requires_existing_user() {
        let db = Database::open_in_memory().unwrap();
        let result = db.save_message(404, "ghost", "boo", Role::User);
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
    }

    #[test]
    fn test_clear_history_keeps_users() {
        let db = db_with_user(100);
        db.save_message(100, "alice", "one", Role::User).unwrap();
        db.save_message(100, "bot", "two", Role::Assistant).unwrap();

        assert_eq!(db.clear_all_chat_history().unwrap(), 2);
        assert_eq!(db.message_count().unwrap(), 0);
        assert!(db.get_user(100).unwrap().is_some());
    }

    #[test]
    fn test_messages_today_ignores_older_rows() {
        let db = db_with_user(100);
        let two_days_ago = Utc::now() - Duration::days(2);
        db.save_message_at(100, "alice", "old", Role::User, two_days_ago).unwrap();
        db.save_message(100, "alice", "new", Role::User).unwrap();

        assert_eq!(db.messages_today().unwrap(), 1);
    }

    #[test]
    fn test_unknown_role_is_preserved_raw() {
        let db = db_with_user(100);
        db.insert_raw_message(100, "odd", "tool", Utc::now());

        let history = db.get_chat_history(100, 20, None).unwrap();
        assert_eq!(history[0].role, "tool");
        assert_eq!(history[0].role(), None);
    }

    #[test]
    fn test_broken_table_surfaces_error() {
        let db = db_with_user(100);
        db.break_messages_table();
        assert!(db.get_chat_history(100, 20, None).is_err());
    }

    #[test]
    fn test_reopen_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.db");
        {
            let db = Database::open(&path).unwrap();
            db.upsert_user(100, Some("alice"), "Alice", None).unwrap();
            db.save_message(100, "alice", "persisted", Role::User).unwrap();
        }

        let db = Database::open(&path).unwrap();
        let history = db.get_chat_history(100, 20, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "persisted");
    }
}
