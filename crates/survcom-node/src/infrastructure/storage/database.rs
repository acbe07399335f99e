//! SQLite-backed directory and peer registry.
//!
//! One file holds both tables:
//!
//! ```text
//! users        id PK, username UNIQUE, public_key, last_seen, created_at, home_server
//! known_nodes  id PK, name, address, port, last_seen, created_at
//! ```
//!
//! Timestamps are milliseconds since the epoch.  `rusqlite` is synchronous,
//! so every call runs on the blocking pool behind a mutex-guarded connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use survcom_core::{Node, NodeId, UserRecord};
use tracing::info;

use crate::application::directory::{DirectoryStore, InsertOutcome, PeerStore, StoreError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id          TEXT PRIMARY KEY,
        username    TEXT NOT NULL UNIQUE,
        public_key  TEXT NOT NULL,
        last_seen   INTEGER,
        created_at  INTEGER NOT NULL,
        home_server TEXT
    );

    CREATE TABLE IF NOT EXISTS known_nodes (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        address     TEXT NOT NULL,
        port        INTEGER NOT NULL,
        last_seen   INTEGER,
        created_at  INTEGER NOT NULL
    );
";

const USER_COLUMNS: &str = "id, username, public_key, last_seen, created_at, home_server";
const NODE_COLUMNS: &str = "id, name, address, port, last_seen, created_at";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `path`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the directory, file or schema
    /// cannot be created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                StoreError::Backend(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(map_sqlite)?;
        let store = Self::with_connection(conn)?;
        info!("opened database at {}", path.display());
        Ok(store)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(map_sqlite)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(map_sqlite)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("database mutex poisoned".to_string()))?;
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("database task failed: {e}")))?
    }
}

/// Maps uniqueness violations to [`StoreError::Duplicate`].
fn map_sqlite(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, message) = &err {
        if code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
            || code.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return StoreError::Duplicate(message.clone().unwrap_or_else(|| code.to_string()));
        }
    }
    StoreError::Backend(err.to_string())
}

fn millis(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    let created_at: i64 = row.get(4)?;
    let last_seen: Option<i64> = row.get(3)?;
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        public_key: row.get(2)?,
        last_seen: last_seen.unwrap_or(created_at).max(0) as u64,
        created_at: created_at.max(0) as u64,
        home_server: row.get(5)?,
    })
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let id: String = row.get(0)?;
    let port: i64 = row.get(3)?;
    let created_at: i64 = row.get(5)?;
    let last_seen: Option<i64> = row.get(4)?;
    Ok(Node {
        id: NodeId::new(id),
        name: row.get(1)?,
        address: row.get(2)?,
        port: u16::try_from(port).unwrap_or_default(),
        last_seen: last_seen.unwrap_or(created_at).max(0) as u64,
        created_at: created_at.max(0) as u64,
    })
}

#[async_trait]
impl DirectoryStore for SqliteStore {
    async fn all_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY rowid"))
                .map_err(map_sqlite)?;
            let rows = stmt.query_map([], user_from_row).map_err(map_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sqlite)
        })
        .await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let username = username.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()
            .map_err(map_sqlite)
        })
        .await
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let user = user.clone();
        self.call(move |conn| {
            conn.execute(
                &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    user.id,
                    user.username,
                    user.public_key,
                    millis(user.last_seen),
                    millis(user.created_at),
                    user.home_server
                ],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
        .await
    }

    async fn insert_user_if_absent(&self, user: &UserRecord) -> Result<InsertOutcome, StoreError> {
        let user = user.clone();
        self.call(move |conn| {
            let written = conn
                .execute(
                    &format!(
                        "INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(id) DO NOTHING"
                    ),
                    params![
                        user.id,
                        user.username,
                        user.public_key,
                        millis(user.last_seen),
                        millis(user.created_at),
                        user.home_server
                    ],
                )
                .map_err(map_sqlite)?;
            Ok(if written == 0 {
                InsertOutcome::AlreadyPresent
            } else {
                InsertOutcome::Inserted
            })
        })
        .await
    }

    async fn touch_user(&self, id: &str, seen_at: u64) -> Result<(), StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE users SET last_seen = ?1 WHERE id = ?2",
                    params![millis(seen_at), id],
                )
                .map_err(map_sqlite)?;
            if updated == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl PeerStore for SqliteStore {
    async fn upsert_node(&self, node: &Node) -> Result<(), StoreError> {
        let node = node.clone();
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO known_nodes ({NODE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                         name = excluded.name,
                         address = excluded.address,
                         port = excluded.port,
                         last_seen = excluded.last_seen
                     WHERE excluded.last_seen >= COALESCE(known_nodes.last_seen, 0)"
                ),
                params![
                    node.id.as_str(),
                    node.name,
                    node.address,
                    node.port,
                    millis(node.last_seen),
                    millis(node.created_at)
                ],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
        .await
    }

    async fn touch_node(&self, id: &NodeId, seen_at: u64) -> Result<(), StoreError> {
        let id = id.as_str().to_string();
        self.call(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE known_nodes SET last_seen = MAX(COALESCE(last_seen, 0), ?1) WHERE id = ?2",
                    params![millis(seen_at), id],
                )
                .map_err(map_sqlite)?;
            if updated == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn all_nodes(&self) -> Result<Vec<Node>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {NODE_COLUMNS} FROM known_nodes ORDER BY rowid"))
                .map_err(map_sqlite)?;
            let rows = stmt.query_map([], node_from_row).map_err(map_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sqlite)
        })
        .await
    }
}
