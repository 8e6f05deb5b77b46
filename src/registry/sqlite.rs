//! Durable instance storage with `SQLite`.

use super::UserInstance;
use super::store::{InstanceStore, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA_VERSION: i32 = 2;

const SELECT_COLUMNS: &str =
    "SELECT user_id, instance_id, server_url, authorization_url, authorized, ready, created_at FROM instances";

pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::InvalidData(format!(
                    "Failed to create data directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = Connection::open(path)?;
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_schema(&db)?;

        Ok(Self { db: Mutex::new(db) })
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(db: &Connection) -> Result<(), StoreError> {
        let version: i32 = db.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            db.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS instances (
                    user_id           TEXT PRIMARY KEY,
                    instance_id       TEXT NOT NULL,
                    server_url        TEXT NOT NULL,
                    authorization_url TEXT NOT NULL,
                    authorized        INTEGER NOT NULL DEFAULT 0,
                    created_at        INTEGER NOT NULL,
                    updated_at        INTEGER NOT NULL
                );

                PRAGMA user_version = 1;
                ",
            )?;
        }

        if version < SCHEMA_VERSION {
            db.execute_batch(
                r"
                ALTER TABLE instances ADD COLUMN ready INTEGER NOT NULL DEFAULT 0;
                PRAGMA user_version = 2;
                ",
            )?;
        }

        Ok(())
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn select_one(db: &Connection, user_id: &str) -> Result<Option<UserInstance>, StoreError> {
    let row = db
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE user_id = ?1"),
            params![user_id],
            row_tuple,
        )
        .optional()?;
    row.map(instance_from_row).transpose()
}

type Row = (String, String, String, String, bool, bool, i64);

fn row_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn instance_from_row(row: Row) -> Result<UserInstance, StoreError> {
    let (user_id, instance_id, server_url, authorization_url, authorized, ready, created_at) = row;
    let created_at = DateTime::<Utc>::from_timestamp(created_at, 0)
        .ok_or_else(|| StoreError::InvalidData(format!("Bad timestamp: {created_at}")))?;
    Ok(UserInstance {
        user_id,
        instance_id,
        server_url,
        authorization_url,
        authorized,
        ready,
        created_at,
    })
}

impl InstanceStore for SqliteStore {
    fn get(&self, user_id: &str) -> Result<Option<UserInstance>, StoreError> {
        let db = self.conn()?;
        select_one(&db, user_id)
    }

    fn insert_if_absent(&self, instance: UserInstance) -> Result<UserInstance, StoreError> {
        let db = self.conn()?;
        let now = Utc::now().timestamp();
        db.execute(
            r"
            INSERT INTO instances
                (user_id, instance_id, server_url, authorization_url, authorized, ready, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id) DO NOTHING
            ",
            params![
                instance.user_id,
                instance.instance_id,
                instance.server_url,
                instance.authorization_url,
                instance.authorized,
                instance.ready,
                instance.created_at.timestamp(),
                now
            ],
        )?;

        select_one(&db, &instance.user_id)?.ok_or_else(|| {
            StoreError::InvalidData(format!("Instance for {} vanished", instance.user_id))
        })
    }

    fn set_authorized(&self, user_id: &str, authorized: bool) -> Result<bool, StoreError> {
        let db = self.conn()?;
        let affected = db.execute(
            "UPDATE instances SET authorized = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![authorized, Utc::now().timestamp(), user_id],
        )?;
        Ok(affected > 0)
    }

    fn set_ready(&self, user_id: &str, ready: bool) -> Result<bool, StoreError> {
        let db = self.conn()?;
        let affected = db.execute(
            "UPDATE instances SET ready = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![ready, Utc::now().timestamp(), user_id],
        )?;
        Ok(affected > 0)
    }

    fn list(&self) -> Result<Vec<UserInstance>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("{SELECT_COLUMNS} ORDER BY user_id"))?;
        let rows: Vec<Row> = stmt
            .query_map([], row_tuple)?
            .collect::<Result<_, _>>()?;
        rows.into_iter().map(instance_from_row).collect()
    }
}
