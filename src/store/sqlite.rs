use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::crypto::TokenCipher;
use crate::store::{lock_poisoned, CredentialRecord, CredentialStore, StoreError};

const SCHEMA_VERSION_KEY: &str = "schema_version";
const LATEST_SCHEMA_VERSION: u32 = 1;

/// File-backed relational credential store. One row per user id; the
/// refresh-token merge lives in the upsert SQL so concurrent writers
/// cannot clobber a stored refresh token with NULL.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher: TokenCipher::from_env()?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reveal_optional(&self, stored: Option<String>) -> Result<Option<String>, StoreError> {
        stored.map(|value| self.cipher.reveal(&value)).transpose()
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )?;

    let current_version = current_schema_version(conn)?;
    if current_version > LATEST_SCHEMA_VERSION {
        return Err(StoreError::Config(format!(
            "credential store schema version {current_version} is newer than supported version {LATEST_SCHEMA_VERSION}"
        )));
    }

    if current_version < 1 {
        apply_v1(conn)?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<u32, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1 LIMIT 1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        None => Ok(0),
        Some(version) => version.parse::<u32>().map_err(|_| {
            StoreError::Config(format!("invalid schema version in store: {version}"))
        }),
    }
}

fn apply_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            user_id TEXT PRIMARY KEY,
            access_token TEXT,
            refresh_token TEXT,
            expiry_date INTEGER,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )?;

    conn.execute(
        r#"
        INSERT INTO meta (key, value, updated_at)
        VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
        params![SCHEMA_VERSION_KEY, LATEST_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

#[async_trait(?Send)]
impl CredentialStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let conn = self.conn.lock().map_err(lock_poisoned)?;

        let row: Option<(Option<String>, Option<String>, Option<i64>)> = conn
            .query_row(
                r#"
                SELECT access_token, refresh_token, expiry_date
                FROM credentials
                WHERE user_id = ?1
                LIMIT 1
                "#,
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((access_token, refresh_token, expiry_date)) = row else {
            return Ok(None);
        };

        Ok(Some(CredentialRecord {
            user_id: user_id.to_string(),
            access_token: self.reveal_optional(access_token)?,
            refresh_token: self.reveal_optional(refresh_token)?,
            expiry_date,
        }))
    }

    async fn upsert(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expiry_date: i64,
    ) -> Result<CredentialRecord, StoreError> {
        let sealed_access = self.cipher.protect(access_token)?;
        let sealed_refresh = refresh_token
            .map(|token| self.cipher.protect(token))
            .transpose()?;

        {
            let conn = self.conn.lock().map_err(lock_poisoned)?;
            conn.execute(
                r#"
                INSERT INTO credentials (user_id, access_token, refresh_token, expiry_date, updated_at)
                VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
                ON CONFLICT(user_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = COALESCE(excluded.refresh_token, credentials.refresh_token),
                    expiry_date = excluded.expiry_date,
                    updated_at = excluded.updated_at
                "#,
                params![user_id, sealed_access, sealed_refresh, expiry_date],
            )?;
        }

        let merged = self.get(user_id).await?.ok_or_else(|| {
            StoreError::Config(format!("credential row for {user_id} vanished after upsert"))
        })?;
        Ok(merged)
    }
}
