use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StoreBackend;

pub mod crypto;
pub mod document;
pub mod memory;
pub mod sqlite;

pub use document::DocumentStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential encryption: {0}")]
    Crypto(String),

    #[error("{0}")]
    Config(String),
}

/// One persisted OAuth token bundle per user identity.
///
/// `access_token` is short-lived and nullable until first auth;
/// `refresh_token`, once known, is only ever replaced by a newer one.
/// `expiry_date` is the access token's absolute expiry in epoch
/// milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    pub user_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expiry_date: Option<i64>,
}

#[async_trait(?Send)]
pub trait CredentialStore: Send + Sync {
    fn name(&self) -> &str;

    /// Absence is a valid, expected state; only infrastructure failures
    /// surface as errors.
    async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Insert-or-update merge. When `refresh_token` is `None` the stored
    /// refresh token is preserved: providers only return one on first
    /// consent or an explicit re-prompt, and a known-good refresh token
    /// must never be destroyed by a later exchange that omitted it.
    async fn upsert(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expiry_date: i64,
    ) -> Result<CredentialRecord, StoreError>;
}

pub fn open_store(
    backend: StoreBackend,
    path: Option<&Path>,
) -> Result<Box<dyn CredentialStore>, StoreError> {
    match backend {
        StoreBackend::Memory => Ok(Box::new(MemoryStore::new())),
        StoreBackend::Sqlite => {
            let path = match path {
                Some(path) => path.to_path_buf(),
                None => default_sqlite_path()?,
            };
            Ok(Box::new(SqliteStore::open(&path)?))
        }
        StoreBackend::Document => {
            let dir = match path {
                Some(path) => path.to_path_buf(),
                None => default_document_dir()?,
            };
            Ok(Box::new(DocumentStore::open(&dir)?))
        }
    }
}

pub fn default_sqlite_path() -> Result<PathBuf, StoreError> {
    Ok(data_root()?.join("credentials.db"))
}

pub fn default_document_dir() -> Result<PathBuf, StoreError> {
    Ok(data_root()?.join("credentials"))
}

fn data_root() -> Result<PathBuf, StoreError> {
    let home = dirs::home_dir()
        .ok_or_else(|| StoreError::Config("failed to determine home directory".to_string()))?;
    Ok(home.join(".newsroom"))
}

pub(crate) fn merge_refresh_token(
    previous: Option<&CredentialRecord>,
    incoming: Option<&str>,
) -> Option<String> {
    incoming
        .map(str::to_string)
        .or_else(|| previous.and_then(|record| record.refresh_token.clone()))
}

pub(crate) fn lock_poisoned(_: impl std::fmt::Debug) -> StoreError {
    StoreError::Config("credential store lock poisoned".to_string())
}

/// Serializes tests that mutate process environment (the encryption key).
pub static CRYPTO_ENV_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
mod tests {
    use super::{merge_refresh_token, CredentialRecord};

    fn record(refresh_token: Option<&str>) -> CredentialRecord {
        CredentialRecord {
            user_id: "user-1".to_string(),
            access_token: Some("A1".to_string()),
            refresh_token: refresh_token.map(str::to_string),
            expiry_date: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn merge_keeps_prior_refresh_token_when_incoming_absent() {
        let previous = record(Some("R1"));
        assert_eq!(
            merge_refresh_token(Some(&previous), None).as_deref(),
            Some("R1")
        );
    }

    #[test]
    fn merge_prefers_incoming_refresh_token() {
        let previous = record(Some("R1"));
        assert_eq!(
            merge_refresh_token(Some(&previous), Some("R2")).as_deref(),
            Some("R2")
        );
    }

    #[test]
    fn merge_with_no_prior_record_passes_incoming_through() {
        assert_eq!(merge_refresh_token(None, Some("R1")).as_deref(), Some("R1"));
        assert!(merge_refresh_token(None, None).is_none());
    }

    #[test]
    fn credential_record_serde_round_trip() {
        let record = record(Some("R1"));
        let json = serde_json::to_string(&record).expect("serialize record");
        let decoded: CredentialRecord = serde_json::from_str(&json).expect("deserialize record");
        assert_eq!(decoded, record);
    }
}
