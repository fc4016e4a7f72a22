use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::store::crypto::TokenCipher;
use crate::store::{merge_refresh_token, CredentialRecord, CredentialStore, StoreError};

/// Document-collection credential store: one JSON document per user id
/// under the store directory. Writes go through a temp file and a rename
/// so a crash mid-write never leaves a half-written document behind.
pub struct DocumentStore {
    dir: PathBuf,
    cipher: TokenCipher,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialDocument {
    user_id: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expiry_date: Option<i64>,
    updated_at: String,
}

impl DocumentStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            cipher: TokenCipher::from_env()?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, user_id: &str) -> Result<PathBuf, StoreError> {
        if user_id.is_empty()
            || user_id.contains('/')
            || user_id.contains('\\')
            || user_id.contains("..")
        {
            return Err(StoreError::Config(format!(
                "user id is not a valid document name: {user_id}"
            )));
        }
        Ok(self.dir.join(format!("{user_id}.json")))
    }

    fn read_document(&self, user_id: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let path = self.document_path(user_id)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let document: CredentialDocument = serde_json::from_str(&raw)?;
        Ok(Some(CredentialRecord {
            user_id: document.user_id,
            access_token: self.reveal_optional(document.access_token)?,
            refresh_token: self.reveal_optional(document.refresh_token)?,
            expiry_date: document.expiry_date,
        }))
    }

    fn write_document(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let document = CredentialDocument {
            user_id: record.user_id.clone(),
            access_token: self.protect_optional(record.access_token.as_deref())?,
            refresh_token: self.protect_optional(record.refresh_token.as_deref())?,
            expiry_date: record.expiry_date,
            updated_at: Utc::now().to_rfc3339(),
        };

        let path = self.document_path(&record.user_id)?;
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, serde_json::to_string_pretty(&document)?)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn reveal_optional(&self, stored: Option<String>) -> Result<Option<String>, StoreError> {
        stored.map(|value| self.cipher.reveal(&value)).transpose()
    }

    fn protect_optional(&self, token: Option<&str>) -> Result<Option<String>, StoreError> {
        token.map(|value| self.cipher.protect(value)).transpose()
    }
}

#[async_trait(?Send)]
impl CredentialStore for DocumentStore {
    fn name(&self) -> &str {
        "document"
    }

    async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>, StoreError> {
        self.read_document(user_id)
    }

    async fn upsert(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expiry_date: i64,
    ) -> Result<CredentialRecord, StoreError> {
        let previous = self.read_document(user_id)?;

        let record = CredentialRecord {
            user_id: user_id.to_string(),
            access_token: Some(access_token.to_string()),
            refresh_token: merge_refresh_token(previous.as_ref(), refresh_token),
            expiry_date: Some(expiry_date),
        };

        self.write_document(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::DocumentStore;
    use crate::store::crypto::CREDENTIAL_KEY_ENV;
    use crate::store::{CredentialStore, StoreError, CRYPTO_ENV_LOCK};

    fn temp_store_dir() -> PathBuf {
        std::env::temp_dir().join(format!("newsroom-doc-store-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let _lock = CRYPTO_ENV_LOCK.lock().expect("lock env mutation");
        std::env::remove_var(CREDENTIAL_KEY_ENV);

        let dir = temp_store_dir();
        let store = DocumentStore::open(&dir).expect("open store");

        assert!(store.get("user-1").await.expect("get absent").is_none());

        store
            .upsert("user-1", "A1", Some("R1"), 1_700_000_000_000)
            .await
            .expect("first upsert");
        let merged = store
            .upsert("user-1", "A2", None, 1_700_000_600_000)
            .await
            .expect("second upsert");

        assert_eq!(merged.access_token.as_deref(), Some("A2"));
        assert_eq!(merged.refresh_token.as_deref(), Some("R1"));

        let loaded = store.get("user-1").await.expect("get").expect("exists");
        assert_eq!(loaded, merged);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn user_ids_with_path_separators_are_rejected() {
        let _lock = CRYPTO_ENV_LOCK.lock().expect("lock env mutation");
        std::env::remove_var(CREDENTIAL_KEY_ENV);

        let dir = temp_store_dir();
        let store = DocumentStore::open(&dir).expect("open store");

        let err = store
            .upsert("../escape", "A1", None, 0)
            .await
            .expect_err("must reject");
        assert!(matches!(err, StoreError::Config(_)));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn documents_are_one_file_per_user() {
        let _lock = CRYPTO_ENV_LOCK.lock().expect("lock env mutation");
        std::env::remove_var(CREDENTIAL_KEY_ENV);

        let dir = temp_store_dir();
        let store = DocumentStore::open(&dir).expect("open store");

        store
            .upsert("user-1", "A1", Some("R1"), 1)
            .await
            .expect("upsert user-1");
        store
            .upsert("user-2", "B1", None, 2)
            .await
            .expect("upsert user-2");

        assert!(dir.join("user-1.json").is_file());
        assert!(dir.join("user-2.json").is_file());

        let raw = std::fs::read_to_string(dir.join("user-1.json")).expect("read document");
        assert!(raw.contains("\"user_id\": \"user-1\""));

        let _ = std::fs::remove_dir_all(dir);
    }
}
