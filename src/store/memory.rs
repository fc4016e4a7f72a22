use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::store::{
    lock_poisoned, merge_refresh_token, CredentialRecord, CredentialStore, StoreError,
};

/// Keyed in-memory credential store. Single-process and non-durable;
/// useful for tests and throwaway sessions. Constructed explicitly and
/// handed to the service, never a process-wide singleton.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, CredentialRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl CredentialStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let records = self.records.lock().map_err(lock_poisoned)?;
        Ok(records.get(user_id).cloned())
    }

    async fn upsert(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expiry_date: i64,
    ) -> Result<CredentialRecord, StoreError> {
        let mut records = self.records.lock().map_err(lock_poisoned)?;

        let merged_refresh = merge_refresh_token(records.get(user_id), refresh_token);
        let record = CredentialRecord {
            user_id: user_id.to_string(),
            access_token: Some(access_token.to_string()),
            refresh_token: merged_refresh,
            expiry_date: Some(expiry_date),
        };

        records.insert(user_id.to_string(), record.clone());
        Ok(record)
    }
}
