use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use dcp_common::{EntityKey, ProfileRecord};

use super::ProfileStore;

/// Process-local store. Each save swaps the whole record under the lock.
#[derive(Default)]
pub struct MemoryProfileStore {
    records: RwLock<HashMap<EntityKey, ProfileRecord>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a record, e.g. to simulate data from an earlier run.
    pub fn with_record(self, record: ProfileRecord) -> Self {
        if let Ok(mut records) = self.records.write() {
            records.insert(record.profile.entity.clone(), record);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load_profile(&self, key: &EntityKey) -> Result<Option<ProfileRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("profile store lock poisoned"))?;
        Ok(records.get(key).cloned())
    }

    async fn save_profile(&self, record: &ProfileRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("profile store lock poisoned"))?;
        let key = record.profile.entity.clone();
        match records.get(&key) {
            Some(current) if current.refreshed_at > record.refreshed_at => {}
            _ => {
                records.insert(key, record.clone());
            }
        }
        Ok(())
    }
}
