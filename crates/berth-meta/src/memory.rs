use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use tokio::sync::RwLock;

use crate::types::{CasOutcome, MetaStore, Versioned};

/// Process-local store, used when no etcd endpoint is configured and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetaStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    kv: BTreeMap<String, Versioned>,
}

impl Inner {
    fn next_revision(&mut self) -> u64 {
        self.revision = self.revision.saturating_add(1);
        self.revision
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MetaStore for MemoryMetaStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let revision = inner.next_revision();
        inner.kv.insert(key.to_string(), Versioned { value, revision });
        Ok(revision)
    }

    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let inner = self.inner.read().await;
        Ok(inner.kv.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.kv.remove(key).is_some();
        if existed {
            inner.next_revision();
        }
        Ok(existed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let keys = inner.keys_with_prefix(prefix);
        for k in &keys {
            inner.kv.remove(k);
        }
        if !keys.is_empty() {
            inner.next_revision();
        }
        Ok(keys.len() as u64)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>> {
        let inner = self.inner.read().await;
        Ok(inner
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.write().await;
        let current_revision = inner.kv.get(key).map(|v| v.revision).unwrap_or(0);
        if current_revision != expected_revision {
            return Ok(CasOutcome::Conflict { current_revision });
        }
        let revision = inner.next_revision();
        inner.kv.insert(key.to_string(), Versioned { value, revision });
        Ok(CasOutcome::Swapped { revision })
    }
}
