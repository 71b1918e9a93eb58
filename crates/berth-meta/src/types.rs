use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A stored value together with the revision that last modified it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped { revision: u64 },
    /// The key was modified since `expected_revision`; 0 means it is absent.
    Conflict { current_revision: u64 },
}

impl CasOutcome {
    pub fn swapped(&self) -> bool {
        matches!(self, CasOutcome::Swapped { .. })
    }
}

/// Revisioned key-value store backing the worker registry.
///
/// A missing key has revision 0, so `compare_and_swap(key, 0, ..)` is an
/// atomic create-if-absent.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64>;
    async fn get(&self, key: &str) -> Result<Option<Versioned>>;

    /// Returns whether the key existed. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Returns the number of keys removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>>;

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome>;
}
