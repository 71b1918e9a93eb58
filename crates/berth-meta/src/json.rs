use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::MetaStore;

/// Load and decode a JSON record, returning it with its revision.
pub async fn get_json<S, T>(store: &S, key: &str) -> Result<Option<(T, u64)>>
where
    S: MetaStore + ?Sized,
    T: DeserializeOwned,
{
    let Some(v) = store.get(key).await? else {
        return Ok(None);
    };
    let record = serde_json::from_slice(&v.value)
        .with_context(|| format!("malformed record at {key}"))?;
    Ok(Some((record, v.revision)))
}

pub async fn put_json<S, T>(store: &S, key: &str, record: &T) -> Result<u64>
where
    S: MetaStore + ?Sized,
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(record)?;
    store.put(key, bytes).await
}
