use std::sync::Arc;

use anyhow::Result;
use etcd_client::{Client, Compare, CompareOp, DeleteOptions, GetOptions, Txn, TxnOp};
use tokio::sync::Mutex;

use crate::types::{CasOutcome, MetaStore, Versioned};

#[derive(Clone)]
pub struct EtcdMetaStore {
    client: Arc<Mutex<Client>>,
}

impl EtcdMetaStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let c = Client::connect(endpoints, None).await?;
        Ok(Self {
            client: Arc::new(Mutex::new(c)),
        })
    }
}

#[async_trait::async_trait]
impl MetaStore for EtcdMetaStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        let mut cli = self.client.lock().await;
        let resp = cli.put(key, value, None).await?;
        let rev = resp.header().map(|h| h.revision()).unwrap_or_default();
        Ok(rev as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let mut cli = self.client.lock().await;
        let resp = cli.get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| Versioned {
            value: kv.value().to_vec(),
            revision: kv.mod_revision() as u64,
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut cli = self.client.lock().await;
        let resp = cli.delete(key, None).await?;
        Ok(resp.deleted() > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut cli = self.client.lock().await;
        let resp = cli
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await?;
        Ok(resp.deleted().max(0) as u64)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>> {
        let mut cli = self.client.lock().await;
        let resp = cli
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        let mut out = Vec::new();
        for kv in resp.kvs() {
            let k = String::from_utf8_lossy(kv.key()).to_string();
            out.push((
                k,
                Versioned {
                    value: kv.value().to_vec(),
                    revision: kv.mod_revision() as u64,
                },
            ));
        }
        Ok(out)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        let mut cli = self.client.lock().await;

        let cmp = Compare::mod_revision(key, CompareOp::Equal, expected_revision as i64);
        let put = TxnOp::put(key, value, None);
        let txn = Txn::new().when([cmp]).and_then([put]).or_else([]);
        let resp = cli.txn(txn).await?;

        if resp.succeeded() {
            let revision = resp.header().map(|h| h.revision()).unwrap_or_default() as u64;
            return Ok(CasOutcome::Swapped { revision });
        }

        let current = cli.get(key, None).await?;
        let current_revision = current
            .kvs()
            .first()
            .map(|kv| kv.mod_revision() as u64)
            .unwrap_or(0);
        Ok(CasOutcome::Conflict { current_revision })
    }
}
