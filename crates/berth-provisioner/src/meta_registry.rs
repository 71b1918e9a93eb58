use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use berth_common::{ContainerHandle, PendingNode, WorkerIdentity};
use berth_meta::{get_json, put_json, CasOutcome, MetaStore};

use crate::registry::{ChannelStatus, NodeHandle, NodeRegistry};

pub const WORKERS_PREFIX: &str = "/workers/";

/// Attempts at a read-modify-write of a node record before giving up.
const CAS_RETRIES: u32 = 3;

fn worker_prefix(identity: &WorkerIdentity) -> String {
    format!("{WORKERS_PREFIX}{identity}/")
}

fn node_key(identity: &WorkerIdentity) -> String {
    format!("{WORKERS_PREFIX}{identity}/node")
}

fn channel_key(identity: &WorkerIdentity) -> String {
    format!("{WORKERS_PREFIX}{identity}/channel")
}

fn reconnect_key(identity: &WorkerIdentity) -> String {
    format!("{WORKERS_PREFIX}{identity}/reconnect")
}

/// Stored under `/workers/{identity}/node`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRecord {
    pub node: PendingNode,
    pub registered_at: DateTime<Utc>,
}

/// Stored under `/workers/{identity}/channel`, written when the agent checks in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRecord {
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReconnectRequest {
    requested_at: DateTime<Utc>,
}

/// Node registry kept in a [`MetaStore`]; agents report their connection
/// through [`MetaNodeRegistry::record_check_in`].
#[derive(Clone)]
pub struct MetaNodeRegistry {
    store: Arc<dyn MetaStore>,
    public_url: String,
}

impl MetaNodeRegistry {
    /// `public_url` is the externally reachable base URL of the agent
    /// check-in endpoint.
    pub fn new(store: Arc<dyn MetaStore>, public_url: impl Into<String>) -> Self {
        Self {
            store,
            public_url: public_url.into(),
        }
    }

    pub fn callback_url_for(&self, identity: &WorkerIdentity) -> String {
        format!(
            "{}/v1/workers/{}/agent",
            self.public_url.trim_end_matches('/'),
            identity
        )
    }

    fn handle(&self, identity: WorkerIdentity) -> Arc<dyn NodeHandle> {
        Arc::new(MetaNode {
            callback_url: self.callback_url_for(&identity),
            store: self.store.clone(),
            identity,
        })
    }

    pub async fn list_nodes(&self) -> anyhow::Result<Vec<NodeRecord>> {
        let mut out = Vec::new();
        for (key, v) in self.store.list_prefix(WORKERS_PREFIX).await? {
            if !key.ends_with("/node") {
                continue;
            }
            match serde_json::from_slice::<NodeRecord>(&v.value) {
                Ok(r) => out.push(r),
                Err(e) => tracing::warn!(%key, error=%e, "skipping malformed node record"),
            }
        }
        Ok(out)
    }

    pub async fn get_record(&self, identity: &WorkerIdentity) -> anyhow::Result<Option<NodeRecord>> {
        Ok(get_json::<_, NodeRecord>(&*self.store, &node_key(identity))
            .await?
            .map(|(r, _)| r))
    }

    /// Record an agent check-in. Returns `false` if the node is not registered.
    pub async fn record_check_in(&self, identity: &WorkerIdentity) -> anyhow::Result<bool> {
        if self.store.get(&node_key(identity)).await?.is_none() {
            return Ok(false);
        }
        let key = channel_key(identity);
        let channel = ChannelRecord {
            online: true,
            since: Some(Utc::now()),
        };
        put_json(&*self.store, &key, &channel).await?;
        // A deregistration between the check and the write leaves the channel
        // behind; one after the re-check sweeps it with the prefix.
        if self.store.get(&node_key(identity)).await?.is_none() {
            self.store.delete(&key).await?;
            tracing::debug!(%identity, "node deregistered during check-in");
            return Ok(false);
        }
        tracing::info!(%identity, "agent checked in");
        Ok(true)
    }
}

#[async_trait]
impl NodeRegistry for MetaNodeRegistry {
    async fn register_node(&self, node: &PendingNode) -> anyhow::Result<Arc<dyn NodeHandle>> {
        let identity = &node.identity;
        let record = NodeRecord {
            node: node.clone(),
            registered_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record)?;
        match self.store.compare_and_swap(&node_key(identity), 0, bytes).await? {
            CasOutcome::Swapped { .. } => {}
            CasOutcome::Conflict { .. } => anyhow::bail!("node {identity} is already registered"),
        }
        let channel = put_json(&*self.store, &channel_key(identity), &ChannelRecord::default())
            .await
            .context("initializing connection channel");
        if let Err(e) = channel {
            if let Err(undo) = self.store.delete_prefix(&worker_prefix(identity)).await {
                tracing::warn!(%identity, error=%undo, "failed to retract partial registration");
            }
            return Err(e);
        }
        Ok(self.handle(identity.clone()))
    }

    async fn get_node(
        &self,
        identity: &WorkerIdentity,
    ) -> anyhow::Result<Option<Arc<dyn NodeHandle>>> {
        if self.store.get(&node_key(identity)).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.handle(identity.clone())))
    }

    async fn deregister_node(&self, identity: &WorkerIdentity) -> anyhow::Result<()> {
        let removed = self.store.delete_prefix(&worker_prefix(identity)).await?;
        if removed == 0 {
            tracing::debug!(%identity, "node already deregistered");
        } else {
            tracing::info!(%identity, "node deregistered");
        }
        Ok(())
    }
}

struct MetaNode {
    store: Arc<dyn MetaStore>,
    identity: WorkerIdentity,
    callback_url: String,
}

#[async_trait]
impl NodeHandle for MetaNode {
    fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    fn callback_url(&self) -> String {
        self.callback_url.clone()
    }

    async fn connection_channel(&self) -> anyhow::Result<ChannelStatus> {
        let channel = get_json::<_, ChannelRecord>(&*self.store, &channel_key(&self.identity))
            .await?
            .map(|(c, _)| c)
            .unwrap_or_default();
        Ok(ChannelStatus {
            online: channel.online,
        })
    }

    async fn request_connect(&self, force: bool) -> anyhow::Result<()> {
        if force {
            let request = ReconnectRequest {
                requested_at: Utc::now(),
            };
            put_json(&*self.store, &reconnect_key(&self.identity), &request).await?;
            put_json(&*self.store, &channel_key(&self.identity), &ChannelRecord::default()).await?;
            return Ok(());
        }
        if !self.connection_channel().await?.online {
            anyhow::bail!("node {} has no live agent connection", self.identity);
        }
        Ok(())
    }

    async fn attach_container(&self, container: &ContainerHandle) -> anyhow::Result<()> {
        let key = node_key(&self.identity);
        for _ in 0..CAS_RETRIES {
            let Some((mut record, revision)) = get_json::<_, NodeRecord>(&*self.store, &key).await?
            else {
                anyhow::bail!("node {} is no longer registered", self.identity);
            };
            record.node.backing_container_id = Some(container.id.clone());
            let bytes = serde_json::to_vec(&record)?;
            if self.store.compare_and_swap(&key, revision, bytes).await?.swapped() {
                return Ok(());
            }
        }
        anyhow::bail!("node {} record kept changing while attaching container", self.identity)
    }
}
