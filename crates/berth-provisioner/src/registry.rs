use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use berth_common::{ContainerHandle, PendingNode, WorkerIdentity};

/// State of a node's agent connection as seen by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub online: bool,
}

/// A node registered with the scheduler.
#[async_trait]
pub trait NodeHandle: Send + Sync {
    fn identity(&self) -> &WorkerIdentity;

    /// Address the in-container agent phones home to. Available as soon as
    /// the node is registered.
    fn callback_url(&self) -> String;

    async fn connection_channel(&self) -> anyhow::Result<ChannelStatus>;

    /// Ask the scheduler to (re)connect the node. A non-forced request leaves a
    /// live session alone and fails if there is none.
    async fn request_connect(&self, force: bool) -> anyhow::Result<()>;

    /// Record the container backing this node.
    async fn attach_container(&self, container: &ContainerHandle) -> anyhow::Result<()>;
}

/// The scheduler's node registry, injected into the provisioner.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn register_node(&self, node: &PendingNode) -> anyhow::Result<Arc<dyn NodeHandle>>;

    /// `Ok(None)` when the node is not (or no longer) registered.
    async fn get_node(&self, identity: &WorkerIdentity)
        -> anyhow::Result<Option<Arc<dyn NodeHandle>>>;

    /// Remove a node. Removing a node that is already gone succeeds.
    async fn deregister_node(&self, identity: &WorkerIdentity) -> anyhow::Result<()>;
}
