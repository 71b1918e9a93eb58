use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cloud::CloudContext;
use crate::image::{ExecutionMode, ImageDescriptor};

/// Unique name shared by a worker's container and its scheduler node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerIdentity(String);

impl WorkerIdentity {
    /// Mint a fresh identity. Every provisioning attempt gets its own, so a
    /// container left over from a failed attempt can never collide with it.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WorkerIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scheduler-side record of a worker that is not yet handed to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingNode {
    pub identity: WorkerIdentity,
    /// Name of the descriptor the node was launched from.
    #[serde(default)]
    pub image_name: String,
    pub description: String,
    pub remote_root: String,
    pub mode: ExecutionMode,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backing_container_id: Option<String>,
}

impl PendingNode {
    pub fn for_descriptor(
        identity: WorkerIdentity,
        cloud: &CloudContext,
        image: &ImageDescriptor,
    ) -> Self {
        let description = format!(
            "Container built from image config '{}' using image '{}' running in the '{}' cloud.",
            image.name, image.image, cloud.name
        );
        Self {
            identity,
            image_name: image.name.clone(),
            description,
            remote_root: image.remote_root.clone(),
            mode: image.mode,
            labels: image.label_set(),
            backing_container_id: None,
        }
    }
}

/// A container created by the runtime on behalf of one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub identity: WorkerIdentity,
}

/// A provisioned worker whose agent is connected to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerNode {
    pub node: PendingNode,
    pub container: ContainerHandle,
    pub callback_url: String,
}

impl WorkerNode {
    pub fn identity(&self) -> &WorkerIdentity {
        &self.node.identity
    }

    pub fn container_id(&self) -> &str {
        &self.container.id
    }
}
