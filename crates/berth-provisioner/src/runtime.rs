use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

/// What the runtime reports about a locally present image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub id: String,
}

/// Everything the runtime needs to create a worker container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerConfig {
    pub image: String,
    pub command: Vec<String>,
    pub cpu_shares: u64,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Container runtime operations the provisioner depends on.
///
/// One instance is shared by every in-flight request, so implementations must
/// be safe to call concurrently.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// `Ok(None)` when the image is not present; errors are reserved for
    /// failures to find out.
    async fn inspect_image(&self, reference: &str) -> anyhow::Result<Option<ImageMetadata>>;

    async fn pull_image(&self, reference: &str) -> anyhow::Result<()>;

    /// Create (without starting) a container and return its id.
    async fn create_container(&self, config: &ContainerConfig, name: &str) -> anyhow::Result<String>;

    async fn start_container(&self, id: &str) -> anyhow::Result<()>;

    /// Stop and remove a container. Removing a missing container is not an error.
    async fn remove_container(&self, id: &str) -> anyhow::Result<()>;
}
