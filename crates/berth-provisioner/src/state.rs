use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use berth_common::CloudContext;
use berth_provisioner::{Catalog, ContainerRuntime, MetaNodeRegistry, Provisioner};

#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<Provisioner>,
    pub registry: Arc<MetaNodeRegistry>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub catalog: Arc<Catalog>,
    pub cloud: CloudContext,
    /// Cancelled on shutdown; in-flight provisioning attempts clean up and stop.
    pub shutdown: CancellationToken,
}
