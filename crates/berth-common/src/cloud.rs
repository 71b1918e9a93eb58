use serde::{Deserialize, Serialize};

use crate::image::ImageDescriptor;

/// The provider instance a worker is launched through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudContext {
    /// Display identity of the provider, e.g. "docker-local".
    pub name: String,

    /// Container runtime endpoint, e.g. "unix:///var/run/docker.sock".
    /// `None` means the runtime's own default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_endpoint: Option<String>,

    /// Where the in-container bootstrap downloads the worker agent from.
    pub agent_url: String,
}

impl CloudContext {
    pub fn new(name: impl Into<String>, agent_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime_endpoint: None,
            agent_url: agent_url.into(),
        }
    }
}

/// One worker wanted: submitted once per unit of capacity.
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub cloud: CloudContext,
    pub image: ImageDescriptor,
}
