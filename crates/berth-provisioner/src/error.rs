use std::error::Error as _;
use std::time::Duration;

use berth_common::{DescriptorError, WorkerIdentity};

/// Why a worker could not be provisioned.
///
/// Runtime and scheduler causes are kept as the error source, so the full
/// chain is available through [`std::error::Error::source`].
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    InvalidDescriptor(#[from] DescriptorError),

    #[error("image '{image}' does not exist on cloud '{cloud}' and pull is disabled")]
    ImageUnavailable { image: String, cloud: String },

    #[error("failed to make image '{image}' available")]
    ImagePullFailed {
        image: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to register node {identity}")]
    RegistrationFailed {
        identity: WorkerIdentity,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create container {identity}")]
    ContainerCreateFailed {
        identity: WorkerIdentity,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to start container {container_id} for node {identity}")]
    ContainerStartFailed {
        identity: WorkerIdentity,
        container_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("node {identity} was removed while waiting for it to come online")]
    NodeVanished { identity: WorkerIdentity },

    #[error("node {identity} not online after {attempts} attempts ({waited:?})")]
    ProvisioningTimeout {
        identity: WorkerIdentity,
        attempts: u32,
        waited: Duration,
    },

    #[error("node {identity} came online but the connect request failed")]
    ConnectFailed {
        identity: WorkerIdentity,
        #[source]
        source: anyhow::Error,
    },

    #[error("provisioning of node {identity} was cancelled")]
    Cancelled { identity: WorkerIdentity },
}

impl ProvisionError {
    /// Stable snake_case code for the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::InvalidDescriptor(_) => "invalid_descriptor",
            ProvisionError::ImageUnavailable { .. } => "image_unavailable",
            ProvisionError::ImagePullFailed { .. } => "image_pull_failed",
            ProvisionError::RegistrationFailed { .. } => "registration_failed",
            ProvisionError::ContainerCreateFailed { .. } => "container_create_failed",
            ProvisionError::ContainerStartFailed { .. } => "container_start_failed",
            ProvisionError::NodeVanished { .. } => "node_vanished",
            ProvisionError::ProvisioningTimeout { .. } => "provisioning_timeout",
            ProvisionError::ConnectFailed { .. } => "connect_failed",
            ProvisionError::Cancelled { .. } => "cancelled",
        }
    }

    /// Configuration errors fail before anything external is touched.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ProvisionError::InvalidDescriptor(_) | ProvisionError::ImageUnavailable { .. }
        )
    }

    /// The error message followed by every underlying cause.
    pub fn cause_chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}
