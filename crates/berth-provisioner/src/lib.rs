pub mod bootstrap;
pub mod catalog;
pub mod docker;
pub mod error;
pub mod image;
pub mod meta_registry;
pub mod orchestrator;
pub mod readiness;
pub mod registry;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use catalog::{AdmissionError, Catalog, CatalogError, Slot};
pub use docker::DockerCli;
pub use error::ProvisionError;
pub use meta_registry::MetaNodeRegistry;
pub use orchestrator::{ProvisionState, Provisioner};
pub use readiness::ReadinessPolicy;
pub use registry::{ChannelStatus, NodeHandle, NodeRegistry};
pub use runtime::{ContainerConfig, ContainerRuntime, ImageMetadata};
