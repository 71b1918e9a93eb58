pub mod cloud;
pub mod image;
pub mod worker;

pub use cloud::{CloudContext, ProvisioningRequest};
pub use image::{DescriptorError, ExecutionMode, ImageDescriptor, PullPolicy};
pub use worker::{ContainerHandle, PendingNode, WorkerIdentity, WorkerNode};

pub mod telemetry;
