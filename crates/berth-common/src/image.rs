use serde::{Deserialize, Serialize};

/// CPU shares applied to descriptors stored before the field existed.
pub const DEFAULT_CPU_SHARES: u64 = 1024;

/// Whether a worker node accepts more than one job at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One job at a time.
    #[default]
    Exclusive,
    /// Multiple concurrent jobs.
    Shared,
}

/// When the runtime should fetch the image from its registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    /// Pull before every launch, even if the image is already present.
    Always,
    /// Pull only when the image is missing on the runtime host.
    #[default]
    IfMissing,
    /// Never pull; a missing image fails the launch.
    Never,
}

/// Launch configuration for one kind of worker.
///
/// Descriptors are loaded from configuration and never mutated while a worker
/// is being provisioned from them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Logical name, unique within a provider.
    pub name: String,

    /// Runtime-resolvable image reference, e.g. "jenkins/agent:jdk17".
    pub image: String,

    /// Filesystem root the agent works in inside the container.
    pub remote_root: String,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Whitespace separated capability labels.
    #[serde(default)]
    pub labels: String,

    /// Maximum number of concurrently provisioned workers.
    #[serde(default = "default_instance_cap")]
    pub instance_cap: u32,

    #[serde(default)]
    pub pull_policy: PullPolicy,

    /// Optional user the container runs as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: u64,
}

fn default_instance_cap() -> u32 {
    u32::MAX
}

fn default_cpu_shares() -> u64 {
    DEFAULT_CPU_SHARES
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor name is required")]
    MissingName,
    #[error("descriptor '{0}': image reference is required")]
    MissingImage(String),
    #[error("descriptor '{0}': remote root is required")]
    MissingRemoteRoot(String),
    #[error("descriptor '{0}': instance cap must be at least one")]
    InstanceCapTooLow(String),
    #[error("descriptor '{0}': cpu shares must be a positive value")]
    CpuSharesTooLow(String),
}

impl ImageDescriptor {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            remote_root: remote_root.into(),
            mode: ExecutionMode::default(),
            labels: String::new(),
            instance_cap: default_instance_cap(),
            pull_policy: PullPolicy::default(),
            user: None,
            cpu_shares: DEFAULT_CPU_SHARES,
        }
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    pub fn with_labels(mut self, labels: impl Into<String>) -> Self {
        self.labels = labels.into();
        self
    }

    /// Check the invariants every stored descriptor must hold.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.trim().is_empty() {
            return Err(DescriptorError::MissingName);
        }
        if self.image.trim().is_empty() {
            return Err(DescriptorError::MissingImage(self.name.clone()));
        }
        if self.remote_root.trim().is_empty() {
            return Err(DescriptorError::MissingRemoteRoot(self.name.clone()));
        }
        if self.instance_cap < 1 {
            return Err(DescriptorError::InstanceCapTooLow(self.name.clone()));
        }
        if self.cpu_shares < 1 {
            return Err(DescriptorError::CpuSharesTooLow(self.name.clone()));
        }
        Ok(())
    }

    /// Individual labels parsed from the label expression.
    pub fn label_set(&self) -> Vec<String> {
        self.labels.split_whitespace().map(str::to_string).collect()
    }

    pub fn is_unbounded(&self) -> bool {
        self.instance_cap == u32::MAX
    }
}
