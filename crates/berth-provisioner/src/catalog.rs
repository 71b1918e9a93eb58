use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use berth_common::{
    DescriptorError, ImageDescriptor, ProvisioningRequest, WorkerIdentity, WorkerNode,
};

use crate::error::ProvisionError;
use crate::orchestrator::Provisioner;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("image descriptor '{0}' is defined more than once")]
    Duplicate(String),

    #[error(transparent)]
    Invalid(#[from] DescriptorError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("unknown image descriptor '{0}'")]
    UnknownImage(String),

    #[error("image descriptor '{image}' is at its instance cap of {cap}")]
    AtCapacity { image: String, cap: u32 },
}

/// Configured descriptors plus per-descriptor counts of workers that are
/// being provisioned or are live.
pub struct Catalog {
    images: BTreeMap<String, ImageDescriptor>,
    in_use: Arc<DashMap<String, u32>>,
    owners: DashMap<WorkerIdentity, String>,
}

impl Catalog {
    pub fn from_descriptors(descriptors: Vec<ImageDescriptor>) -> Result<Self, CatalogError> {
        let mut images = BTreeMap::new();
        for d in descriptors {
            d.validate()?;
            if images.contains_key(&d.name) {
                return Err(CatalogError::Duplicate(d.name));
            }
            images.insert(d.name.clone(), d);
        }
        Ok(Self {
            images,
            in_use: Arc::new(DashMap::new()),
            owners: DashMap::new(),
        })
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let descriptors: Vec<ImageDescriptor> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self::from_descriptors(descriptors)?)
    }

    pub fn get(&self, name: &str) -> Option<&ImageDescriptor> {
        self.images.get(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ImageDescriptor> {
        self.images.values()
    }

    pub fn in_use(&self, name: &str) -> u32 {
        self.in_use.get(name).map(|c| *c).unwrap_or(0)
    }

    /// Reserve one slot under the descriptor's instance cap. The slot is
    /// returned on drop unless handed to [`Catalog::bind`].
    pub fn try_acquire(&self, name: &str) -> Result<Slot, AdmissionError> {
        let Some(descriptor) = self.images.get(name) else {
            return Err(AdmissionError::UnknownImage(name.to_string()));
        };
        let mut count = self.in_use.entry(name.to_string()).or_insert(0);
        if *count >= descriptor.instance_cap {
            return Err(AdmissionError::AtCapacity {
                image: name.to_string(),
                cap: descriptor.instance_cap,
            });
        }
        *count += 1;
        Ok(Slot {
            counts: Arc::clone(&self.in_use),
            image: name.to_string(),
            armed: true,
        })
    }

    /// Keep the slot for as long as `identity` is live.
    pub fn bind(&self, mut slot: Slot, identity: WorkerIdentity) {
        slot.armed = false;
        self.owners.insert(identity, slot.image.clone());
    }

    /// Count a worker that is already live, e.g. one left registered by an
    /// earlier run. Returns `false` if its descriptor is no longer configured.
    pub fn restore(&self, identity: WorkerIdentity, image: &str) -> bool {
        if !self.images.contains_key(image) {
            return false;
        }
        if self.owners.contains_key(&identity) {
            return true;
        }
        *self.in_use.entry(image.to_string()).or_insert(0) += 1;
        self.owners.insert(identity, image.to_string());
        true
    }

    /// Provision an admitted request on its own task. The slot moves with the
    /// task: it is bound to the worker on success and returned on failure,
    /// whether or not the caller is still waiting on the handle.
    pub fn spawn_admitted(
        self: &Arc<Self>,
        provisioner: &Arc<Provisioner>,
        slot: Slot,
        request: ProvisioningRequest,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<WorkerNode, ProvisionError>> {
        let catalog = Arc::clone(self);
        let provisioner = Arc::clone(provisioner);
        tokio::spawn(async move {
            let result = provisioner
                .provision_with_cancel(&request.cloud, &request.image, cancel)
                .await;
            if let Ok(worker) = &result {
                catalog.bind(slot, worker.identity().clone());
            }
            result
        })
    }

    /// Give back the slot held by `identity`. Returns `false` if it held none.
    pub fn release(&self, identity: &WorkerIdentity) -> bool {
        let Some((_, image)) = self.owners.remove(identity) else {
            return false;
        };
        decrement(&self.in_use, &image);
        true
    }
}

/// A reserved unit of capacity for one provisioning attempt.
#[derive(Debug)]
pub struct Slot {
    counts: Arc<DashMap<String, u32>>,
    image: String,
    armed: bool,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.armed {
            decrement(&self.counts, &self.image);
        }
    }
}

fn decrement(counts: &DashMap<String, u32>, image: &str) {
    if let Some(mut count) = counts.get_mut(image) {
        *count = count.saturating_sub(1);
    }
}
