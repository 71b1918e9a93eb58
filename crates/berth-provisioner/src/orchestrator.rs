use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use berth_common::{
    CloudContext, ContainerHandle, ImageDescriptor, PendingNode, ProvisioningRequest,
    WorkerIdentity, WorkerNode,
};

use crate::bootstrap::container_config;
use crate::error::ProvisionError;
use crate::image::ensure_image;
use crate::readiness::{await_online, Readiness, ReadinessPolicy};
use crate::registry::NodeRegistry;
use crate::runtime::ContainerRuntime;

/// Upper bound on best-effort cleanup after a failed attempt.
const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    ResolvingImage,
    Registering,
    CreatingContainer,
    StartingContainer,
    AwaitingReady,
    Ready,
    TimedOut,
    Failed,
}

impl ProvisionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProvisionState::Ready | ProvisionState::TimedOut | ProvisionState::Failed
        )
    }
}

/// Per-request bookkeeping: what has been created so far and must be undone
/// if the attempt fails.
struct Attempt {
    identity: WorkerIdentity,
    state: ProvisionState,
    registered: bool,
    container: Option<ContainerHandle>,
}

impl Attempt {
    fn new(identity: WorkerIdentity) -> Self {
        Self {
            identity,
            state: ProvisionState::ResolvingImage,
            registered: false,
            container: None,
        }
    }

    fn enter(&mut self, next: ProvisionState) {
        tracing::debug!(identity=%self.identity, from=?self.state, to=?next, "provisioning state change");
        self.state = next;
    }
}

/// Drives one worker from "wanted" to "connected".
///
/// The runtime and registry are shared by all requests; each call to
/// [`Provisioner::provision`] owns its own identity, node and container.
pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn NodeRegistry>,
    readiness: ReadinessPolicy,
    cleanup_timeout: Duration,
}

impl Provisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<dyn NodeRegistry>) -> Self {
        Self {
            runtime,
            registry,
            readiness: ReadinessPolicy::default(),
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    pub fn readiness(&self) -> &ReadinessPolicy {
        &self.readiness
    }

    pub fn registry(&self) -> &Arc<dyn NodeRegistry> {
        &self.registry
    }

    /// Provision one worker and wait until it is connected.
    pub async fn provision(
        &self,
        cloud: &CloudContext,
        image: &ImageDescriptor,
    ) -> Result<WorkerNode, ProvisionError> {
        self.provision_with_cancel(cloud, image, CancellationToken::new())
            .await
    }

    /// Like [`Provisioner::provision`], but gives up with
    /// [`ProvisionError::Cancelled`] (after cleanup) once `cancel` fires.
    pub async fn provision_with_cancel(
        &self,
        cloud: &CloudContext,
        image: &ImageDescriptor,
        cancel: CancellationToken,
    ) -> Result<WorkerNode, ProvisionError> {
        image.validate()?;

        let identity = WorkerIdentity::generate();
        let span = tracing::info_span!(
            "provision",
            %identity,
            image = %image.name,
            cloud = %cloud.name
        );
        self.run(Attempt::new(identity), cloud, image, &cancel)
            .instrument(span)
            .await
    }

    /// Run a request on its own task so its poll sleeps never hold up others.
    pub fn spawn(
        self: &Arc<Self>,
        request: ProvisioningRequest,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<WorkerNode, ProvisionError>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.provision_with_cancel(&request.cloud, &request.image, cancel)
                .await
        })
    }

    async fn run(
        &self,
        mut attempt: Attempt,
        cloud: &CloudContext,
        image: &ImageDescriptor,
        cancel: &CancellationToken,
    ) -> Result<WorkerNode, ProvisionError> {
        let identity = attempt.identity.clone();

        if cancel.is_cancelled() {
            attempt.enter(ProvisionState::Failed);
            return Err(ProvisionError::Cancelled { identity });
        }
        if let Err(e) = ensure_image(self.runtime.as_ref(), cloud, image).await {
            attempt.enter(ProvisionState::Failed);
            tracing::warn!(error=%e.cause_chain(), "image not available");
            return Err(e);
        }
        if cancel.is_cancelled() {
            attempt.enter(ProvisionState::Failed);
            return Err(ProvisionError::Cancelled { identity });
        }

        // The node has to exist before the container: its callback URL is
        // part of the container's command.
        attempt.enter(ProvisionState::Registering);
        let mut node = PendingNode::for_descriptor(identity.clone(), cloud, image);
        let handle = match self.registry.register_node(&node).await {
            Ok(h) => h,
            Err(source) => {
                attempt.enter(ProvisionState::Failed);
                tracing::warn!(error=%source, "node registration failed");
                return Err(ProvisionError::RegistrationFailed { identity, source });
            }
        };
        attempt.registered = true;
        let callback_url = handle.callback_url();
        tracing::info!(%callback_url, "registered node");

        if cancel.is_cancelled() {
            let err = ProvisionError::Cancelled { identity };
            return Err(self.abandon(&mut attempt, err).await);
        }

        attempt.enter(ProvisionState::CreatingContainer);
        let config = container_config(cloud, image, &identity, &callback_url);
        tracing::info!(image=%config.image, "creating container");
        let container_id = match self.runtime.create_container(&config, identity.as_str()).await {
            Ok(id) => id,
            Err(source) => {
                let err = ProvisionError::ContainerCreateFailed {
                    identity: identity.clone(),
                    source,
                };
                return Err(self.abandon(&mut attempt, err).await);
            }
        };
        let container = ContainerHandle {
            id: container_id,
            identity: identity.clone(),
        };
        attempt.container = Some(container.clone());
        node.backing_container_id = Some(container.id.clone());
        if let Err(e) = handle.attach_container(&container).await {
            tracing::warn!(container_id=%container.id, error=%e, "failed to record container on node");
        }

        if cancel.is_cancelled() {
            let err = ProvisionError::Cancelled { identity };
            return Err(self.abandon(&mut attempt, err).await);
        }

        attempt.enter(ProvisionState::StartingContainer);
        tracing::info!(container_id=%container.id, "starting container");
        if let Err(source) = self.runtime.start_container(&container.id).await {
            let err = ProvisionError::ContainerStartFailed {
                identity: identity.clone(),
                container_id: container.id.clone(),
                source,
            };
            return Err(self.abandon(&mut attempt, err).await);
        }

        attempt.enter(ProvisionState::AwaitingReady);
        let live = match await_online(self.registry.as_ref(), &identity, &self.readiness, cancel).await {
            Readiness::Online(live) => live,
            Readiness::Vanished { .. } => {
                let err = ProvisionError::NodeVanished { identity };
                return Err(self.abandon(&mut attempt, err).await);
            }
            Readiness::TimedOut { attempts, waited } => {
                let err = ProvisionError::ProvisioningTimeout {
                    identity,
                    attempts,
                    waited,
                };
                return Err(self.abandon(&mut attempt, err).await);
            }
            Readiness::Cancelled => {
                let err = ProvisionError::Cancelled { identity };
                return Err(self.abandon(&mut attempt, err).await);
            }
        };

        // "Online" may still describe an earlier session; only a successful
        // connect request proves the new agent is attached.
        if let Err(source) = live.request_connect(false).await {
            let err = ProvisionError::ConnectFailed {
                identity: identity.clone(),
                source,
            };
            return Err(self.abandon(&mut attempt, err).await);
        }

        attempt.enter(ProvisionState::Ready);
        tracing::info!(container_id=%container.id, "worker ready");
        Ok(WorkerNode {
            node,
            container,
            callback_url,
        })
    }

    /// Move to a terminal failure state and undo what the attempt created.
    /// Cleanup problems are logged; `err` is always what the caller sees.
    async fn abandon(&self, attempt: &mut Attempt, err: ProvisionError) -> ProvisionError {
        let terminal = match err {
            ProvisionError::ProvisioningTimeout { .. } => ProvisionState::TimedOut,
            _ => ProvisionState::Failed,
        };
        attempt.enter(terminal);
        tracing::warn!(identity=%attempt.identity, error=%err.cause_chain(), "provisioning failed, cleaning up");

        let cleanup = self.cleanup(attempt);
        if tokio::time::timeout(self.cleanup_timeout, cleanup).await.is_err() {
            tracing::warn!(identity=%attempt.identity, timeout=?self.cleanup_timeout, "cleanup timed out");
        }
        err
    }

    async fn cleanup(&self, attempt: &Attempt) {
        if attempt.registered {
            if let Err(e) = self.registry.deregister_node(&attempt.identity).await {
                tracing::warn!(identity=%attempt.identity, error=%e, "failed to deregister node");
            }
        }
        if let Some(container) = attempt.container.as_ref() {
            if let Err(e) = self.runtime.remove_container(&container.id).await {
                tracing::warn!(container_id=%container.id, error=%e, "failed to remove container");
            }
        }
    }
}
