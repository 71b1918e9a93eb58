//! In-memory runtime and registry used by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use berth_common::{ContainerHandle, PendingNode, WorkerIdentity};

use crate::registry::{ChannelStatus, NodeHandle, NodeRegistry};
use crate::runtime::{ContainerConfig, ContainerRuntime, ImageMetadata};

/// Ordered record of calls made across both fakes.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.events().iter().position(|e| e.starts_with(prefix))
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    images: HashSet<String>,
    pulls: u32,
    created: Vec<(String, ContainerConfig)>,
    started: Vec<String>,
    removed: Vec<String>,
    next_id: Option<String>,
    fail_inspect: Option<String>,
    fail_pull: Option<String>,
    fail_create: Option<String>,
    fail_start: Option<String>,
    fail_remove: Option<String>,
    cancel_on_create: Option<CancellationToken>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<RuntimeState>>,
    pub log: EventLog,
}

impl FakeRuntime {
    pub fn with_image(image: &str) -> Self {
        let rt = Self::default();
        rt.state.lock().unwrap().images.insert(image.to_string());
        rt
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn next_container_id(&self, id: &str) {
        self.state.lock().unwrap().next_id = Some(id.to_string());
    }

    pub fn fail_inspect(&self, msg: &str) {
        self.state.lock().unwrap().fail_inspect = Some(msg.to_string());
    }

    pub fn fail_pull(&self, msg: &str) {
        self.state.lock().unwrap().fail_pull = Some(msg.to_string());
    }

    pub fn fail_create(&self, msg: &str) {
        self.state.lock().unwrap().fail_create = Some(msg.to_string());
    }

    pub fn fail_start(&self, msg: &str) {
        self.state.lock().unwrap().fail_start = Some(msg.to_string());
    }

    pub fn fail_remove(&self, msg: &str) {
        self.state.lock().unwrap().fail_remove = Some(msg.to_string());
    }

    /// Fire `token` while the next container is being created.
    pub fn cancel_on_create(&self, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_create = Some(token);
    }

    pub fn pull_count(&self) -> u32 {
        self.state.lock().unwrap().pulls
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.lock().unwrap().images.contains(image)
    }

    pub fn created(&self) -> Vec<(String, ContainerConfig)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect_image(&self, reference: &str) -> anyhow::Result<Option<ImageMetadata>> {
        self.log.push(format!("inspect {reference}"));
        let st = self.state.lock().unwrap();
        if let Some(msg) = st.fail_inspect.clone() {
            anyhow::bail!(msg);
        }
        Ok(st.images.contains(reference).then(|| ImageMetadata {
            id: format!("sha256:{reference}"),
        }))
    }

    async fn pull_image(&self, reference: &str) -> anyhow::Result<()> {
        self.log.push(format!("pull {reference}"));
        let mut st = self.state.lock().unwrap();
        st.pulls += 1;
        if let Some(msg) = st.fail_pull.clone() {
            anyhow::bail!(msg);
        }
        st.images.insert(reference.to_string());
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig, name: &str) -> anyhow::Result<String> {
        self.log.push(format!("create {name}"));
        let mut st = self.state.lock().unwrap();
        if let Some(token) = st.cancel_on_create.take() {
            token.cancel();
        }
        if let Some(msg) = st.fail_create.clone() {
            anyhow::bail!(msg);
        }
        st.created.push((name.to_string(), config.clone()));
        let id = st
            .next_id
            .take()
            .unwrap_or_else(|| format!("c{}", st.created.len()));
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> anyhow::Result<()> {
        self.log.push(format!("start {id}"));
        let mut st = self.state.lock().unwrap();
        if let Some(msg) = st.fail_start.clone() {
            anyhow::bail!(msg);
        }
        st.started.push(id.to_string());
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> anyhow::Result<()> {
        self.log.push(format!("remove {id}"));
        let mut st = self.state.lock().unwrap();
        st.removed.push(id.to_string());
        if let Some(msg) = st.fail_remove.clone() {
            anyhow::bail!(msg);
        }
        Ok(())
    }
}

/// What one `get_node` call observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Offline,
    Online,
    Absent,
    Error,
}

#[derive(Default)]
struct RegistryState {
    nodes: HashMap<WorkerIdentity, Arc<FakeNode>>,
    registered: Vec<PendingNode>,
    deregistered: Vec<WorkerIdentity>,
    script: VecDeque<Poll>,
    default_poll: Option<Poll>,
    polls: u32,
    callback_url: Option<String>,
    fail_register: Option<String>,
    fail_deregister: Option<String>,
    fail_connect: Option<String>,
    connects: Vec<bool>,
    attached: Vec<ContainerHandle>,
}

#[derive(Clone, Default)]
pub struct FakeRegistry {
    state: Arc<Mutex<RegistryState>>,
    pub log: EventLog,
}

pub struct FakeNode {
    identity: WorkerIdentity,
    callback_url: String,
    online: Mutex<bool>,
    registry: FakeRegistry,
}

impl FakeRegistry {
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// `get_node` results, in order. Once exhausted, the default applies
    /// (`Poll::Online` unless changed with [`FakeRegistry::default_poll`]).
    pub fn script(&self, polls: &[Poll]) {
        self.state.lock().unwrap().script = polls.iter().copied().collect();
    }

    pub fn default_poll(&self, poll: Poll) {
        self.state.lock().unwrap().default_poll = Some(poll);
    }

    pub fn callback_url(&self, url: &str) {
        self.state.lock().unwrap().callback_url = Some(url.to_string());
    }

    pub fn fail_register(&self, msg: &str) {
        self.state.lock().unwrap().fail_register = Some(msg.to_string());
    }

    pub fn fail_deregister(&self, msg: &str) {
        self.state.lock().unwrap().fail_deregister = Some(msg.to_string());
    }

    pub fn fail_connect(&self, msg: &str) {
        self.state.lock().unwrap().fail_connect = Some(msg.to_string());
    }

    pub fn poll_count(&self) -> u32 {
        self.state.lock().unwrap().polls
    }

    pub fn registered(&self) -> Vec<PendingNode> {
        self.state.lock().unwrap().registered.clone()
    }

    pub fn deregistered(&self) -> Vec<WorkerIdentity> {
        self.state.lock().unwrap().deregistered.clone()
    }

    pub fn connects(&self) -> Vec<bool> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn attached(&self) -> Vec<ContainerHandle> {
        self.state.lock().unwrap().attached.clone()
    }
}

#[async_trait]
impl NodeHandle for FakeNode {
    fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    fn callback_url(&self) -> String {
        self.callback_url.clone()
    }

    async fn connection_channel(&self) -> anyhow::Result<ChannelStatus> {
        Ok(ChannelStatus {
            online: *self.online.lock().unwrap(),
        })
    }

    async fn request_connect(&self, force: bool) -> anyhow::Result<()> {
        self.registry.log.push(format!("connect {}", self.identity));
        let mut st = self.registry.state.lock().unwrap();
        st.connects.push(force);
        if let Some(msg) = st.fail_connect.clone() {
            anyhow::bail!(msg);
        }
        Ok(())
    }

    async fn attach_container(&self, container: &ContainerHandle) -> anyhow::Result<()> {
        self.registry.state.lock().unwrap().attached.push(container.clone());
        Ok(())
    }
}

#[async_trait]
impl NodeRegistry for FakeRegistry {
    async fn register_node(&self, node: &PendingNode) -> anyhow::Result<Arc<dyn NodeHandle>> {
        self.log.push(format!("register {}", node.identity));
        let mut st = self.state.lock().unwrap();
        if let Some(msg) = st.fail_register.clone() {
            anyhow::bail!(msg);
        }
        let callback_url = st
            .callback_url
            .clone()
            .unwrap_or_else(|| format!("http://host/node/{}/", node.identity));
        let handle = Arc::new(FakeNode {
            identity: node.identity.clone(),
            callback_url,
            online: Mutex::new(false),
            registry: self.clone(),
        });
        st.nodes.insert(node.identity.clone(), handle.clone());
        st.registered.push(node.clone());
        Ok(handle)
    }

    async fn get_node(
        &self,
        identity: &WorkerIdentity,
    ) -> anyhow::Result<Option<Arc<dyn NodeHandle>>> {
        self.log.push(format!("get {identity}"));
        let mut st = self.state.lock().unwrap();
        st.polls += 1;
        let default = st.default_poll.unwrap_or(Poll::Online);
        let poll = st.script.pop_front().unwrap_or(default);
        let Some(node) = st.nodes.get(identity).cloned() else {
            return Ok(None);
        };
        match poll {
            Poll::Absent => Ok(None),
            Poll::Error => anyhow::bail!("scheduler lookup failed"),
            Poll::Offline | Poll::Online => {
                *node.online.lock().unwrap() = poll == Poll::Online;
                let node: Arc<dyn NodeHandle> = node;
                Ok(Some(node))
            }
        }
    }

    async fn deregister_node(&self, identity: &WorkerIdentity) -> anyhow::Result<()> {
        self.log.push(format!("deregister {identity}"));
        let mut st = self.state.lock().unwrap();
        st.deregistered.push(identity.clone());
        if let Some(msg) = st.fail_deregister.clone() {
            anyhow::bail!(msg);
        }
        st.nodes.remove(identity);
        Ok(())
    }
}
