//! Launch command for worker containers.
//!
//! Images do not need the agent baked in: the container downloads the agent
//! from the cloud's agent URL at boot and runs it against the node's callback
//! URL, so the container needs network access to the scheduler.

use std::collections::BTreeMap;

use berth_common::{CloudContext, ImageDescriptor, WorkerIdentity};

use crate::runtime::ContainerConfig;

pub const WORKER_LABEL: &str = "berth.worker";
pub const IMAGE_LABEL: &str = "berth.image";
pub const CLOUD_LABEL: &str = "berth.cloud";

const AGENT_FILE: &str = "worker-agent";

/// Quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// `sh -c` argv that fetches the agent and execs it.
pub fn agent_command(agent_url: &str, callback_url: &str, remote_root: &str) -> Vec<String> {
    let agent_path = format!("{}/{}", remote_root.trim_end_matches('/'), AGENT_FILE);
    let script = format!(
        "mkdir -p {root} && curl -fsSL -o {agent} {url} && chmod +x {agent} && exec {agent} --callback-url {callback} --work-dir {root}",
        root = shell_quote(remote_root),
        agent = shell_quote(&agent_path),
        url = shell_quote(agent_url),
        callback = shell_quote(callback_url),
    );
    vec!["sh".to_string(), "-c".to_string(), script]
}

pub fn container_config(
    cloud: &CloudContext,
    image: &ImageDescriptor,
    identity: &WorkerIdentity,
    callback_url: &str,
) -> ContainerConfig {
    let labels = BTreeMap::from([
        (WORKER_LABEL.to_string(), identity.to_string()),
        (IMAGE_LABEL.to_string(), image.name.clone()),
        (CLOUD_LABEL.to_string(), cloud.name.clone()),
    ]);
    ContainerConfig {
        image: image.image.clone(),
        command: agent_command(&cloud.agent_url, callback_url, &image.remote_root),
        cpu_shares: image.cpu_shares,
        user: image.user.clone(),
        working_dir: Some(image.remote_root.clone()),
        labels,
    }
}
