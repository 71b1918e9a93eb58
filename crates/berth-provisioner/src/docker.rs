use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use crate::bootstrap::WORKER_LABEL;
use crate::runtime::{ContainerConfig, ContainerRuntime, ImageMetadata};

/// [`ContainerRuntime`] backed by the `docker` CLI.
#[derive(Debug, Clone, Default)]
pub struct DockerCli {
    /// Passed as `-H`; `None` uses the CLI's default daemon.
    host: Option<String>,
}

impl DockerCli {
    pub fn new(host: Option<String>) -> Self {
        Self { host }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        if let Some(host) = self.host.as_deref() {
            cmd.arg("-H").arg(host);
        }
        cmd
    }

    async fn run(&self, args: &[String]) -> anyhow::Result<Output> {
        let output = self.command().args(args).output().await?;
        Ok(output)
    }

    /// Remove containers left behind by any earlier run of this provisioner.
    /// Returns the number of containers removed.
    pub async fn remove_stale_workers(&self) -> anyhow::Result<usize> {
        let output = self
            .run(&[
                "ps".into(),
                "-aq".into(),
                "--filter".into(),
                format!("label={WORKER_LABEL}"),
                "--filter".into(),
                "status=exited".into(),
            ])
            .await?;
        if !output.status.success() {
            anyhow::bail!("docker ps failed: {}", stderr_of(&output));
        }
        let ids = parse_ids(&String::from_utf8_lossy(&output.stdout));
        for id in &ids {
            if let Err(e) = self.remove_container(id).await {
                tracing::warn!(container_id=%id, error=%e, "failed to remove stale worker container");
            }
        }
        Ok(ids.len())
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_missing_image(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such image") || lower.contains("no such object")
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no such container")
}

fn parse_ids(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Arguments for `docker create`, excluding the binary and `-H`.
pub(crate) fn create_args(config: &ContainerConfig, name: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "create".into(),
        "--name".into(),
        name.into(),
        "--cpu-shares".into(),
        config.cpu_shares.to_string(),
    ];
    if let Some(user) = config.user.as_deref().filter(|u| !u.is_empty()) {
        args.push("--user".into());
        args.push(user.into());
    }
    if let Some(dir) = config.working_dir.as_deref() {
        args.push("--workdir".into());
        args.push(dir.into());
    }
    for (k, v) in &config.labels {
        args.push("--label".into());
        args.push(format!("{k}={v}"));
    }
    args.push(config.image.clone());
    args.extend(config.command.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn inspect_image(&self, reference: &str) -> anyhow::Result<Option<ImageMetadata>> {
        let output = self
            .run(&[
                "image".into(),
                "inspect".into(),
                "--format".into(),
                "{{.Id}}".into(),
                reference.into(),
            ])
            .await?;

        if output.status.success() {
            let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok(Some(ImageMetadata { id }));
        }
        let stderr = stderr_of(&output);
        if is_missing_image(&stderr) {
            return Ok(None);
        }
        anyhow::bail!("docker image inspect failed: {stderr}")
    }

    async fn pull_image(&self, reference: &str) -> anyhow::Result<()> {
        let output = self.run(&["pull".into(), reference.into()]).await?;
        if output.status.success() {
            Ok(())
        } else {
            anyhow::bail!("docker pull failed: {}", stderr_of(&output))
        }
    }

    async fn create_container(&self, config: &ContainerConfig, name: &str) -> anyhow::Result<String> {
        let output = self.run(&create_args(config, name)).await?;
        if !output.status.success() {
            anyhow::bail!("docker create failed: {}", stderr_of(&output));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            anyhow::bail!("docker create returned no container id");
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> anyhow::Result<()> {
        let output = self.run(&["start".into(), id.into()]).await?;
        if output.status.success() {
            Ok(())
        } else {
            anyhow::bail!("docker start failed: {}", stderr_of(&output))
        }
    }

    async fn remove_container(&self, id: &str) -> anyhow::Result<()> {
        let output = self.run(&["rm".into(), "-f".into(), id.into()]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        if is_missing_container(&stderr) {
            return Ok(());
        }
        anyhow::bail!("docker rm failed: {stderr}")
    }
}
