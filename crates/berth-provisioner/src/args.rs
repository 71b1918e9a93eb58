use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "BERTH_LISTEN_ADDR", default_value = "0.0.0.0:18100")]
    pub listen_addr: String,

    /// Registry store. Without it, worker state lives in memory and is lost on restart.
    #[arg(long, env = "ETCD_ENDPOINT")]
    pub etcd_endpoint: Option<String>,

    /// JSON file holding the list of image descriptors.
    #[arg(long, env = "BERTH_IMAGES", default_value = "images.json")]
    pub images: PathBuf,

    #[arg(long, env = "BERTH_CLOUD_NAME", default_value = "docker-local")]
    pub cloud_name: String,

    /// Docker daemon address passed to the CLI as `-H`.
    #[arg(long, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Base URL agents use to reach this service.
    #[arg(long, env = "BERTH_PUBLIC_URL", default_value = "http://127.0.0.1:18100")]
    pub public_url: String,

    /// Where containers download the worker agent from.
    #[arg(long, env = "BERTH_AGENT_URL", default_value = "http://127.0.0.1:18100/agent/worker-agent")]
    pub agent_url: String,

    #[arg(long, default_value_t = 1_000)]
    pub poll_interval_ms: u64,

    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_poll_attempts: u32,

    /// Remove exited worker containers left by an earlier run before serving.
    #[arg(long, default_value_t = false)]
    pub remove_stale_workers: bool,

    /// OTLP/HTTP collector for trace export. Stdout logging only when unset.
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
