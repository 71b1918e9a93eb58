mod args;
mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use berth_common::telemetry::{init_tracing, TelemetryConfig};
use berth_common::CloudContext;
use berth_meta::{EtcdMetaStore, MemoryMetaStore, MetaStore};
use berth_provisioner::{
    Catalog, ContainerRuntime, DockerCli, MetaNodeRegistry, Provisioner, ReadinessPolicy,
};

use crate::args::Args;
use crate::handlers::{
    agent_check_in, delete_worker, healthz, list_images, list_workers, provision,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otel = init_tracing(&TelemetryConfig {
        service_name: "berth-provisioner".to_string(),
        otlp_endpoint: args.otlp_endpoint.clone(),
        otlp_token: args.otlp_token.clone(),
    });

    tracing::info!(cloud=%args.cloud_name, listen=%args.listen_addr, "berth-provisioner starting");

    let store: Arc<dyn MetaStore> = match args.etcd_endpoint.as_ref() {
        Some(endpoint) => Arc::new(EtcdMetaStore::connect(std::slice::from_ref(endpoint)).await?),
        None => {
            tracing::warn!("no etcd endpoint configured, worker registry is in-memory");
            Arc::new(MemoryMetaStore::new())
        }
    };

    let catalog = Catalog::load(&args.images).await?;
    tracing::info!(count = catalog.descriptors().count(), "loaded image descriptors");

    let docker = DockerCli::new(args.docker_host.clone());
    if args.remove_stale_workers {
        match docker.remove_stale_workers().await {
            Ok(n) => tracing::info!(removed = n, "removed stale worker containers"),
            Err(e) => tracing::warn!(error=%e, "failed to list stale worker containers"),
        }
    }
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    let registry = Arc::new(MetaNodeRegistry::new(store, args.public_url.clone()));
    for record in registry.list_nodes().await? {
        let node = record.node;
        if !catalog.restore(node.identity.clone(), &node.image_name) {
            tracing::warn!(identity=%node.identity, image=%node.image_name, "live worker has no configured descriptor");
        }
    }
    let readiness = ReadinessPolicy::new(
        Duration::from_millis(args.poll_interval_ms),
        args.max_poll_attempts,
    );
    let provisioner = Provisioner::new(runtime.clone(), registry.clone()).with_readiness(readiness);

    let mut cloud = CloudContext::new(args.cloud_name.clone(), args.agent_url.clone());
    cloud.runtime_endpoint = args.docker_host.clone();

    let shutdown = CancellationToken::new();
    let st = AppState {
        provisioner: Arc::new(provisioner),
        registry,
        runtime,
        catalog: Arc::new(catalog),
        cloud,
        shutdown: shutdown.clone(),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/images", get(list_images))
        .route("/v1/provision", post(provision))
        .route("/v1/workers", get(list_workers))
        .route("/v1/workers/:id", delete(delete_worker))
        .route("/v1/workers/:id/agent", post(agent_check_in))
        .with_state(st);

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error=%e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down, cancelling in-flight provisioning");
            shutdown.cancel();
        })
        .await?;

    if let Some(provider) = otel {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush traces: {e}");
        }
    }
    Ok(())
}
