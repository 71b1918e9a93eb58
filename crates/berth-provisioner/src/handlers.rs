use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use berth_common::{ImageDescriptor, ProvisioningRequest, WorkerIdentity};
use berth_provisioner::{AdmissionError, NodeRegistry, ProvisionError};

use crate::state::AppState;

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
            request_id: format!("req_{}", Uuid::new_v4()),
        },
    };
    (status, Json(body)).into_response()
}

fn provision_status(err: &ProvisionError) -> StatusCode {
    match err {
        ProvisionError::InvalidDescriptor(_) | ProvisionError::ImageUnavailable { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ProvisionError::ProvisioningTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ProvisionError::NodeVanished { .. } => StatusCode::CONFLICT,
        ProvisionError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn admission_response(err: &AdmissionError) -> Response {
    match err {
        AdmissionError::UnknownImage(_) => {
            error_response(StatusCode::NOT_FOUND, "unknown_image", &err.to_string())
        }
        AdmissionError::AtCapacity { .. } => {
            error_response(StatusCode::TOO_MANY_REQUESTS, "at_capacity", &err.to_string())
        }
    }
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Serialize)]
struct ImageView<'a> {
    #[serde(flatten)]
    descriptor: &'a ImageDescriptor,
    in_use: u32,
}

pub async fn list_images(State(st): State<AppState>) -> impl IntoResponse {
    let images: Vec<ImageView<'_>> = st
        .catalog
        .descriptors()
        .map(|d| ImageView {
            descriptor: d,
            in_use: st.catalog.in_use(&d.name),
        })
        .collect();
    Json(json!(images))
}

#[derive(Debug, Deserialize)]
pub struct ProvisionBody {
    pub image: String,
}

pub async fn provision(State(st): State<AppState>, Json(body): Json<ProvisionBody>) -> Response {
    let slot = match st.catalog.try_acquire(&body.image) {
        Ok(s) => s,
        Err(e) => {
            tracing::info!(image=%body.image, error=%e, "provision request rejected");
            return admission_response(&e);
        }
    };
    let Some(image) = st.catalog.get(&body.image).cloned() else {
        return admission_response(&AdmissionError::UnknownImage(body.image));
    };

    let request = ProvisioningRequest {
        cloud: st.cloud.clone(),
        image,
    };
    let joined = st
        .catalog
        .spawn_admitted(&st.provisioner, slot, request, st.shutdown.child_token())
        .await;

    match joined {
        Ok(Ok(worker)) => (StatusCode::CREATED, Json(worker)).into_response(),
        Ok(Err(e)) => error_response(provision_status(&e), e.kind(), &e.cause_chain()),
        Err(e) => {
            tracing::error!(error=%e, "provisioning task failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "provisioning task failed",
            )
        }
    }
}

pub async fn list_workers(State(st): State<AppState>) -> Response {
    match st.registry.list_nodes().await {
        Ok(nodes) => Json(nodes).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            &format!("store error: {e}"),
        ),
    }
}

pub async fn delete_worker(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    let identity = WorkerIdentity::from(id);
    let record = match st.registry.get_record(&identity).await {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                &format!("store error: {e}"),
            );
        }
    };
    if let Err(e) = st.registry.deregister_node(&identity).await {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            &format!("store error: {e}"),
        );
    }
    if let Some(container_id) = record.and_then(|r| r.node.backing_container_id) {
        if let Err(e) = st.runtime.remove_container(&container_id).await {
            tracing::warn!(%identity, %container_id, error=%e, "failed to remove worker container");
        }
    }
    st.catalog.release(&identity);
    tracing::info!(%identity, "worker removed");
    StatusCode::NO_CONTENT.into_response()
}

pub async fn agent_check_in(State(st): State<AppState>, Path(id): Path<String>) -> Response {
    let identity = WorkerIdentity::from(id);
    match st.registry.record_check_in(&identity).await {
        Ok(true) => Json(json!({"status": "online"})).into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            "unknown_worker",
            &format!("worker {identity} is not registered"),
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            &format!("store error: {e}"),
        ),
    }
}
