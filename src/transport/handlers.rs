use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use serde_json::{Value, json};
use std::sync::Arc;

use super::protocol::{AcceptedResponse, CatalogSummary, ReplyResponse, RouteResponse, StatusResponse};
use super::types::Transport;
use crate::catalog::CatalogStore;
use crate::membership::{ControlError, ControlService};
use crate::planner::{Message, PartialResult, PlanError, StepRegistry};
use crate::routing::{RouteRequest, Router, RoutingError};
use crate::session::{DispatcherHandle, SessionError, run_task};

fn routing_status(error: &RoutingError) -> StatusCode {
    match error {
        RoutingError::UnknownDataset(_) | RoutingError::NoDestinations { .. } => {
            StatusCode::NOT_FOUND
        }
        RoutingError::MissingPartitionKey { .. } => StatusCode::BAD_REQUEST,
    }
}

fn session_status(error: &SessionError) -> StatusCode {
    match error {
        SessionError::Plan(PlanError::Routing(routing)) => routing_status(routing),
        SessionError::Plan(_) => StatusCode::BAD_REQUEST,
        SessionError::TaskFailed(_) => StatusCode::BAD_GATEWAY,
        SessionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        SessionError::DispatcherStopped => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn handle_route(
    Extension(catalog): Extension<Arc<CatalogStore>>,
    Extension(router): Extension<Arc<Router>>,
    Json(request): Json<RouteRequest>,
) -> (StatusCode, Json<RouteResponse>) {
    match router.route(&catalog.current(), &request) {
        Ok(destinations) => (
            StatusCode::OK,
            Json(RouteResponse {
                destinations,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Cannot route {:?} request for {}: {}", request.mode, request.dataset, e);
            (
                routing_status(&e),
                Json(RouteResponse {
                    destinations: Vec::new(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Client requests wait for their session; task messages from a session owner
/// are run in the background and answered through `/internal/result`.
pub async fn handle_message(
    Extension(dispatcher): Extension<DispatcherHandle>,
    Extension(registry): Extension<Arc<StepRegistry>>,
    Extension(transport): Extension<Arc<dyn Transport>>,
    Json(message): Json<Message>,
) -> (StatusCode, Json<ReplyResponse>) {
    if let Some(task) = &message.task {
        let reply_to = task.reply_to.clone();
        tokio::spawn(async move {
            for result in run_task(&registry, message).await {
                if let Err(e) = transport.send_result(&reply_to, &result).await {
                    tracing::error!("Failed to return result to {}: {:#}", reply_to, e);
                }
            }
        });
        return (
            StatusCode::ACCEPTED,
            Json(ReplyResponse {
                success: true,
                result: None,
                error: None,
            }),
        );
    }

    match dispatcher.submit(message).await {
        Ok(result) => (StatusCode::OK, Json(ReplyResponse::ok(result))),
        Err(e) => (session_status(&e), Json(ReplyResponse::failed(e))),
    }
}

pub async fn handle_result(
    Extension(dispatcher): Extension<DispatcherHandle>,
    Json(result): Json<PartialResult>,
) -> (StatusCode, Json<AcceptedResponse>) {
    match dispatcher.deliver(result).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: true })),
        Err(e) => {
            tracing::error!("Failed to deliver result: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(AcceptedResponse { accepted: false }),
            )
        }
    }
}

pub async fn handle_control(
    Extension(control): Extension<Arc<ControlService>>,
    Path(command): Path<String>,
    params: Option<Json<Value>>,
) -> (StatusCode, Json<Value>) {
    let params = params.map(|Json(params)| params).unwrap_or_else(|| json!({}));

    match control.handle(&command, &params).await {
        Ok(response) => (StatusCode::OK, Json(json!(response))),
        Err(e @ ControlError::UnknownCommand(_)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() })))
        }
        Err(e) => {
            tracing::error!("Control command {} failed: {}", command, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

pub async fn handle_status(
    Extension(control): Extension<Arc<ControlService>>,
    Extension(catalog): Extension<Arc<CatalogStore>>,
    Extension(dispatcher): Extension<DispatcherHandle>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        node: control.node().to_string(),
        status: control.status_store().snapshot().await,
        absorb: control.absorb_state(),
        active_sessions: dispatcher.active_sessions().await.unwrap_or(0),
        catalog: CatalogSummary::of(&catalog.current()),
    })
}

pub async fn handle_catalog(Extension(catalog): Extension<Arc<CatalogStore>>) -> Json<Value> {
    Json(catalog.current().to_json().clone())
}
