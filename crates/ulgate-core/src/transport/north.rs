// ── Northbound HTTP ──
//
//   POST /v2/op/update   context-provider forward: command attributes
//   POST /notify         subscription notifications
//   GET  /iot/about      version and listener status

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::debug;
use ulgate_api::Scope;
use ulgate_api::context::types::{BatchUpdate, Notification};

use super::ApiError;
use crate::agent::{About, Agent};

pub fn router(agent: Agent) -> Router {
    Router::new()
        .route("/v2/op/update", post(update))
        .route("/notify", post(notify))
        .route("/iot/about", get(about))
        .with_state(agent)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

async fn update(
    State(agent): State<Agent>,
    headers: HeaderMap,
    Json(batch): Json<BatchUpdate>,
) -> Result<StatusCode, ApiError> {
    let defaults = &agent.config().defaults;
    let scope = Scope::new(
        header(&headers, "fiware-service").unwrap_or(defaults.service.as_str()),
        header(&headers, "fiware-servicepath").unwrap_or(defaults.subservice.as_str()),
    );
    let dispatched = agent.handle_command_update(scope, batch.entities).await?;
    debug!(dispatched, "context provider update handled");
    Ok(StatusCode::NO_CONTENT)
}

async fn notify(
    State(agent): State<Agent>,
    Json(notification): Json<Notification>,
) -> Result<StatusCode, ApiError> {
    let handled = agent.handle_notification(notification).await?;
    debug!(handled, "notification handled");
    Ok(StatusCode::OK)
}

async fn about(State(agent): State<Agent>) -> Json<About> {
    Json(agent.about())
}
