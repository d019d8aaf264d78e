// ── Southbound HTTP ──
//
//   POST {resource}?i=&k=[&t=][&getCmd=1]   measurements (+ poll)
//   GET  {resource}?i=&k=&d=[&getCmd=1]     measurements in the query
//   POST {resource}/commands?i=&k=          command results

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::Deserialize;
use tracing::debug;

use super::{ApiError, body_encoding, encoding_from_headers};
use crate::agent::{Agent, Measurement};
use crate::error::CoreError;
use crate::model::{PayloadEncoding, TransportKind};
use crate::resolver::RoutingHint;

#[derive(Clone)]
struct SouthState {
    agent: Agent,
    resource: Arc<str>,
}

/// Device query string.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceQuery {
    pub i: Option<String>,
    pub k: Option<String>,
    pub t: Option<String>,
    pub d: Option<String>,
    #[serde(rename = "getCmd")]
    pub get_cmd: Option<String>,
}

impl DeviceQuery {
    fn hint<'a>(&'a self, resource: &'a str) -> Result<RoutingHint<'a>, CoreError> {
        let (Some(device_id), Some(api_key)) = (non_empty(self.i.as_deref()), non_empty(self.k.as_deref()))
        else {
            return Err(CoreError::malformed("query parameters i and k are required"));
        };
        Ok(RoutingHint {
            transport: TransportKind::Http,
            api_key,
            device_id,
            resource: Some(resource),
        })
    }

    fn wants_commands(&self) -> bool {
        matches!(self.get_cmd.as_deref(), Some("1" | "true"))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

pub fn router(agent: Agent, resource: &str) -> Router {
    let state = SouthState {
        agent,
        resource: Arc::from(resource),
    };
    Router::new()
        .route(resource, post(measures_post).get(measures_get))
        .route(&format!("{resource}/commands"), post(results))
        .with_state(state)
}

async fn measures_post(
    State(state): State<SouthState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let encoding = body_encoding(&headers, &body);
    measures(&state, &query, encoding, &body).await
}

async fn measures_get(
    State(state): State<SouthState>,
    Query(query): Query<DeviceQuery>,
) -> Result<Response, ApiError> {
    let payload = query.d.clone().unwrap_or_default();
    measures(&state, &query, None, payload.as_bytes()).await
}

async fn measures(
    state: &SouthState,
    query: &DeviceQuery,
    encoding: Option<PayloadEncoding>,
    payload: &[u8],
) -> Result<Response, ApiError> {
    let hint = query.hint(&state.resource)?;

    let device = if payload.iter().all(u8::is_ascii_whitespace) {
        // Poll-only request.
        state.agent.resolve_device(hint).await?
    } else {
        let (device, outcome) = state
            .agent
            .handle_measures(Measurement {
                hint,
                encoding,
                payload,
                attribute: None,
                timestamp: query.t.as_deref(),
            })
            .await?;
        if let Some(e) = outcome.into_first_error() {
            return Err(e.into());
        }
        device
    };

    if !query.wants_commands() {
        return Ok(StatusCode::OK.into_response());
    }

    let encoding = encoding.unwrap_or(device.encoding);
    let body = state.agent.poll_commands(&device, Some(encoding)).await;
    debug!(device_id = %device.id, bytes = body.len(), "answering poll");
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoding.content_type())],
        body,
    )
        .into_response())
}

async fn results(
    State(state): State<SouthState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let hint = query.hint(&state.resource)?;
    let settled = state
        .agent
        .handle_results(hint, encoding_from_headers(&headers), &body)
        .await?;
    debug!(device_id = hint.device_id, settled, "command results received");
    Ok(StatusCode::OK)
}
