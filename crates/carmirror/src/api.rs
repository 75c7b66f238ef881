//! Control routes: ask this node to push to or pull from a peer.
//!
//! - `POST /mirror/push` - JSON [`PushParams`] in, JSON [`TransferResponse`] out
//! - `POST /mirror/pull` - JSON [`PullParams`] in, JSON [`TransferResponse`] out
//!
//! The remote session ID, when one was opened, is returned in the
//! `car-mirror-sid` header.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use carmirror_http::ApiError;
use carmirror_sync::{MirrorError, TransferReport, SESSION_ID_HEADER};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use crate::service::CarMirror;

pub const MIRROR_PUSH_PATH: &str = "/mirror/push";
pub const MIRROR_PULL_PATH: &str = "/mirror/pull";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushParams {
    /// Root identifier, hex.
    pub cid: String,
    /// Destination provider address.
    pub addr: String,
    /// Only offer blocks stored after this marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullParams {
    pub cid: String,
    /// Source provider address.
    pub addr: String,
    #[serde(default)]
    pub stream: bool,
}

/// Echo of the request alongside the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse<P> {
    pub params: P,
    pub report: TransferReport,
}

fn parse<P: DeserializeOwned>(body: &[u8]) -> Result<P, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(MirrorError::InvalidMessage(format!("bad request body: {e}"))))
}

fn respond<P: Serialize>(params: P, report: TransferReport) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(value) = report
        .session
        .as_ref()
        .and_then(|s| HeaderValue::from_str(s.as_str()).ok())
    {
        headers.insert(SESSION_ID_HEADER, value);
    }
    (headers, Json(TransferResponse { params, report })).into_response()
}

async fn mirror_push(
    State(mirror): State<Arc<CarMirror>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let params: PushParams = parse(&body)?;
    let report = mirror
        .push(&params.cid, &params.addr, params.diff.as_deref(), params.stream)
        .await?;
    info!(root = %report.root, addr = %params.addr, sent = report.blocks_sent, "push served");
    Ok(respond(params, report))
}

async fn mirror_pull(
    State(mirror): State<Arc<CarMirror>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let params: PullParams = parse(&body)?;
    let report = mirror.pull(&params.cid, &params.addr, params.stream).await?;
    info!(
        root = %report.root,
        addr = %params.addr,
        received = report.blocks_received,
        "pull served"
    );
    Ok(respond(params, report))
}

/// Control routes bound to `mirror`.
pub fn routes(mirror: Arc<CarMirror>) -> Router {
    Router::new()
        .route(MIRROR_PUSH_PATH, post(mirror_push))
        .route(MIRROR_PULL_PATH, post(mirror_pull))
        .with_state(mirror)
}
