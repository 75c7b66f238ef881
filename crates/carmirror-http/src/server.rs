//! Provider endpoints.
//!
//! - `POST /dag/push` - CBOR [`PushRequest`] in, CBOR [`PushResponse`] out
//! - `POST /dag/pull` - CBOR [`PullRequest`] in, CBOR [`PullResponse`] out
//! - `DELETE /dag/session/:id` - finalize a session
//!
//! The session identifier travels in the body and is mirrored in the
//! `car-mirror-sid` header. Errors are JSON [`ErrorBody`] values.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use bytes::Bytes;
use carmirror_sync::{
    from_cbor, to_cbor, ErrorBody, ErrorCode, MirrorError, Provider, PullRequest, PushRequest,
    SessionId, SESSION_ID_HEADER,
};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Content type for protocol bodies.
pub const CBOR_CONTENT_TYPE: &str = "application/cbor";

pub const PUSH_PATH: &str = "/dag/push";
pub const PULL_PATH: &str = "/dag/pull";
pub const SESSION_PATH: &str = "/dag/session";

/// A [`MirrorError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub MirrorError);

impl From<MirrorError> for ApiError {
    fn from(err: MirrorError) -> Self {
        Self(err)
    }
}

/// HTTP status for a wire error code.
pub fn status_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Config
        | ErrorCode::InvalidCid
        | ErrorCode::InvalidBlock
        | ErrorCode::InvalidMessage
        | ErrorCode::UnknownProtocolVersion => StatusCode::BAD_REQUEST,
        ErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorCode::MissingBlocks => StatusCode::CONFLICT,
        ErrorCode::Cancelled => StatusCode::REQUEST_TIMEOUT,
        ErrorCode::Transport => StatusCode::BAD_GATEWAY,
        ErrorCode::Store | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let body = ErrorBody {
            code,
            message: self.0.to_string(),
        };
        debug!(%code, message = %body.message, "request failed");
        (status_code(code), Json(body)).into_response()
    }
}

fn cbor_response(session: &SessionId, body: Vec<u8>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CBOR_CONTENT_TYPE));
    if let Ok(value) = HeaderValue::from_str(session.as_str()) {
        headers.insert(SESSION_ID_HEADER, value);
    }
    (StatusCode::OK, headers, body).into_response()
}

/// Session from the header, used when the body carries none.
fn header_session(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(SessionId::from)
}

async fn push(
    State(provider): State<Arc<Provider>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut request: PushRequest = from_cbor(&body)?;
    if request.session.is_none() {
        request.session = header_session(&headers);
    }
    let response = provider.receive_push(request).await?;
    Ok(cbor_response(&response.session, to_cbor(&response)?))
}

async fn pull(
    State(provider): State<Arc<Provider>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut request: PullRequest = from_cbor(&body)?;
    if request.session.is_none() {
        request.session = header_session(&headers);
    }
    let response = provider.serve_pull(request).await?;
    Ok(cbor_response(&response.session, to_cbor(&response)?))
}

async fn close(State(provider): State<Arc<Provider>>, Path(id): Path<String>) -> StatusCode {
    provider.close(&SessionId(id));
    StatusCode::NO_CONTENT
}

/// Routes for a provider.
pub fn router(provider: Arc<Provider>) -> Router {
    Router::new()
        .route(PUSH_PATH, post(push))
        .route(PULL_PATH, post(pull))
        .route(&format!("{SESSION_PATH}/:id"), delete(close))
        .with_state(provider)
}

/// Serve `app` on `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("listening on {}", addr);
    }
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use carmirror_core::Cid;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_code(ErrorCode::SessionNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_code(ErrorCode::UnknownProtocolVersion), StatusCode::BAD_REQUEST);
        assert_eq!(status_code(ErrorCode::MissingBlocks), StatusCode::CONFLICT);
        assert_eq!(status_code(ErrorCode::Store), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_response() {
        let err = MirrorError::MissingBlocks {
            root: Cid::from_bytes([1; 32]),
            missing: vec![Cid::from_bytes([2; 32])],
        };
        let response = ApiError(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_header_session() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_session(&headers), None);
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("abc123"));
        assert_eq!(header_session(&headers), Some(SessionId::from("abc123")));
    }
}
