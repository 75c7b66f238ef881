//! HTTP transport: posts CBOR messages to a provider's `/dag/*` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use carmirror_sync::{
    from_cbor, to_cbor, ErrorBody, MirrorError, PullRequest, PullResponse, PushRequest,
    PushResponse, Result, SessionId, Transport, SESSION_ID_HEADER,
};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::server::{CBOR_CONTENT_TYPE, PULL_PATH, PUSH_PATH, SESSION_PATH};

/// [`Transport`] over HTTP.
///
/// Addresses are base URLs such as `http://peer:8080`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

fn transport_error(err: reqwest::Error) -> MirrorError {
    MirrorError::Transport(err.to_string())
}

fn endpoint(address: &str, path: &str) -> String {
    format!("{}{}", address.trim_end_matches('/'), path)
}

impl HttpTransport {
    /// A transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn post<Req, Resp>(&self, url: String, session: Option<&SessionId>, body: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, CBOR_CONTENT_TYPE)
            .header(header::ACCEPT, CBOR_CONTENT_TYPE)
            .body(to_cbor(body)?);
        if let Some(session) = session {
            request = request.header(SESSION_ID_HEADER, session.as_str());
        }

        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            debug!(%url, %status, "provider returned an error");
            return Err(match serde_json::from_slice::<ErrorBody>(&bytes) {
                Ok(body) => MirrorError::Peer {
                    code: body.code,
                    message: body.message,
                },
                Err(_) => MirrorError::Transport(format!(
                    "{} from {}: {}",
                    status,
                    url,
                    String::from_utf8_lossy(&bytes)
                )),
            });
        }

        from_cbor(&bytes)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn push(&self, address: &str, request: PushRequest) -> Result<PushResponse> {
        let session = request.session.clone();
        self.post(endpoint(address, PUSH_PATH), session.as_ref(), &request)
            .await
    }

    async fn pull(&self, address: &str, request: PullRequest) -> Result<PullResponse> {
        let session = request.session.clone();
        self.post(endpoint(address, PULL_PATH), session.as_ref(), &request)
            .await
    }

    async fn close_source(&self, address: &str, session: &SessionId) -> Result<()> {
        let url = endpoint(address, &format!("{SESSION_PATH}/{session}"));
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(MirrorError::Transport(format!(
                "{} from {}",
                resp.status(),
                url
            )));
        }
        Ok(())
    }
}
