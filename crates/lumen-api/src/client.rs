// Realtime database REST client
//
// Wraps `reqwest::Client` with node URL construction and error-envelope
// unwrapping. Every node is addressed as `{base}/{path}.json`; an
// absent node reads back as the literal body `null`, and non-2xx
// responses carry `{"error": "..."}`.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Raw HTTP client for the realtime database.
///
/// Cheaply cloneable; holds one client for one-shot operations and one
/// for the streaming subscription (they need different timeout
/// settings, see [`TransportConfig`]).
#[derive(Clone)]
pub struct RtdbClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
}

/// Error envelope the database returns on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl RtdbClient {
    /// Create a new client for the database rooted at `base_url`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            stream_http: transport.build_stream_client()?,
            base_url,
        })
    }

    /// The database root URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Build the REST URL for a node: `{base}/{path}.json`.
    pub(crate) fn node_url(&self, path: &str) -> Result<Url, Error> {
        let node = path.trim_matches('/');
        let full = format!("{}/{node}.json", self.base_url.as_str().trim_end_matches('/'));
        Url::parse(&full).map_err(Error::InvalidUrl)
    }

    // ── Node operations ──────────────────────────────────────────────

    /// Read a node. Returns `None` if the node does not exist.
    pub async fn get(&self, path: &str) -> Result<Option<serde_json::Value>, Error> {
        let url = self.node_url(path)?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let resp = check_status(resp).await?;

        let body = resp.text().await.map_err(Error::Transport)?;
        if body.trim() == "null" {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })
    }

    /// Write a node, replacing its value. Siblings are untouched.
    pub async fn put(&self, path: &str, value: &impl Serialize) -> Result<(), Error> {
        let url = self.node_url(path)?;
        debug!("PUT {}", url);

        let resp = self
            .http
            .put(url)
            .json(value)
            .send()
            .await
            .map_err(Error::Transport)?;
        check_status(resp).await?;
        Ok(())
    }

    /// Open the streaming subscription on a node.
    ///
    /// The returned response body is a server-sent event stream; the
    /// caller owns reading it (see [`crate::listen`]).
    pub(crate) async fn open_stream(&self, path: &str) -> Result<reqwest::Response, Error> {
        let url = self.node_url(path)?;
        debug!("LISTEN {}", url);

        let resp = self
            .stream_http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(Error::Transport)?;
        check_status(resp).await
    }
}

/// Unwrap the error envelope on non-2xx responses.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body).map_or_else(
        |_| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.clone()
            }
        },
        |b| b.error,
    );
    Err(Error::Database {
        message,
        status: status.as_u16(),
    })
}
