//! Remote device-control service: the authoritative owner of zone membership.
//!
//! The engine only needs three calls: a full `zones` snapshot, `join`, and
//! `leave`. Devices are addressed by room name, never by id.

use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use super::topology::ZoneReport;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("invalid remote base url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("remote rejected request: {0}")]
    Rejected(String),
}

/// The calls the engine makes against the device-control service.
///
/// Implementations must be cheap to share (`Arc`) and must not retry:
/// a failed call is rolled back and surfaced, never retried.
pub trait RemoteControl: Send + Sync + 'static {
    /// Full membership snapshot. Idempotent, side-effect free.
    fn zones(&self) -> impl Future<Output = Result<Vec<ZoneReport>, RemoteError>> + Send;

    /// Make `room` follow the zone of `target_room`.
    fn join(
        &self,
        room: &str,
        target_room: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Take `room` out of its zone into a singleton zone.
    fn leave(&self, room: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// HTTP client for a node-sonos-http-api style service.
///
/// - `GET  {base}/zones`
/// - `POST {base}/{room}/join/{target_room}`
/// - `POST {base}/{room}/leave`
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base: Url,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url).map_err(|_| RemoteError::InvalidUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    /// Append percent-encoded path segments to the base url.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RemoteError::InvalidUrl(self.base.to_string()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn post_action(&self, segments: &[&str]) -> Result<(), RemoteError> {
        let url = self.endpoint(segments)?;
        debug!(%url, "remote action");
        let resp = self.client.post(url).send().await?;
        check_status(resp).await.map(|_| ())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

impl RemoteControl for HttpRemote {
    async fn zones(&self) -> Result<Vec<ZoneReport>, RemoteError> {
        let url = self.endpoint(&["zones"])?;
        let resp = check_status(self.client.get(url).send().await?).await?;
        Ok(resp.json::<Vec<ZoneReport>>().await?)
    }

    async fn join(&self, room: &str, target_room: &str) -> Result<(), RemoteError> {
        self.post_action(&[room, "join", target_room]).await
    }

    async fn leave(&self, room: &str) -> Result<(), RemoteError> {
        self.post_action(&[room, "leave"]).await
    }
}
