use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONNECTION};

use super::protocol::StreamError;

/// Body of an upstream event stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// The only status that puts a tracker into streaming.
pub const STATUS_OK: u16 = 200;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("making request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("received non-200 status code: {0}")]
    Status(u16),
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("reading event stream: {0}")]
    Stream(#[from] StreamError),
    #[error("connection closed by server")]
    Closed,
}

/// An opened upstream connection: status plus the raw body.
pub struct StreamResponse {
    pub status: u16,
    pub body: ByteStream,
}

/// Where trackers get their per-match event streams from.
pub trait EventSource: Send + Sync + 'static {
    /// Open the event stream for `match_id`. Transport failures are errors;
    /// status checking is left to the caller.
    fn open(
        &self,
        match_id: &str,
    ) -> impl Future<Output = Result<StreamResponse, TrackerError>> + Send;
}

/// Live events service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventSource {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn events_url(&self, match_id: &str) -> String {
        format!("{}/v1/matches/{}/live/demo/events", self.base_url, match_id)
    }
}

impl EventSource for HttpEventSource {
    async fn open(&self, match_id: &str) -> Result<StreamResponse, TrackerError> {
        let url = self.events_url(match_id);
        tracing::debug!("Opening event stream {}", url);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive")
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(StreamResponse {
            status,
            body: Box::pin(body),
        })
    }
}
