//! Scripted upstream used by the tracker, registry and route tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio::time::Instant;

use crate::live::{EventSource, StreamError, StreamResponse, TrackerError};

/// What the next `open` call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Transport-level failure.
    Fail,
    /// Connects with the given status and an empty body.
    Status(u16),
    /// 200, sends the chunks, then ends cleanly.
    Body(Vec<&'static str>),
    /// 200, sends the chunks, then stays open forever.
    Hang(Vec<&'static str>),
    /// `open` never completes.
    Pending,
}

#[derive(Debug)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Script>>,
    fallback: Script,
    opens: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    /// Once `script` runs out every open fails.
    pub fn new(script: Vec<Script>) -> Self {
        Self::with_fallback(script, Script::Fail)
    }

    pub fn with_fallback(script: Vec<Script>, fallback: Script) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            opens: Mutex::new(Vec::new()),
        }
    }

    /// When each `open` call happened.
    pub fn opens(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }
}

fn chunks(parts: Vec<&'static str>) -> impl futures_util::Stream<Item = std::io::Result<Bytes>> {
    stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))))
}

impl EventSource for ScriptedSource {
    async fn open(&self, _match_id: &str) -> Result<StreamResponse, TrackerError> {
        self.opens.lock().unwrap().push(Instant::now());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Script::Fail => Err(TrackerError::Stream(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))),
            Script::Status(status) => Ok(StreamResponse {
                status,
                body: Box::pin(stream::empty()),
            }),
            Script::Body(parts) => Ok(StreamResponse {
                status: 200,
                body: Box::pin(chunks(parts)),
            }),
            Script::Hang(parts) => Ok(StreamResponse {
                status: 200,
                body: Box::pin(chunks(parts).chain(stream::pending())),
            }),
            Script::Pending => std::future::pending().await,
        }
    }
}

pub fn assert_close(actual: Duration, expected: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= Duration::from_millis(10),
        "expected {:?}, got {:?}",
        expected,
        actual
    );
}
