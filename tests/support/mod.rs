//! Shared helpers for the controller integration tests: a scripted upstream
//! transport and a handful of timing-safe assertion wrappers.
//!
//! Tests run with tokio's paused clock, so the wall-clock durations used
//! here resolve instantly while remaining deterministic.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use tweetmux::controller::{BackoffSchedule, ConnState, StreamKind, Subscription, Tuning};
use tweetmux::event::{EventFilter, StreamEvent};
use tweetmux::transport::{ByteStream, ConnectError, Transport};

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// One scripted connect outcome.
pub enum Upstream {
    Serve(mpsc::UnboundedReceiver<io::Result<Bytes>>),
    RateLimited,
    Rejected(u16),
    ServerError(u16),
}

/// Producer side of one served connection.
pub struct UpstreamFeed {
    tx: mpsc::UnboundedSender<io::Result<Bytes>>,
}

impl UpstreamFeed {
    /// Send one complete length-delimited frame carrying `payload`.
    pub fn frame(&self, payload: &str) {
        self.chunk(format!("{}\n{}", payload.len(), payload));
    }

    /// Send one blank keep-alive line.
    pub fn keepalive(&self) {
        self.chunk("\n");
    }

    /// Send raw bytes with no framing applied.
    pub fn chunk(&self, bytes: impl Into<Bytes>) {
        let _ = self.tx.send(Ok(bytes.into()));
    }

    /// Fail the connection with an I/O error.
    pub fn fail(&self) {
        let _ = self.tx.send(Err(io::Error::other("injected failure")));
    }
}

/// A [`Transport`] that plays back a queue of scripted outcomes and records
/// the keyword set of every connect attempt. With an empty script, connects
/// hang forever (the controller just sits in `Connecting`).
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Upstream>>,
    connects: Mutex<Vec<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, upstream: Upstream) {
        self.script.lock().unwrap().push_back(upstream);
    }

    /// Queue a successful connection and return the feed driving it.
    pub fn serve(&self) -> UpstreamFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Upstream::Serve(rx));
        UpstreamFeed { tx }
    }

    /// Keyword sets of every connect attempt so far, in order.
    pub fn connects(&self) -> Vec<Vec<String>> {
        self.connects.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        _kind: StreamKind,
        keywords: &[String],
    ) -> Result<ByteStream, ConnectError> {
        let outcome = self.script.lock().unwrap().pop_front();
        let Some(outcome) = outcome else {
            std::future::pending::<()>().await;
            unreachable!()
        };
        self.connects.lock().unwrap().push(keywords.to_vec());
        match outcome {
            Upstream::Serve(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Upstream::RateLimited => Err(ConnectError::RateLimited),
            Upstream::Rejected(status) => Err(ConnectError::Rejected(status)),
            Upstream::ServerError(status) => Err(ConnectError::Server(status)),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Controller tuning shrunk for tests. The watchdog stays well above every
/// other interval so only tests that advance an hour at once trip it.
pub fn tuning() -> Tuning {
    Tuning {
        queue_capacity: 64,
        idle_disconnect: Duration::from_millis(200),
        read_watchdog: Duration::from_secs(60),
        rate_limit_backoff: BackoffSchedule {
            initial: Duration::from_millis(500),
            cap: Duration::from_millis(2000),
        },
        retry_backoff: BackoffSchedule {
            initial: Duration::from_millis(20),
            cap: Duration::from_millis(100),
        },
        rejected_backoff: Duration::from_secs(60),
    }
}

pub fn filter() -> EventFilter {
    EventFilter::new(["en".to_owned(), "no".to_owned()])
}

/// A minimal status update in `lang` with the given text.
pub fn status(lang: &str, text: &str) -> String {
    format!(r#"{{"in_reply_to_status_id":null,"lang":{lang:?},"text":{text:?}}}"#)
}

pub fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_owned()).collect()
}

// ---------------------------------------------------------------------------
// Assertion helpers
// ---------------------------------------------------------------------------

/// Await the next delivered event, failing the test after a bounded wait.
pub async fn expect_event(subscription: &mut Subscription) -> Arc<StreamEvent> {
    tokio::time::timeout(Duration::from_secs(5), subscription.next_event())
        .await
        .expect("timed out waiting for an event")
        .expect("subscription ended while waiting for an event")
}

/// Let the controller drain everything it has, then require the queue empty.
pub async fn expect_no_event(subscription: &mut Subscription) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        subscription.try_next_event().is_none(),
        "subscription unexpectedly received an event"
    );
}

/// Wait until the published connection state satisfies `predicate`.
pub async fn wait_for_state(
    state: &mut watch::Receiver<ConnState>,
    predicate: impl FnMut(&ConnState) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(predicate))
        .await
        .expect("timed out waiting for a connection state")
        .expect("controller went away");
}
