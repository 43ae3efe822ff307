//! Stream controllers: one long-lived upstream connection per stream kind,
//! multiplexed across every live subscriber.
//!
//! A controller owns its subscriber registry and a single background task.
//! The task walks the connection through its states:
//!
//! - `Idle` — no subscribers, no connection. The first subscribe wakes it.
//! - `Connecting` — upstream request in flight with the current keyword union.
//! - `Connected` — read loop running: frame → decode → filter → fan-out.
//! - `Draining` — closing a connection whose keyword set went stale.
//! - `Backoff` — waiting out a rate limit or connect failure.
//!
//! Subscribe and unsubscribe only mutate the registry and nudge the task;
//! every connection decision is made on the task, so connects, reconnects and
//! fan-outs are never concurrent with each other.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::StreamExt as _;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::{EventFilter, StreamEvent};
use crate::fanout;
use crate::framing::{Frame, FrameDecoder};
use crate::registry::{Registry, SubscriberEntry};
use crate::transport::{ByteStream, ConnectError, Transport};

// ---------------------------------------------------------------------------
// Stream kinds
// ---------------------------------------------------------------------------

/// Which upstream stream a controller serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Random sample of the firehose; every passing event goes to every
    /// subscriber.
    Sample,
    /// Keyword-filtered stream; the upstream carries the union of all
    /// subscribers' keywords and each event is re-matched per subscriber.
    Filter,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Sample => write!(f, "sample"),
            StreamKind::Filter => write!(f, "filter"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

/// A doubling backoff: `initial`, then twice the previous delay, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    pub initial: Duration,
    pub cap: Duration,
}

impl BackoffSchedule {
    fn start(self) -> Backoff {
        Backoff {
            schedule: self,
            next: self.initial,
        }
    }
}

#[derive(Debug)]
struct Backoff {
    schedule: BackoffSchedule,
    next: Duration,
}

impl Backoff {
    fn delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(self.schedule.cap);
        delay
    }

    fn reset(&mut self) {
        self.next = self.schedule.initial;
    }
}

/// Timing and capacity knobs. The defaults are the production values; tests
/// shrink them.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Capacity of each subscriber's delivery queue.
    pub queue_capacity: usize,
    /// How long an upstream connection outlives its last subscriber.
    pub idle_disconnect: Duration,
    /// Reconnect if neither a frame nor a keep-alive arrives within this.
    pub read_watchdog: Duration,
    /// Backoff after HTTP 420.
    pub rate_limit_backoff: BackoffSchedule,
    /// Backoff after transport failures, 5xx, or an unexpected upstream close.
    pub retry_backoff: BackoffSchedule,
    /// Quiescent pause after a non-420 4xx; retrying sooner cannot help.
    pub rejected_backoff: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning {
            queue_capacity: 256,
            idle_disconnect: Duration::from_secs(5 * 60),
            read_watchdog: Duration::from_secs(90),
            rate_limit_backoff: BackoffSchedule {
                initial: Duration::from_secs(60),
                cap: Duration::from_secs(320),
            },
            retry_backoff: BackoffSchedule {
                initial: Duration::from_secs(1),
                cap: Duration::from_secs(60),
            },
            rejected_backoff: Duration::from_secs(5 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Where the controller's upstream connection currently stands. Published on
/// a watch channel; transitions happen only on the controller task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    /// Open, with the keyword union that was in force at connect time.
    Connected { keywords: Vec<String> },
    Draining,
    Backoff { until: Instant },
}

// ---------------------------------------------------------------------------
// Public handles
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("sample streams do not take keywords")]
    UnexpectedKeywords,
    #[error("filter streams require at least one keyword")]
    MissingKeywords,
}

/// A live subscription: the consumer side of a bounded delivery queue.
///
/// Dropping the subscription unsubscribes it; [`SubscriptionHandle`] allows
/// the same from elsewhere. Either way is idempotent.
pub struct Subscription {
    queue: mpsc::Receiver<Arc<StreamEvent>>,
    dropped: Arc<AtomicU64>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    /// The next delivered event, in controller receive order. `None` once
    /// the subscription is gone and its queue is drained.
    pub async fn next_event(&mut self) -> Option<Arc<StreamEvent>> {
        self.queue.recv().await
    }

    /// Non-blocking variant of [`Subscription::next_event`].
    pub fn try_next_event(&mut self) -> Option<Arc<StreamEvent>> {
        self.queue.try_recv().ok()
    }

    /// Events lost to this subscriber because its queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

/// Detached unsubscribe capability. Holds only the subscription id and a weak
/// reference to the controller, so handles never keep a controller alive.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    controller: Weak<Inner>,
}

impl SubscriptionHandle {
    /// Remove the subscription. Safe to call any number of times, before or
    /// after the controller has shut down.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.controller.upgrade() {
            let now_empty = inner.registry.remove(self.id);
            debug!(stream = %inner.kind, subscriber = %self.id, now_empty, "unsubscribed");
            inner.wakeup.notify_one();
        }
    }
}

// ---------------------------------------------------------------------------
// StreamController
// ---------------------------------------------------------------------------

/// Owner of one stream kind: registry, state machine, and background task.
pub struct StreamController {
    inner: Arc<Inner>,
}

impl StreamController {
    /// Controller for the sampled stream (subscribers take no keywords).
    pub fn sample(transport: Arc<dyn Transport>, filter: EventFilter, tuning: Tuning) -> Self {
        Self::new(StreamKind::Sample, transport, filter, tuning)
    }

    /// Controller for the keyword-filtered stream.
    pub fn filter(transport: Arc<dyn Transport>, filter: EventFilter, tuning: Tuning) -> Self {
        Self::new(StreamKind::Filter, transport, filter, tuning)
    }

    fn new(
        kind: StreamKind,
        transport: Arc<dyn Transport>,
        filter: EventFilter,
        tuning: Tuning,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            kind,
            transport,
            filter,
            tuning,
            registry: Registry::new(),
            wakeup: Notify::new(),
            state_tx,
            shutdown_tx,
        });
        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move { task_inner.run(shutdown_rx).await });
        StreamController { inner }
    }

    pub fn kind(&self) -> StreamKind {
        self.inner.kind
    }

    /// Register a subscriber. `keywords` must be empty for a sample
    /// controller and non-empty for a filter controller.
    ///
    /// The subscription is live immediately: every event the controller
    /// reads from here on is eligible for it. If the controller is idle or
    /// backing off this schedules a connect; if the keyword union changed on
    /// a connected filter controller it schedules a reconnect.
    pub fn subscribe(&self, keywords: Vec<String>) -> Result<Subscription, SubscribeError> {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_owned())
            .filter(|k| !k.is_empty())
            .collect();
        match self.inner.kind {
            StreamKind::Sample if !keywords.is_empty() => {
                return Err(SubscribeError::UnexpectedKeywords);
            }
            StreamKind::Filter if keywords.is_empty() => {
                return Err(SubscribeError::MissingKeywords);
            }
            _ => {}
        }

        let id = Uuid::new_v4();
        let (tx, queue) = mpsc::channel(self.inner.tuning.queue_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        self.inner.registry.add(SubscriberEntry {
            id,
            keywords: keywords.clone(),
            tx,
            dropped: Arc::clone(&dropped),
        });
        debug!(stream = %self.inner.kind, subscriber = %id, ?keywords, "subscribed");
        self.inner.wakeup.notify_one();

        Ok(Subscription {
            queue,
            dropped,
            handle: SubscriptionHandle {
                id,
                controller: Arc::downgrade(&self.inner),
            },
        })
    }

    /// Watch the connection state. Mainly for the outer layer's diagnostics;
    /// subscribers do not need it.
    pub fn state(&self) -> watch::Receiver<ConnState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Stop the background task and close any upstream connection. Live
    /// subscriptions see their queues end.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Controller task
// ---------------------------------------------------------------------------

struct Inner {
    kind: StreamKind,
    transport: Arc<dyn Transport>,
    filter: EventFilter,
    tuning: Tuning,
    registry: Registry,
    /// Nudged on every subscribe/unsubscribe; the task re-reads the registry
    /// and decides what, if anything, changed.
    wakeup: Notify,
    state_tx: watch::Sender<ConnState>,
    shutdown_tx: watch::Sender<bool>,
}

/// Why the read loop returned.
enum ReadExit {
    KeywordsChanged,
    IdleExpired,
    Shutdown,
    /// Upstream closed the stream cleanly.
    Closed,
    /// Frame or transport error; already logged where it was seen.
    Failed,
    Watchdog,
}

impl Inner {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut rate_limit = self.tuning.rate_limit_backoff.start();
        let mut retry = self.tuning.retry_backoff.start();

        loop {
            if self.registry.is_empty() {
                self.set_state(ConnState::Idle);
            }
            if !self.wait_for_subscribers(&mut shutdown).await {
                return;
            }

            let keywords = self.registry.current_keywords();
            self.set_state(ConnState::Connecting);
            debug!(stream = %self.kind, ?keywords, "connecting upstream");
            let connected = tokio::select! {
                connected = self.transport.connect(self.kind, &keywords) => connected,
                _ = shutdown.wait_for(|stop| *stop) => return,
            };
            let source = match connected {
                Ok(source) => source,
                Err(error) => {
                    let delay = match &error {
                        ConnectError::RateLimited => {
                            let delay = rate_limit.delay();
                            warn!(
                                stream = %self.kind,
                                delay_secs = delay.as_secs(),
                                "rate limited by upstream, backing off"
                            );
                            delay
                        }
                        ConnectError::Rejected(status) => {
                            error!(
                                stream = %self.kind,
                                status = *status,
                                "upstream rejected the request, going quiescent"
                            );
                            self.tuning.rejected_backoff
                        }
                        ConnectError::Server(_) | ConnectError::Transport(_) => {
                            let delay = retry.delay();
                            warn!(
                                stream = %self.kind,
                                error = %error,
                                "connect failed, retrying after backoff"
                            );
                            delay
                        }
                    };
                    if !self.backoff(delay, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            rate_limit.reset();
            retry.reset();
            info!(stream = %self.kind, ?keywords, "connected");
            self.set_state(ConnState::Connected {
                keywords: keywords.clone(),
            });

            match self.read_loop(source, &keywords, &mut shutdown).await {
                ReadExit::Shutdown => return,
                ReadExit::KeywordsChanged => {
                    info!(stream = %self.kind, "keyword union changed, reconnecting");
                    self.set_state(ConnState::Draining);
                }
                ReadExit::IdleExpired => {
                    info!(
                        stream = %self.kind,
                        "no subscribers for the idle period, disconnecting"
                    );
                }
                ReadExit::Closed | ReadExit::Watchdog | ReadExit::Failed => {
                    if !self.registry.is_empty() {
                        let delay = retry.delay();
                        if !self.backoff(delay, &mut shutdown).await {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Park until at least one subscriber exists. Returns false on shutdown.
    async fn wait_for_subscribers(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }
            if !self.registry.is_empty() {
                return true;
            }
            tokio::select! {
                () = self.wakeup.notified() => {}
                _ = shutdown.wait_for(|stop| *stop) => return false,
            }
        }
    }

    /// Wait out `delay` in the `Backoff` state. Subscribes during a backoff
    /// do not shorten it; they are picked up at the next connect attempt.
    /// Returns false on shutdown.
    async fn backoff(&self, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        let until = Instant::now() + delay;
        self.set_state(ConnState::Backoff { until });
        tokio::select! {
            () = tokio::time::sleep_until(until) => true,
            _ = shutdown.wait_for(|stop| *stop) => false,
        }
    }

    async fn read_loop(
        &self,
        source: ByteStream,
        connected_keywords: &[String],
        shutdown: &mut watch::Receiver<bool>,
    ) -> ReadExit {
        let mut frames = FramedRead::new(StreamReader::new(source), FrameDecoder::new());
        let mut idle_deadline = if self.registry.is_empty() {
            Some(Instant::now() + self.tuning.idle_disconnect)
        } else {
            None
        };

        loop {
            if *shutdown.borrow() {
                return ReadExit::Shutdown;
            }
            if self.kind == StreamKind::Filter
                && !self.registry.is_empty()
                && self.registry.current_keywords() != connected_keywords
            {
                return ReadExit::KeywordsChanged;
            }

            let idle_expiry = async move {
                match idle_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                () = idle_expiry => {
                    if self.registry.is_empty() {
                        return ReadExit::IdleExpired;
                    }
                    idle_deadline = None;
                }
                () = self.wakeup.notified() => {
                    if self.registry.is_empty() {
                        if idle_deadline.is_none() {
                            debug!(stream = %self.kind, "registry empty, arming idle disconnect");
                            idle_deadline =
                                Some(Instant::now() + self.tuning.idle_disconnect);
                        }
                    } else if idle_deadline.take().is_some() {
                        debug!(stream = %self.kind, "subscriber returned, idle disconnect cancelled");
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => return ReadExit::Shutdown,
                frame = tokio::time::timeout(self.tuning.read_watchdog, frames.next()) => {
                    match frame {
                        Err(_) => {
                            warn!(stream = %self.kind, "read watchdog fired, reconnecting");
                            return ReadExit::Watchdog;
                        }
                        Ok(None) => {
                            warn!(stream = %self.kind, "upstream closed the stream");
                            return ReadExit::Closed;
                        }
                        Ok(Some(Err(error))) => {
                            warn!(stream = %self.kind, error = %error, "stream failed");
                            return ReadExit::Failed;
                        }
                        Ok(Some(Ok(Frame::KeepAlive))) => {}
                        Ok(Some(Ok(Frame::Payload(payload)))) => self.handle_frame(&payload),
                    }
                }
            }
        }
    }

    fn handle_frame(&self, payload: &[u8]) {
        let event = match StreamEvent::parse(payload) {
            Ok(event) => event,
            Err(error) => {
                warn!(stream = %self.kind, error = %error, "ignoring undecodable frame");
                return;
            }
        };
        if !self.filter.passes(&event) {
            return;
        }
        let event = Arc::new(event);
        fanout::dispatch(self.kind, &self.registry.snapshot(), &event);
    }

    fn set_state(&self, state: ConnState) {
        self.state_tx.send_replace(state);
    }
}
