//! Dispatch queue and scheduler loop.
//!
//! # Design
//! State is split between two owners:
//! - `QueueHandle` (cloneable) is the caller side. It appends requests,
//!   swaps the shared send-time state and raises the stop flag. None of its
//!   methods block on a send.
//! - `Dispatcher` owns the transport and the in-flight slot. `drain` borrows
//!   it mutably and `run` consumes it, so two sends can never overlap.
//!
//! The shared state is read once, at the instant a request is dequeued, and
//! the snapshot goes with the request. Changing it mid-send only affects
//! later requests.
//!
//! A send is cut off at the snapshot's `timeout` unless the transport
//! enforces that deadline itself; then the queue waits for the transport to
//! give up, so the next request never starts while the old one is still on
//! the wire.
//!
//! The stop flag is checked at two safe points: before each dequeue and at
//! the idle wait between drain cycles. A send already in flight always runs
//! to completion and is delivered to the sink.
//!
//! Locks are `std::sync` and are never held across an `.await`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::SharedState;
use crate::cookie::CookieJar;
use crate::error::{QueueError, RequestError, TransportError};
use crate::http::{Completion, HttpRequest, HttpResponse};
use crate::sink::{EventLevel, NotificationSink};
use crate::transport::Transport;

/// Idle wait between drain cycles when nothing wakes the loop earlier.
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);

struct QueueState {
    pending: Mutex<VecDeque<HttpRequest>>,
    shared: RwLock<SharedState>,
    in_flight: Mutex<Option<Uuid>>,
    stopped: AtomicBool,
    level: AtomicU32,
    wake: Notify,
}

impl QueueState {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            shared: RwLock::new(SharedState::default()),
            in_flight: Mutex::new(None),
            stopped: AtomicBool::new(false),
            level: AtomicU32::new(EventLevel::ALL.0),
            wake: Notify::new(),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<HttpRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> SharedState {
        self.shared.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update_shared(&self, f: impl FnOnce(&mut SharedState)) {
        let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *shared);
    }

    fn set_in_flight(&self, id: Option<Uuid>) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }
}

/// Occupies the in-flight slot until dropped, so a cancelled send never
/// leaves a stale id behind.
struct InFlight<'a> {
    state: &'a QueueState,
}

impl<'a> InFlight<'a> {
    fn claim(state: &'a QueueState, id: Uuid) -> Self {
        state.set_in_flight(Some(id));
        Self { state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.set_in_flight(None);
    }
}

/// Caller side of a dispatch queue.
#[derive(Clone)]
pub struct QueueHandle {
    state: Arc<QueueState>,
}

impl QueueHandle {
    /// Append a request to the tail and wake the dispatcher.
    ///
    /// Fails once the queue is stopped, or if the request already carries
    /// send-time state.
    pub fn enqueue(&self, request: HttpRequest) -> Result<Uuid, QueueError> {
        if request.is_decorated() {
            return Err(RequestError::AlreadyDecorated.into());
        }
        let id = request.id();
        {
            // Checked under the lock so nothing is accepted once `stop` has
            // returned.
            let mut pending = self.state.pending();
            if self.state.is_stopped() {
                return Err(QueueError::Stopped);
            }
            pending.push_back(request);
        }
        tracing::debug!(%id, "request enqueued");
        self.state.wake.notify_one();
        Ok(id)
    }

    /// Replace the state applied to requests dequeued from now on.
    pub fn set_shared_state(&self, state: SharedState) {
        self.state.update_shared(|shared| *shared = state);
    }

    /// Copy of the current shared state.
    pub fn shared_state(&self) -> SharedState {
        self.state.snapshot()
    }

    pub fn set_headers(&self, headers: Vec<(String, String)>) {
        self.state.update_shared(|shared| shared.headers = headers);
    }

    /// Add a header, replacing any existing one with the same name.
    pub fn append_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        self.state.update_shared(|shared| shared.set_header(name, value));
    }

    pub fn set_timeouts(&self, timeout: Option<Duration>, read_write_timeout: Option<Duration>) {
        self.state.update_shared(|shared| {
            shared.timeout = timeout;
            shared.read_write_timeout = read_write_timeout;
        });
    }

    pub fn set_cookie_jar(&self, jar: CookieJar) {
        self.state.update_shared(|shared| shared.cookie_jar = jar);
    }

    pub fn cookie_jar(&self) -> CookieJar {
        self.state.snapshot().cookie_jar
    }

    /// Level passed to the sink with every completion.
    pub fn set_event_level(&self, level: EventLevel) {
        self.state.level.store(level.0, Ordering::Release);
    }

    pub fn event_level(&self) -> EventLevel {
        EventLevel(self.state.level.load(Ordering::Acquire))
    }

    /// Raise the stop flag. Takes effect at the dispatcher's next safe
    /// point; a request already in flight is still completed and delivered.
    pub fn stop(&self) {
        let _pending = self.state.pending();
        self.state.stopped.store(true, Ordering::Release);
        self.state.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Number of requests waiting to be sent, excluding the one in flight.
    pub fn len(&self) -> usize {
        self.state.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the request currently being sent.
    pub fn in_flight(&self) -> Option<Uuid> {
        *self.state.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the transport and sends queued requests one at a time.
pub struct Dispatcher<T> {
    transport: T,
    state: Arc<QueueState>,
    tick: Duration,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: Arc::new(QueueState::new()),
            tick: DEFAULT_TICK,
        }
    }

    /// Longest idle wait before the loop re-checks the queue on its own.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Pop the head, decorate it with the current shared state, send it and
    /// wait for the outcome.
    ///
    /// Returns `None` when the queue is empty or the stop flag is set.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        let mut request = {
            // Same lock `stop` takes, so a stop can't land between the
            // check and the pop.
            let mut pending = self.state.pending();
            if self.state.is_stopped() {
                return None;
            }
            pending.pop_front()?
        };
        let snapshot = self.state.snapshot();
        let deadline = snapshot.timeout;

        let id = request.id();
        let slot = InFlight::claim(&self.state, id);
        tracing::debug!(%id, method = %request.method(), url = request.target(), "sending request");

        let outcome = match request.decorate(snapshot) {
            Ok(()) => self.send(&request, deadline).await,
            Err(e) => Err(TransportError::Other(e.to_string())),
        };
        drop(slot);

        match &outcome {
            Ok(response) => tracing::debug!(%id, status = response.status, "request completed"),
            Err(e) => tracing::warn!(%id, url = request.target(), error = %e, "request failed"),
        }
        Some(Completion { request, outcome })
    }

    async fn send(&self, request: &HttpRequest, deadline: Option<Duration>) -> Result<HttpResponse, TransportError> {
        match deadline.filter(|_| !self.transport.enforces_timeout()) {
            Some(limit) => tokio::time::timeout(limit, self.transport.send(request))
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => self.transport.send(request).await,
        }
    }

    /// Lazily send every queued request, yielding completions in FIFO
    /// order. Ends when the queue is empty or stopped; call again to pick
    /// up requests enqueued later.
    pub fn drain(&mut self) -> impl Stream<Item = Completion> + '_ {
        futures_util::stream::unfold(self, |dispatcher| async move {
            let completion = dispatcher.next_completion().await?;
            Some((completion, dispatcher))
        })
    }

    /// Run the scheduler loop until the stop flag is observed, reporting
    /// every completion to `sink`.
    ///
    /// Requests still queued when the loop stops are discarded unsent.
    pub async fn run<S: NotificationSink>(mut self, sink: S) {
        tracing::info!(tick = ?self.tick, "dispatcher started");
        loop {
            while let Some(completion) = self.next_completion().await {
                let level = EventLevel(self.state.level.load(Ordering::Acquire));
                sink.notify(&completion, level);
            }
            if self.state.is_stopped() {
                break;
            }
            tokio::select! {
                _ = self.state.wake.notified() => {}
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
        let discarded = {
            let mut pending = self.state.pending();
            let n = pending.len();
            pending.clear();
            n
        };
        tracing::info!(discarded, "dispatcher stopped");
    }
}
