//! Ordering, single-flight, cancellation and snapshot behaviour of the
//! dispatcher, driven by scripted in-process transports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use httpq_core::{
    ChannelSink, Completion, Dispatcher, EventLevel, HttpMethod, HttpRequest, HttpResponse, QueueError,
    SharedState, Transport, TransportError,
};
use tokio::sync::{mpsc, Semaphore};

fn get(target: &str) -> HttpRequest {
    HttpRequest::new(target, HttpMethod::Get)
}

fn ok(request: &HttpRequest) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: request.headers().to_vec(),
        body: request.target().as_bytes().to_vec(),
    }
}

fn header<'a>(completion: &'a Completion, name: &str) -> Option<&'a str> {
    completion
        .request
        .headers()
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Yields once per send and tracks how many sends overlap.
#[derive(Clone, Default)]
struct Recording {
    sent: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl Transport for Recording {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.sent.lock().unwrap().push(request.target().to_string());
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        if request.target().starts_with("/bad") {
            return Err(TransportError::ConnectionRefused);
        }
        Ok(ok(request))
    }
}

/// Announces each send, then blocks until the test releases a permit.
struct Gated {
    gate: Arc<Semaphore>,
    started: mpsc::UnboundedSender<String>,
}

impl Gated {
    fn new() -> (Self, Arc<Semaphore>, mpsc::UnboundedReceiver<String>) {
        let gate = Arc::new(Semaphore::new(0));
        let (started, rx) = mpsc::unbounded_channel();
        (
            Self {
                gate: Arc::clone(&gate),
                started,
            },
            gate,
            rx,
        )
    }
}

impl Transport for Gated {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let _ = self.started.send(request.target().to_string());
        let permit = self.gate.acquire().await.map_err(|e| TransportError::Other(e.to_string()))?;
        permit.forget();
        Ok(ok(request))
    }
}

/// Never answers requests under `/slow`.
struct Hanging;

impl Transport for Hanging {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.target().starts_with("/slow") {
            std::future::pending::<()>().await;
        }
        Ok(ok(request))
    }
}

/// Applies the request's deadline itself and only then returns, the way a
/// blocking client does.
#[derive(Clone, Default)]
struct SelfTimed {
    inner: Recording,
}

impl Transport for SelfTimed {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_active.fetch_max(now, Ordering::SeqCst);
        self.inner.sent.lock().unwrap().push(request.target().to_string());
        let work = if request.target().starts_with("/slow") { 300 } else { 1 };
        let limit = request.timeout().unwrap_or(Duration::MAX);
        let outcome = if Duration::from_millis(work) > limit {
            tokio::time::sleep(limit + Duration::from_millis(20)).await;
            Err(TransportError::Timeout)
        } else {
            tokio::time::sleep(Duration::from_millis(work)).await;
            Ok(ok(request))
        };
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn enforces_timeout(&self) -> bool {
        true
    }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<(Completion, EventLevel)>) -> Completion {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for completion")
        .expect("sink closed")
        .0
}

#[tokio::test]
async fn results_arrive_in_enqueue_order_one_at_a_time() {
    let transport = Recording::default();
    let mut dispatcher = Dispatcher::new(transport.clone());
    let handle = dispatcher.handle();

    let targets: Vec<String> = (0..20).map(|i| format!("/r/{i}")).collect();
    let ids: Vec<_> = targets.iter().map(|t| handle.enqueue(get(t)).unwrap()).collect();

    let completions: Vec<Completion> = dispatcher.drain().collect().await;
    let delivered: Vec<_> = completions.iter().map(|c| c.request.id()).collect();
    assert_eq!(delivered, ids);
    assert_eq!(*transport.sent.lock().unwrap(), targets);
    assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn get_then_post_scenario() {
    let mut dispatcher = Dispatcher::new(Recording::default());
    let handle = dispatcher.handle();
    let a = handle.enqueue(get("/a")).unwrap();
    let post = HttpRequest::new("/b", HttpMethod::Post)
        .with_body(br#"{"x":1}"#.to_vec())
        .unwrap()
        .with_content_type("application/json")
        .unwrap();
    let b = handle.enqueue(post).unwrap();

    let completions: Vec<Completion> = dispatcher.drain().collect().await;
    assert_eq!(completions.len(), 2);
    assert_eq!(completions[0].request.id(), a);
    assert_eq!(completions[0].request.method(), HttpMethod::Get);
    assert_eq!(completions[1].request.id(), b);
    assert_eq!(completions[1].request.body(), Some(&br#"{"x":1}"#[..]));
}

#[tokio::test]
async fn drain_is_restartable() {
    let mut dispatcher = Dispatcher::new(Recording::default());
    let handle = dispatcher.handle();

    assert_eq!(dispatcher.drain().count().await, 0);
    handle.enqueue(get("/a")).unwrap();
    assert_eq!(dispatcher.drain().count().await, 1);
    handle.enqueue(get("/b")).unwrap();
    handle.enqueue(get("/c")).unwrap();
    assert_eq!(dispatcher.drain().count().await, 2);
}

#[tokio::test]
async fn transport_failure_does_not_stop_the_queue() {
    let mut dispatcher = Dispatcher::new(Recording::default());
    let handle = dispatcher.handle();
    handle.enqueue(get("/a")).unwrap();
    handle.enqueue(get("/bad")).unwrap();
    handle.enqueue(get("/c")).unwrap();

    let completions: Vec<Completion> = dispatcher.drain().collect().await;
    let outcomes: Vec<_> = completions.iter().map(|c| c.error().cloned()).collect();
    assert_eq!(outcomes, vec![None, Some(TransportError::ConnectionRefused), None]);
}

#[tokio::test(start_paused = true)]
async fn slow_request_times_out_instead_of_hanging() {
    let mut dispatcher = Dispatcher::new(Hanging);
    let handle = dispatcher.handle();
    handle.set_timeouts(Some(Duration::from_secs(5)), None);
    handle.enqueue(get("/slow")).unwrap();
    handle.enqueue(get("/fast")).unwrap();

    let completions: Vec<Completion> = dispatcher.drain().collect().await;
    assert_eq!(completions[0].error(), Some(&TransportError::Timeout));
    assert_eq!(completions[0].request.timeout(), Some(Duration::from_secs(5)));
    assert_eq!(completions[1].status(), Some(200));
}

#[tokio::test(start_paused = true)]
async fn transport_owned_deadline_is_not_cut_short() {
    let transport = SelfTimed::default();
    let mut dispatcher = Dispatcher::new(transport.clone());
    let handle = dispatcher.handle();
    handle.set_timeouts(Some(Duration::from_millis(100)), None);
    handle.enqueue(get("/slow")).unwrap();
    handle.enqueue(get("/fast")).unwrap();

    let started = tokio::time::Instant::now();
    let slow = dispatcher.next_completion().await.unwrap();
    assert_eq!(slow.error(), Some(&TransportError::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(120));
    assert_eq!(transport.inner.active.load(Ordering::SeqCst), 0);

    let fast = dispatcher.next_completion().await.unwrap();
    assert_eq!(fast.status(), Some(200));
    assert_eq!(transport.inner.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(*transport.inner.sent.lock().unwrap(), vec!["/slow", "/fast"]);
}

#[tokio::test]
async fn shared_state_change_mid_send_only_affects_later_requests() {
    let (transport, gate, mut started) = Gated::new();
    let dispatcher = Dispatcher::new(transport);
    let handle = dispatcher.handle();
    let (sink, mut rx) = ChannelSink::new();

    handle.append_header("x-version", "1");
    handle.enqueue(get("/a")).unwrap();
    handle.enqueue(get("/b")).unwrap();
    let task = tokio::spawn(dispatcher.run(sink));

    assert_eq!(started.recv().await.as_deref(), Some("/a"));
    let in_flight = handle.in_flight();
    assert!(in_flight.is_some());

    let mut state = handle.shared_state();
    state.set_header("x-version", "2");
    state.timeout = Some(Duration::from_secs(30));
    handle.set_shared_state(state);
    gate.add_permits(2);

    let a = recv(&mut rx).await;
    let b = recv(&mut rx).await;
    assert_eq!(Some(a.request.id()), in_flight);
    assert_eq!(header(&a, "x-version"), Some("1"));
    assert_eq!(a.request.timeout(), None);
    assert_eq!(header(&b, "x-version"), Some("2"));
    assert_eq!(b.request.timeout(), Some(Duration::from_secs(30)));

    handle.stop();
    task.await.unwrap();
}

#[tokio::test]
async fn stop_during_send_delivers_in_flight_and_drops_the_rest() {
    let (transport, gate, mut started) = Gated::new();
    let dispatcher = Dispatcher::new(transport);
    let handle = dispatcher.handle();
    let (sink, mut rx) = ChannelSink::new();

    let first = handle.enqueue(get("/a")).unwrap();
    handle.enqueue(get("/b")).unwrap();
    handle.enqueue(get("/c")).unwrap();
    let task = tokio::spawn(dispatcher.run(sink));

    assert_eq!(started.recv().await.as_deref(), Some("/a"));
    handle.stop();
    assert_eq!(handle.enqueue(get("/d")).unwrap_err(), QueueError::Stopped);
    gate.add_permits(3);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("dispatcher did not stop")
        .unwrap();

    let delivered = recv(&mut rx).await;
    assert_eq!(delivered.request.id(), first);
    assert!(delivered.is_success());
    assert!(rx.recv().await.is_none(), "nothing after the in-flight request");
    assert!(started.recv().await.is_none(), "no further sends started");
    assert!(handle.is_empty());
}

#[tokio::test]
async fn stop_before_run_sends_nothing() {
    let transport = Recording::default();
    let dispatcher = Dispatcher::new(transport.clone());
    let handle = dispatcher.handle();
    handle.enqueue(get("/a")).unwrap();
    handle.stop();

    let (sink, mut rx) = ChannelSink::new();
    dispatcher.run(sink).await;
    assert!(rx.recv().await.is_none());
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn enqueue_wakes_an_idle_loop() {
    let dispatcher = Dispatcher::new(Recording::default()).with_tick(Duration::from_secs(3600));
    let handle = dispatcher.handle();
    let (sink, mut rx) = ChannelSink::new();
    let task = tokio::spawn(dispatcher.run(sink));

    tokio::task::yield_now().await;
    handle.enqueue(get("/late")).unwrap();
    let completion = recv(&mut rx).await;
    assert_eq!(completion.request.target(), "/late");

    handle.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("stop did not wake the loop")
        .unwrap();
}

#[tokio::test]
async fn sink_sees_configured_level_once_per_request() {
    let dispatcher = Dispatcher::new(Recording::default());
    let handle = dispatcher.handle();
    handle.set_event_level(EventLevel(5));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let stop = handle.clone();
    let sink = move |c: &Completion, level: EventLevel| {
        record.lock().unwrap().push((c.request.target().to_string(), level));
        if c.request.target() == "/last" {
            stop.stop();
        }
    };

    handle.enqueue(get("/a")).unwrap();
    handle.enqueue(get("/last")).unwrap();
    tokio::time::timeout(Duration::from_secs(5), dispatcher.run(sink))
        .await
        .expect("dispatcher did not stop");

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("/a".to_string(), EventLevel(5)),
            ("/last".to_string(), EventLevel(5)),
        ]
    );
}

#[tokio::test]
async fn replaced_cookie_jar_is_used_by_later_requests() {
    let mut dispatcher = Dispatcher::new(Recording::default());
    let handle = dispatcher.handle();
    let jar = httpq_core::CookieJar::new();
    handle.set_shared_state(SharedState {
        cookie_jar: jar.clone(),
        ..SharedState::default()
    });
    handle.enqueue(get("/a")).unwrap();

    let completion = dispatcher.next_completion().await.unwrap();
    assert!(completion.request.cookie_jar().unwrap().same_jar(&jar));
}
