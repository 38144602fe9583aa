//! Connection loop tests — ordering, token propagation, single-flight,
//! liveness, and backoff timing, driven by a scripted transport under
//! paused tokio time.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use firenze_client::*;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::{Instant, timeout};

/// Transport that answers requests from a script, then hangs forever
/// (like a long poll with nothing to say).
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Value, PollError>>>,
    requests: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    fn new(script: impl IntoIterator<Item = Result<Value, PollError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    fn times(&self) -> Vec<Instant> {
        self.requests.lock().iter().map(|(_, at)| *at).collect()
    }
}

impl PollTransport for ScriptedTransport {
    fn get_json(&self, url: &str) -> impl Future<Output = Result<Value, PollError>> + Send {
        self.requests.lock().push((url.to_string(), Instant::now()));
        let next = self.script.lock().pop_front();
        async move {
            match next {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }
}

type Seen = Arc<Mutex<Vec<(String, Value)>>>;

fn recorder() -> (Seen, Arc<impl UpdateDispatcher>) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let dispatcher = move |path: &str, message: &Value| -> Result<(), DispatchError> {
        sink.lock().push((path.to_string(), message.clone()));
        Ok(())
    };
    (seen, Arc::new(dispatcher))
}

fn config() -> ConnectionConfig {
    ConnectionConfig::for_host("example.com", 4020)
}

/// Wait until the loop has sent `n` polls and settled in `phase`.
async fn wait_for(handle: &ConnectionHandle, n: u64, phase: LoopPhase) -> ConnectionStatus {
    let mut rx = handle.subscribe();
    timeout(
        Duration::from_secs(60),
        rx.wait_for(|s| s.stats.polls_sent >= n && s.phase == phase),
    )
    .await
    .expect("timed out waiting for loop")
    .expect("status channel closed")
    .clone()
}

fn ok(token: &str, updates: Value) -> Result<Value, PollError> {
    Ok(json!({ "reconnectWith": token, "updates": updates }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Steady state
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn first_poll_uses_seed_and_prefix() {
    let transport = ScriptedTransport::new([]);
    let (_seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    wait_for(&handle, 1, LoopPhase::RequestInFlight).await;
    assert_eq!(transport.urls(), ["http://example.com:4020/comet/"]);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn seed_token_is_sent_first() {
    let transport = ScriptedTransport::new([]);
    let (_seen, dispatcher) = recorder();
    let config = ConnectionConfig {
        reconnect_with: "uid-9/4".into(),
        ..config()
    };
    let mut handle = Connection::spawn_shared(config, transport.clone(), dispatcher);

    let status = wait_for(&handle, 1, LoopPhase::RequestInFlight).await;
    assert_eq!(status.continuation_token, "uid-9/4");
    assert_eq!(transport.urls(), ["http://example.com:4020/comet/uid-9/4"]);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn token_propagates_between_polls() {
    let transport = ScriptedTransport::new([
        ok("abc123", json!([{"path": "/foo", "message": "m1"}])),
        ok("t2", json!([])),
        ok("t3", json!([])),
    ]);
    let (seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    let status = wait_for(&handle, 4, LoopPhase::RequestInFlight).await;
    assert_eq!(
        transport.urls(),
        [
            "http://example.com:4020/comet/",
            "http://example.com:4020/comet/abc123",
            "http://example.com:4020/comet/t2",
            "http://example.com:4020/comet/t3",
        ]
    );
    assert_eq!(*seen.lock(), vec![("/foo".to_string(), json!("m1"))]);
    assert_eq!(status.continuation_token, "t3");
    assert_eq!(status.stats.polls_succeeded, 3);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn updates_are_dispatched_in_order() {
    let transport = ScriptedTransport::new([
        ok(
            "a",
            json!([
                {"path": "/1", "message": 1},
                {"path": "/2", "message": {"nested": [2]}},
                {"path": "/3", "message": null},
                {"path": "/2", "message": "again"},
            ]),
        ),
        ok("b", json!([{"path": "/4", "message": 4}, {"path": "/5", "message": 5}])),
    ]);
    let (seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    let status = wait_for(&handle, 3, LoopPhase::RequestInFlight).await;
    let paths: Vec<String> = seen.lock().iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(paths, ["/1", "/2", "/3", "/2", "/4", "/5"]);
    assert_eq!(seen.lock()[1].1, json!({"nested": [2]}));
    assert_eq!(status.stats.updates_dispatched, 6);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn successful_poll_repolls_without_delay() {
    let transport = ScriptedTransport::new([ok("t2", json!([])), ok("t3", json!([]))]);
    let (_seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    wait_for(&handle, 3, LoopPhase::RequestInFlight).await;
    let times = transport.times();
    assert_eq!(times[1], times[0]);
    assert_eq!(times[2], times[0]);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn dispatch_failure_does_not_trigger_backoff() {
    let transport = ScriptedTransport::new([ok(
        "next",
        json!([{"path": "/bad", "message": 1}, {"path": "/good", "message": 2}]),
    )]);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    let dispatcher = move |path: &str, _: &Value| -> Result<(), DispatchError> {
        sink.lock().push(path.to_string());
        if path == "/bad" {
            return Err(DispatchError::new(path, "unknown listener"));
        }
        Ok(())
    };
    let mut handle = Connection::spawn(config(), ArcTransport(transport.clone()), dispatcher);

    let status = wait_for(&handle, 2, LoopPhase::RequestInFlight).await;
    assert_eq!(*delivered.lock(), ["/bad", "/good"]);
    assert_eq!(status.stats.dispatch_failures, 1);
    assert_eq!(status.stats.polls_failed, 0);
    let times = transport.times();
    assert_eq!(times[1], times[0]);
    assert_eq!(transport.urls()[1], "http://example.com:4020/comet/next");

    handle.stop().await;
}

/// Lets a shared scripted transport be handed to [`Connection::spawn`].
struct ArcTransport(Arc<ScriptedTransport>);

impl PollTransport for ArcTransport {
    fn get_json(&self, url: &str) -> impl Future<Output = Result<Value, PollError>> + Send {
        self.0.get_json(url)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure and backoff
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn null_body_retries_after_delay_with_same_token() {
    let transport = ScriptedTransport::new([ok("t1", json!([])), Ok(json!(null))]);
    let (seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    let waiting = wait_for(&handle, 2, LoopPhase::WaitingBackoff).await;
    assert_eq!(waiting.continuation_token, "t1");
    assert_eq!(waiting.stats.polls_failed, 1);

    wait_for(&handle, 3, LoopPhase::RequestInFlight).await;
    let urls = transport.urls();
    assert_eq!(urls[1], "http://example.com:4020/comet/t1");
    assert_eq!(urls[2], "http://example.com:4020/comet/t1");
    assert!(seen.lock().is_empty());

    let times = transport.times();
    assert!(times[2] - times[1] >= Duration::from_millis(1000));

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn every_failure_kind_backs_off() {
    let transport = ScriptedTransport::new([
        Err(PollError::transport("connection refused")),
        Err(PollError::Status(503)),
        Err(PollError::decode("expected value at line 1 column 1")),
        Ok(json!({"reconnectWith": "x"})),
        Ok(json!([1, 2, 3])),
        ok("recovered", json!([])),
    ]);
    let (_seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    let status = wait_for(&handle, 7, LoopPhase::RequestInFlight).await;
    assert_eq!(status.stats.polls_failed, 5);
    assert_eq!(status.stats.polls_succeeded, 1);
    assert_eq!(status.stats.consecutive_failures, 0);
    assert_eq!(status.continuation_token, "recovered");

    let urls = transport.urls();
    assert!(urls[..4].iter().all(|u| u == "http://example.com:4020/comet/"));
    // The token-only body is rejected but still moves the token.
    assert_eq!(urls[4], "http://example.com:4020/comet/x");
    assert_eq!(urls[5], "http://example.com:4020/comet/x");
    assert_eq!(urls[6], "http://example.com:4020/comet/recovered");

    let times = transport.times();
    for pair in times[..6].windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
    }
    assert_eq!(times[6], times[5]);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn consecutive_failures_accumulate() {
    let transport = ScriptedTransport::new([
        Err(PollError::Status(500)),
        Err(PollError::Status(500)),
        Err(PollError::Status(500)),
    ]);
    let (_seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    let status = wait_for(&handle, 4, LoopPhase::RequestInFlight).await;
    assert_eq!(status.stats.consecutive_failures, 3);
    assert_eq!(status.stats.polls_failed, 3);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn retry_delay_is_configurable() {
    let transport = ScriptedTransport::new([Err(PollError::Status(502))]);
    let (_seen, dispatcher) = recorder();
    let config = ConnectionConfig {
        retry_delay_ms: 250,
        ..config()
    };
    let mut handle = Connection::spawn_shared(config, transport.clone(), dispatcher);

    wait_for(&handle, 2, LoopPhase::RequestInFlight).await;
    let times = transport.times();
    let gap = times[1] - times[0];
    assert!(gap >= Duration::from_millis(250));
    assert!(gap < Duration::from_millis(1000));

    handle.stop().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Single-flight and lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn loop_is_never_idle_while_running() {
    let transport = ScriptedTransport::new([
        ok("a", json!([{"path": "/x", "message": 1}])),
        Err(PollError::Status(500)),
        ok("b", json!([])),
        Ok(json!(null)),
        ok("c", json!([])),
    ]);
    let (_seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    let mut rx = handle.subscribe();
    let observer = tokio::spawn(async move {
        let mut phases = Vec::new();
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().clone();
            phases.push(status.phase);
            if status.stats.polls_sent >= 6 && status.phase == LoopPhase::RequestInFlight {
                break;
            }
        }
        phases
    });

    let phases = timeout(Duration::from_secs(60), observer)
        .await
        .expect("timed out")
        .expect("observer panicked");
    assert!(!phases.is_empty());
    assert!(phases.iter().all(|p| *p != LoopPhase::Idle));
    assert!(phases.contains(&LoopPhase::WaitingBackoff));

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_retry() {
    let transport = ScriptedTransport::new([Err(PollError::Status(500))]);
    let (_seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    wait_for(&handle, 1, LoopPhase::WaitingBackoff).await;
    handle.stop().await;

    assert!(!handle.is_running());
    assert_eq!(handle.status().phase, LoopPhase::Idle);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_aborts_in_flight_request() {
    let transport = ScriptedTransport::new([]);
    let (_seen, dispatcher) = recorder();
    let mut handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    wait_for(&handle, 1, LoopPhase::RequestInFlight).await;
    handle.stop().await;

    let status = handle.status();
    assert_eq!(status.phase, LoopPhase::Idle);
    assert_eq!(status.stats.polls_sent, 1);
    assert!(!handle.is_running());
}

#[tokio::test(start_paused = true)]
async fn dropping_handle_stops_loop() {
    let transport = ScriptedTransport::new([Err(PollError::Status(500))]);
    let (_seen, dispatcher) = recorder();
    let handle = Connection::spawn_shared(config(), transport.clone(), dispatcher);

    wait_for(&handle, 1, LoopPhase::WaitingBackoff).await;
    drop(handle);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn connections_are_independent() {
    let first = ScriptedTransport::new([ok("one", json!([]))]);
    let second = ScriptedTransport::new([Err(PollError::Status(500))]);
    let (seen_a, dispatcher_a) = recorder();
    let (seen_b, dispatcher_b) = recorder();

    let mut a = Connection::spawn_shared(config(), first.clone(), dispatcher_a);
    let mut b = Connection::spawn_shared(
        ConnectionConfig {
            path_prefix: "other/".into(),
            ..config()
        },
        second.clone(),
        dispatcher_b,
    );
    assert_ne!(a.id(), b.id());

    let status_a = wait_for(&a, 2, LoopPhase::RequestInFlight).await;
    let status_b = wait_for(&b, 1, LoopPhase::WaitingBackoff).await;
    assert_eq!(status_a.continuation_token, "one");
    assert_eq!(status_b.continuation_token, "");
    assert_eq!(second.urls(), ["http://example.com:4020/other/"]);
    assert!(seen_a.lock().is_empty() && seen_b.lock().is_empty());

    a.stop().await;
    b.stop().await;
}

#[tokio::test(start_paused = true)]
async fn relative_url_without_base_fails_into_backoff() {
    let config = ConnectionConfig {
        retry_delay_ms: 100,
        ..ConnectionConfig::default()
    };
    let mut handle = Connection::spawn(config, ReqwestTransport::new(), LoggingDispatcher);

    let status = wait_for(&handle, 1, LoopPhase::WaitingBackoff).await;
    assert_eq!(status.stats.polls_failed, 1);

    handle.stop().await;
}
