use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use broadcast_hub::{
    config::{DuplicatePolicy, HubConfig},
    error::{DeliveryError, HubError},
    hub::BroadcastHub,
    recipient::{ClientHandle, Recipient},
};
use tokio::sync::Notify;

/// Records every delivery it accepts.
struct Recorder {
    identity: String,
    received: Mutex<Vec<(String, String)>>,
}

impl Recorder {
    fn new(identity: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: identity.to_string(),
            received: Mutex::new(Vec::new()),
        })
    }

    fn received(&self) -> Vec<(String, String)> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recipient for Recorder {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn deliver(&self, text: &str, sender: &str) -> Result<(), DeliveryError> {
        self.received
            .lock()
            .unwrap()
            .push((text.to_string(), sender.to_string()));
        Ok(())
    }
}

/// Every delivery fails, as if the peer's connection had dropped.
struct Broken {
    identity: String,
    attempts: AtomicUsize,
}

impl Broken {
    fn new(identity: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: identity.to_string(),
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Recipient for Broken {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn deliver(&self, _text: &str, _sender: &str) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::failed(&self.identity, "connection reset"))
    }
}

/// Never completes a delivery.
struct Stalled {
    identity: String,
}

#[async_trait]
impl Recipient for Stalled {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn deliver(&self, _text: &str, _sender: &str) -> Result<(), DeliveryError> {
        std::future::pending().await
    }
}

/// Signals when a delivery starts, then waits to be released.
struct Gated {
    identity: String,
    entered: Arc<Notify>,
    release: Arc<Notify>,
    succeed: bool,
}

impl Gated {
    fn new(identity: &str, succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            identity: identity.to_string(),
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            succeed,
        })
    }
}

#[async_trait]
impl Recipient for Gated {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn deliver(&self, _text: &str, _sender: &str) -> Result<(), DeliveryError> {
        self.entered.notify_one();
        self.release.notified().await;
        if self.succeed {
            Ok(())
        } else {
            Err(DeliveryError::failed(&self.identity, "connection reset"))
        }
    }
}

fn hub_with_timeout(timeout: Duration) -> BroadcastHub {
    BroadcastHub::with_config(HubConfig::default().delivery_timeout(timeout))
}

fn said(text: &str, sender: &str) -> (String, String) {
    (text.to_string(), sender.to_string())
}

#[tokio::test]
async fn alice_reaches_bob_and_carol_once() {
    let hub = BroadcastHub::new();
    let alice = Recorder::new("Alice");
    let bob = Recorder::new("Bob");
    let carol = Recorder::new("Carol");
    for client in [&alice, &bob, &carol] {
        hub.register_client(client.clone()).expect("register");
    }

    let report = hub.broadcast("hi", "Alice").await;

    assert_eq!(report.delivered, vec!["Bob", "Carol"]);
    assert!(report.is_clean());
    assert_eq!(bob.received(), vec![said("hi", "Alice")]);
    assert_eq!(carol.received(), vec![said("hi", "Alice")]);
    assert!(alice.received().is_empty());
}

#[tokio::test]
async fn failing_recipient_is_evicted() {
    let hub = BroadcastHub::new();
    let alice = Recorder::new("Alice");
    let bob = Broken::new("Bob");
    hub.register_client(alice.clone()).expect("alice");
    hub.register_client(bob.clone()).expect("bob");

    let report = hub.broadcast("hi", "Alice").await;

    assert_eq!(report.failed(), vec!["Bob"]);
    assert_eq!(hub.connected_clients(), vec!["Alice"]);

    let second = hub.broadcast("anyone?", "Alice").await;
    assert_eq!(second.delivered_count(), 0);
    assert!(second.is_clean());
    assert_eq!(bob.attempts.load(Ordering::SeqCst), 1);
    assert!(alice.received().is_empty());
}

#[tokio::test]
async fn failure_does_not_stop_other_deliveries() {
    let hub = BroadcastHub::new();
    let sender = Recorder::new("amy");
    let before = Recorder::new("bea");
    let broken = Broken::new("cal");
    let after = Recorder::new("dan");
    hub.register_client(sender.clone()).expect("amy");
    hub.register_client(before.clone()).expect("bea");
    hub.register_client(broken.clone()).expect("cal");
    hub.register_client(after.clone()).expect("dan");

    let report = hub.broadcast("ping", "amy").await;

    assert_eq!(report.delivered, vec!["bea", "dan"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(before.received(), vec![said("ping", "amy")]);
    assert_eq!(after.received(), vec![said("ping", "amy")]);
    assert_eq!(hub.connected_clients(), vec!["amy", "bea", "dan"]);
}

#[tokio::test]
async fn broadcast_reaches_every_other_peer() {
    for n in 2..=6 {
        let hub = BroadcastHub::new();
        let peers: Vec<Arc<Recorder>> = (0..n)
            .map(|i| Recorder::new(&format!("peer-{i}")))
            .collect();
        for peer in &peers {
            hub.register_client(peer.clone()).expect("register");
        }

        let report = hub.broadcast("hello", "peer-0").await;

        assert_eq!(report.delivered_count(), n - 1);
        assert!(peers[0].received().is_empty());
        for peer in &peers[1..] {
            assert_eq!(peer.received(), vec![said("hello", "peer-0")]);
        }
    }
}

#[tokio::test]
async fn stalled_recipient_times_out_and_is_evicted() {
    let hub = hub_with_timeout(Duration::from_millis(100));
    let alice = Recorder::new("alice");
    let bob = Recorder::new("bob");
    hub.register_client(alice.clone()).expect("alice");
    hub.register_client(bob.clone()).expect("bob");
    hub.register_client(Arc::new(Stalled {
        identity: "zed".into(),
    }))
    .expect("zed");

    let report = hub.broadcast("hi", "alice").await;

    assert_eq!(report.delivered, vec!["bob"]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].is_timeout());
    assert_eq!(report.failures[0].identity(), "zed");
    assert_eq!(bob.received(), vec![said("hi", "alice")]);
    assert_eq!(hub.connected_clients(), vec!["alice", "bob"]);
}

#[tokio::test]
async fn stalled_recipients_time_out_concurrently() {
    let timeout = Duration::from_millis(300);
    let hub = hub_with_timeout(timeout);
    hub.register_client(Recorder::new("sender")).expect("sender");
    for i in 0..3 {
        hub.register_client(Arc::new(Stalled {
            identity: format!("stalled-{i}"),
        }))
        .expect("stalled");
    }

    let started = Instant::now();
    let report = hub.broadcast("hi", "sender").await;
    let elapsed = started.elapsed();

    assert_eq!(report.failures.len(), 3);
    assert!(elapsed >= timeout);
    assert!(
        elapsed < timeout * 3,
        "deliveries should time out in parallel, took {elapsed:?}"
    );
    assert_eq!(hub.client_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn directory_stays_usable_during_slow_delivery() {
    let hub = Arc::new(BroadcastHub::new());
    let alice = Recorder::new("alice");
    let slow = Gated::new("slow", true);
    hub.register_client(alice.clone()).expect("alice");
    hub.register_client(slow.clone()).expect("slow");

    let broadcast = tokio::spawn({
        let hub = Arc::clone(&hub);
        async move { hub.broadcast("hi", "alice").await }
    });
    slow.entered.notified().await;

    let late = Recorder::new("late");
    hub.register_client(late.clone()).expect("late");
    assert!(hub.unregister_client("alice"));
    assert_eq!(hub.connected_clients(), vec!["late", "slow"]);

    slow.release.notify_one();
    let report = broadcast.await.expect("broadcast task");

    assert_eq!(report.delivered, vec!["slow"]);
    assert!(late.received().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_failure_does_not_evict_newer_registration() {
    let hub = Arc::new(BroadcastHub::new());
    let alice = Recorder::new("alice");
    let old_bob = Gated::new("bob", false);
    hub.register_client(alice.clone()).expect("alice");
    hub.register_client(old_bob.clone()).expect("old bob");

    let broadcast = tokio::spawn({
        let hub = Arc::clone(&hub);
        async move { hub.broadcast("hi", "alice").await }
    });
    old_bob.entered.notified().await;

    let new_bob = Recorder::new("bob");
    let registration = hub.register_client(new_bob.clone()).expect("new bob");
    assert!(registration.is_replacement());

    old_bob.release.notify_one();
    let report = broadcast.await.expect("broadcast task");

    assert_eq!(report.failed(), vec!["bob"]);
    assert_eq!(hub.connected_clients(), vec!["alice", "bob"]);

    hub.broadcast("again", "alice").await;
    assert_eq!(new_bob.received(), vec![said("again", "alice")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_are_all_kept() {
    let hub = Arc::new(BroadcastHub::new());

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                hub.register_client(Recorder::new(&format!("peer-{i:02}")))
                    .expect("distinct identity");
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("register task");
    }

    assert_eq!(hub.client_count(), 64);
}

#[tokio::test]
async fn unregister_is_permanent_until_reregistered() {
    let hub = BroadcastHub::new();
    let alice = Recorder::new("alice");
    let bob = Recorder::new("bob");
    hub.register_client(alice.clone()).expect("alice");
    hub.register_client(bob.clone()).expect("bob");

    assert!(hub.unregister_client("bob"));
    assert!(!hub.unregister_client("bob"));
    assert_eq!(hub.connected_clients(), vec!["alice"]);

    hub.broadcast("while away", "alice").await;
    assert!(bob.received().is_empty());

    hub.register_client(bob.clone()).expect("bob again");
    hub.broadcast("welcome back", "alice").await;
    assert_eq!(bob.received(), vec![said("welcome back", "alice")]);
}

#[tokio::test]
async fn replace_policy_hands_identity_to_newest_handle() {
    let hub = BroadcastHub::with_config(
        HubConfig::default().duplicate_policy(DuplicatePolicy::Replace),
    );
    let first = Recorder::new("bob");
    let second = Recorder::new("bob");
    hub.register_client(Recorder::new("alice")).expect("alice");
    hub.register_client(first.clone()).expect("first");
    hub.register_client(second.clone()).expect("second");

    assert_eq!(hub.client_count(), 2);
    hub.broadcast("hi", "alice").await;
    assert!(first.received().is_empty());
    assert_eq!(second.received(), vec![said("hi", "alice")]);
}

#[tokio::test]
async fn reject_policy_keeps_original_handle() {
    let hub = BroadcastHub::with_config(
        HubConfig::default().duplicate_policy(DuplicatePolicy::Reject),
    );
    let first = Recorder::new("bob");
    let second = Recorder::new("bob");
    hub.register_client(Recorder::new("alice")).expect("alice");
    hub.register_client(first.clone()).expect("first");

    let err = hub.register_client(second.clone()).unwrap_err();

    assert_eq!(err, HubError::DuplicateIdentity("bob".into()));
    assert_eq!(hub.client_count(), 2);
    hub.broadcast("hi", "alice").await;
    assert_eq!(first.received(), vec![said("hi", "alice")]);
    assert!(second.received().is_empty());
}

#[tokio::test]
async fn sequential_broadcasts_arrive_in_order() {
    let hub = BroadcastHub::new();
    let bob = Recorder::new("bob");
    hub.register_client(Recorder::new("alice")).expect("alice");
    hub.register_client(bob.clone()).expect("bob");

    for i in 0..20 {
        hub.broadcast(&format!("line {i}"), "alice").await;
    }

    let expected: Vec<_> = (0..20).map(|i| said(&format!("line {i}"), "alice")).collect();
    assert_eq!(bob.received(), expected);
}

#[tokio::test]
async fn release_only_removes_current_handle() {
    let hub = BroadcastHub::new();
    let stale: ClientHandle = Recorder::new("bob");
    let fresh: ClientHandle = Recorder::new("bob");
    hub.register_client(stale.clone()).expect("stale");
    hub.register_client(fresh.clone()).expect("fresh");

    assert!(!hub.release(&stale));
    assert_eq!(hub.connected_clients(), vec!["bob"]);
    assert!(hub.release(&fresh));
    assert!(hub.connected_clients().is_empty());
}
