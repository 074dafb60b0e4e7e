//! Fan-out of committed changes.
//!
//! # Responsibilities
//! - Keep the table of registered subscribers and their filters
//! - Deliver one [`ChangeEvent`] per commit to every matching subscriber
//! - Mirror events onto a broadcast channel for async consumers
//!
//! # Design Decisions
//! - `publish` only enqueues. A dedicated dispatcher thread runs subscribers
//!   in publish order, so a slow subscriber never holds up the committer
//! - Subscriber errors and panics are logged and counted, never propagated
//! - The broadcast mirror is fed at publish time, ahead of dispatch

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::config::schema::Category;
use crate::observability::metrics;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Record of one committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub category: Category,
    pub key: String,
    pub old_value: String,
    pub new_value: String,
    pub revision: u64,
    pub timestamp: SystemTime,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SubscriberError(pub String);

impl SubscriberError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A consumer of configuration changes.
pub trait ConfigSubscriber: Send + Sync {
    fn on_config_changed(&self, event: &ChangeEvent) -> Result<(), SubscriberError>;
}

impl<F> ConfigSubscriber for F
where
    F: Fn(&ChangeEvent) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_config_changed(&self, event: &ChangeEvent) -> Result<(), SubscriberError> {
        self(event)
    }
}

/// Which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Category(Category),
    Key { category: Category, key: String },
}

impl EventFilter {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Category(c) => *c == event.category,
            EventFilter::Key { category, key } => *category == event.category && *key == event.key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    filter: EventFilter,
    subscriber: Arc<dyn ConfigSubscriber>,
}

type Subscriptions = DashMap<SubscriptionId, Subscription>;

/// Dispatcher progress, shared with callers waiting for delivery.
#[derive(Default)]
struct Progress {
    delivered: Mutex<u64>,
    drained: Condvar,
    failures: AtomicU64,
}

impl Progress {
    fn record(&self, failures: usize) {
        self.failures.fetch_add(failures as u64, Ordering::Relaxed);
        let mut delivered = self.delivered.lock().unwrap_or_else(PoisonError::into_inner);
        *delivered += 1;
        self.drained.notify_all();
    }
}

pub struct ChangeNotifier {
    subscriptions: Arc<Subscriptions>,
    next_id: AtomicU64,
    events: broadcast::Sender<ChangeEvent>,
    queue: mpsc::UnboundedSender<ChangeEvent>,
    published: AtomicU64,
    progress: Arc<Progress>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (queue, pending) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(Subscriptions::new());
        let progress = Arc::new(Progress::default());
        spawn_dispatcher(pending, Arc::clone(&subscriptions), Arc::clone(&progress));

        Self {
            subscriptions,
            next_id: AtomicU64::new(1),
            events,
            queue,
            published: AtomicU64::new(0),
            progress,
        }
    }

    pub fn subscribe(&self, filter: EventFilter, subscriber: Arc<dyn ConfigSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(subscription = id.0, filter = ?filter, "Config subscriber registered");
        self.subscriptions.insert(id, Subscription { filter, subscriber });
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Receiver of every event published from now on. Slow receivers lag
    /// and lose the oldest events.
    pub fn watch_events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Queue `event` for delivery to every matching subscriber and return
    /// without waiting for them.
    pub fn publish(&self, event: ChangeEvent) {
        self.published.fetch_add(1, Ordering::SeqCst);
        metrics::record_change_event(event.category);
        // No receivers is fine.
        let _ = self.events.send(event.clone());

        if let Err(mpsc::error::SendError(event)) = self.queue.send(event) {
            // Dispatcher is gone; deliver on the caller's thread.
            let failures = deliver(&self.subscriptions, &event);
            self.progress.record(failures);
        }
    }

    /// Block until every event published before this call has been handed
    /// to its subscribers, or `timeout` elapses. Returns false on timeout.
    ///
    /// Must not be called from a subscriber.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let target = self.published.load(Ordering::SeqCst);
        let delivered = self.progress.delivered.lock().unwrap_or_else(PoisonError::into_inner);
        let (delivered, _) = self
            .progress
            .drained
            .wait_timeout_while(delivered, timeout, |delivered| *delivered < target)
            .unwrap_or_else(PoisonError::into_inner);
        *delivered >= target
    }

    /// Subscriber calls that returned an error or panicked.
    pub fn failure_count(&self) -> u64 {
        self.progress.failures.load(Ordering::Relaxed)
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriptions.len())
            .field("receivers", &self.events.receiver_count())
            .field("published", &self.published.load(Ordering::Relaxed))
            .finish()
    }
}

/// The thread exits once the notifier, and with it the queue sender, is
/// dropped.
fn spawn_dispatcher(
    mut pending: mpsc::UnboundedReceiver<ChangeEvent>,
    subscriptions: Arc<Subscriptions>,
    progress: Arc<Progress>,
) {
    let spawned = thread::Builder::new()
        .name("config-notifier".into())
        .spawn(move || {
            while let Some(event) = pending.blocking_recv() {
                let failures = deliver(&subscriptions, &event);
                progress.record(failures);
            }
            tracing::debug!("Config notifier stopped");
        });

    if let Err(e) = spawned {
        tracing::error!(error = %e, "Failed to start config notifier; delivering inline");
    }
}

/// Run every subscriber matching `event`. Returns the number that failed.
fn deliver(subscriptions: &Subscriptions, event: &ChangeEvent) -> usize {
    // Collect first so no shard lock is held while user code runs.
    let targets: Vec<(SubscriptionId, Arc<dyn ConfigSubscriber>)> = subscriptions
        .iter()
        .filter(|s| s.filter.matches(event))
        .map(|s| (*s.key(), Arc::clone(&s.subscriber)))
        .collect();

    let mut failures = 0;
    for (id, subscriber) in targets {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_config_changed(event)));
        let error = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "subscriber panicked".to_string(),
        };
        failures += 1;
        metrics::record_subscriber_failure(event.category);
        tracing::warn!(
            subscription = id.0,
            category = %event.category,
            key = %event.key,
            revision = event.revision,
            error = %error,
            "Config subscriber failed"
        );
    }
    failures
}
