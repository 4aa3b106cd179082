//! Outgoing transaction queues, one per remote destination.
//!
//! [`OutgoingQueues`] is the registry: it fans an event out to every
//! destination, creating a [`destination::DestinationQueue`] the first time a
//! destination is seen. The registry lock is only held to look a queue up,
//! never while enqueueing, so a slow destination cannot stall the others.
//!
//! ```text
//!  fan_out(ev, [b, c, self])
//!       │
//!       ├── b ──► DestinationQueue(b) ──► txn(b, prev=[…]) ──► send
//!       └── c ──► DestinationQueue(c) ──► txn(c, prev=[…]) ──► send
//! ```

mod destination;
pub mod retry;
pub mod sender;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::types::{Pdu, TransactionId};
use destination::DestinationQueue;
use retry::RetryPolicy;
use sender::TransactionSender;

/// Capacity of the degraded-destination broadcast channel.
const DEGRADED_CHANNEL_CAPACITY: usize = 256;

/// Signal raised when a queue gives up on its destination.
#[derive(Debug, Clone, Serialize)]
pub struct DegradedDestination {
    pub destination: String,
    /// The transaction that could not be delivered.
    pub transaction_id: TransactionId,
    /// Events dropped with it, including any still pending.
    pub dropped_events: usize,
    pub reason: String,
}

/// Registry of per-destination queues for one origin server.
///
/// Cheap to clone; clones share the same queues.
pub struct OutgoingQueues<S: TransactionSender> {
    inner: Arc<Shared<S>>,
}

impl<S: TransactionSender> Clone for OutgoingQueues<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

pub(crate) struct Shared<S: TransactionSender> {
    origin: String,
    sender: Arc<S>,
    policy: RetryPolicy,
    queues: Mutex<HashMap<String, Arc<DestinationQueue<S>>>>,
    degraded_tx: broadcast::Sender<DegradedDestination>,
}

impl<S: TransactionSender> Shared<S> {
    /// Remove `queue` from the map, unless it has already been replaced.
    pub(crate) async fn remove(&self, destination: &str, queue: &DestinationQueue<S>) {
        let mut queues = self.queues.lock().await;
        if queues.get(destination).is_some_and(|q| std::ptr::eq(Arc::as_ptr(q), queue)) {
            queues.remove(destination);
        }
    }

    pub(crate) fn notify_degraded(&self, signal: DegradedDestination) {
        // Nobody listening is fine.
        let _ = self.degraded_tx.send(signal);
    }
}

impl<S: TransactionSender> OutgoingQueues<S> {
    /// Create an empty registry sending as `origin` through `sender`.
    pub fn new(origin: impl Into<String>, sender: Arc<S>, policy: RetryPolicy) -> Self {
        let (degraded_tx, _) = broadcast::channel(DEGRADED_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Shared {
                origin: origin.into(),
                sender,
                policy,
                queues: Mutex::new(HashMap::new()),
                degraded_tx,
            }),
        }
    }

    /// The server name transactions are sent as.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    /// Queue `pdu` for every destination except ourselves.
    ///
    /// Returns once the event is queued; delivery happens in the background.
    pub async fn fan_out(&self, pdu: &Pdu, destinations: &[String]) {
        let destinations = self.filter_destinations(destinations);
        info!(event_id = pdu.event_id(), ?destinations, "Sending event");

        for destination in destinations {
            let mut pdu = pdu.clone();
            loop {
                let queue = self.queue_for(destination).await;
                match queue.enqueue(pdu).await {
                    Ok(()) => break,
                    // Closed between lookup and enqueue; drop it and look again.
                    Err(returned) => {
                        self.inner.remove(destination, &queue).await;
                        pdu = returned;
                    }
                }
            }
        }
    }

    /// Drop queues that have been idle for at least `ttl`. Returns how many went.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut queues = self.inner.queues.lock().await;
        let before = queues.len();
        queues.retain(|_, queue| !queue.close_if_idle(ttl));
        let evicted = before - queues.len();
        if evicted > 0 {
            debug!(evicted, remaining = queues.len(), "Evicted idle destination queues");
        }
        evicted
    }

    /// Subscribe to destinations being given up on.
    pub fn subscribe_degraded(&self) -> broadcast::Receiver<DegradedDestination> {
        self.inner.degraded_tx.subscribe()
    }

    /// Number of destinations with a queue.
    pub async fn len(&self) -> usize {
        self.inner.queues.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, destination: &str) -> bool {
        self.inner.queues.lock().await.contains_key(destination)
    }

    /// Our own name and repeated names removed, order kept.
    fn filter_destinations<'a>(&self, destinations: &'a [String]) -> Vec<&'a str> {
        let mut seen = HashSet::new();
        destinations
            .iter()
            .map(String::as_str)
            .filter(|d| *d != self.inner.origin && seen.insert(*d))
            .collect()
    }

    async fn queue_for(&self, destination: &str) -> Arc<DestinationQueue<S>> {
        let mut queues = self.inner.queues.lock().await;
        let queue = queues.entry(destination.to_owned()).or_insert_with(|| {
            debug!(destination, "Creating destination queue");
            Arc::new(DestinationQueue::new(
                self.inner.origin.clone(),
                destination.to_owned(),
                Arc::clone(&self.inner.sender),
                self.inner.policy,
                Arc::downgrade(&self.inner),
            ))
        });
        Arc::clone(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{pdu, RecordingSender};
    use super::*;
    use crate::error::FederationError;
    use crate::queue::sender::SendError;
    use std::sync::atomic::Ordering;

    const ORIGIN: &str = "a.example";

    fn policy() -> RetryPolicy {
        RetryPolicy {
            request_timeout: Duration::from_secs(10),
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }

    fn registry(sender: &Arc<RecordingSender>) -> OutgoingQueues<RecordingSender> {
        OutgoingQueues::new(ORIGIN, Arc::clone(sender), policy())
    }

    fn dests(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn batches_pending_events_and_chains_transactions() {
        let sender = RecordingSender::gated();
        let queues = registry(&sender);
        let b = dests(&["b.example"]);

        queues.fan_out(&pdu("E1"), &b).await;
        queues.fan_out(&pdu("E2"), &b).await;
        sender.started.notified().await;

        // First transaction is in flight; this one must wait for the next.
        queues.fan_out(&pdu("E3"), &b).await;
        sender.release(2);
        sender.wait_for(2).await;

        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].event_ids(), vec!["E1", "E2"]);
        assert!(sent[0].txn.previous_ids.is_empty());
        assert_eq!(sent[1].event_ids(), vec!["E3"]);
        assert_eq!(sent[1].txn.previous_ids, vec![sent[0].txn.transaction_id]);
        assert_eq!(sent[1].txn.transaction_id.counter, 2);
        assert_eq!(sent[1].txn.origin, ORIGIN);
        assert_eq!(sent[1].txn.destination, "b.example");
    }

    #[tokio::test]
    async fn never_queues_for_ourselves() {
        let sender = RecordingSender::open();
        let queues = registry(&sender);

        queues.fan_out(&pdu("E1"), &dests(&[ORIGIN, "b.example", "b.example"])).await;
        sender.wait_for(1).await;

        assert!(!queues.contains(ORIGIN).await);
        assert_eq!(queues.len().await, 1);
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].txn.destination, "b.example");
        assert_eq!(sent[0].event_ids(), vec!["E1"]);
    }

    #[tokio::test]
    async fn destinations_get_independent_chains() {
        let sender = RecordingSender::open();
        let queues = registry(&sender);

        queues.fan_out(&pdu("E1"), &dests(&["b.example", "c.example"])).await;
        sender.wait_for(2).await;
        queues.fan_out(&pdu("E2"), &dests(&["b.example", "c.example"])).await;
        sender.wait_for(4).await;

        for dest in ["b.example", "c.example"] {
            let txns = sender.sent_to(dest);
            assert_eq!(txns.len(), 2);
            assert!(txns[0].previous_ids.is_empty());
            assert_eq!(txns[1].previous_ids, vec![txns[0].transaction_id]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_transaction_in_flight_and_nothing_lost() {
        let sender = RecordingSender::slow(Duration::from_millis(2));
        let queues = registry(&sender);

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queues = queues.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        queues.fan_out(&pdu(&format!("P{p}-{i}")), &dests(&["b.example"])).await;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        sender.wait_for_events(100).await;

        assert_eq!(sender.max_in_flight.load(Ordering::SeqCst), 1);

        let txns = sender.sent_to("b.example");
        for pair in txns.windows(2) {
            assert_eq!(pair[1].previous_ids, vec![pair[0].transaction_id]);
            assert!(pair[0].transaction_id < pair[1].transaction_id);
        }

        let delivered: Vec<String> = txns
            .iter()
            .flat_map(|t| t.pdus.iter().map(|p| p.event_id().to_owned()))
            .collect();
        assert_eq!(delivered.len(), 100);
        for p in 0..4 {
            let prefix = format!("P{p}-");
            let mine: Vec<_> = delivered.iter().filter(|id| id.starts_with(&prefix)).collect();
            let expected: Vec<_> = (0..25).map(|i| format!("P{p}-{i}")).collect();
            assert_eq!(mine, expected.iter().collect::<Vec<_>>());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_resend_the_same_transaction() {
        let sender = RecordingSender::open();
        sender.fail_next(SendError::Retriable(FederationError::Timeout("b.example".into())));
        sender.fail_next(SendError::Retriable(FederationError::Timeout("b.example".into())));
        let queues = registry(&sender);

        queues.fan_out(&pdu("E1"), &dests(&["b.example"])).await;
        sender.wait_for(3).await;

        let attempts = sender.sent();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.txn.transaction_id == attempts[0].txn.transaction_id));
        assert!(queues.contains("b.example").await);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_degrade_the_destination() {
        let sender = RecordingSender::open();
        for _ in 0..3 {
            sender.fail_next(SendError::Retriable(FederationError::RemoteRejected {
                server: "b.example".into(),
                status: 503,
            }));
        }
        let queues = registry(&sender);
        let mut degraded = queues.subscribe_degraded();

        queues.fan_out(&pdu("E1"), &dests(&["b.example"])).await;
        let signal = degraded.recv().await.unwrap();
        assert_eq!(signal.destination, "b.example");
        assert_eq!(signal.dropped_events, 1);
        assert_eq!(sender.sent().len(), 3);
        assert!(!queues.contains("b.example").await);

        // A later event starts a fresh queue with a fresh chain.
        queues.fan_out(&pdu("E2"), &dests(&["b.example"])).await;
        sender.wait_for(4).await;
        let last = sender.sent().pop().unwrap();
        assert_eq!(last.event_ids(), vec!["E2"]);
        assert!(last.txn.previous_ids.is_empty());
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let sender = RecordingSender::open();
        sender.fail_next(SendError::Permanent(FederationError::RemoteRejected {
            server: "b.example".into(),
            status: 403,
        }));
        let queues = registry(&sender);
        let mut degraded = queues.subscribe_degraded();

        queues.fan_out(&pdu("E1"), &dests(&["b.example"])).await;
        let signal = degraded.recv().await.unwrap();
        assert!(signal.reason.contains("403"));
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_destination_times_out_and_retries() {
        let sender = RecordingSender::slow(Duration::from_secs(60));
        let queues = OutgoingQueues::new(
            ORIGIN,
            Arc::clone(&sender),
            RetryPolicy { max_retries: 1, ..policy() },
        );
        let mut degraded = queues.subscribe_degraded();

        queues.fan_out(&pdu("E1"), &dests(&["b.example"])).await;
        let signal = degraded.recv().await.unwrap();
        assert!(signal.reason.contains("timed out"));
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_queues_are_evicted_after_ttl() {
        let sender = RecordingSender::open();
        let queues = registry(&sender);

        queues.fan_out(&pdu("E1"), &dests(&["b.example"])).await;
        sender.wait_for(1).await;
        tokio::task::yield_now().await;

        assert_eq!(queues.evict_idle(Duration::from_secs(60)).await, 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(queues.evict_idle(Duration::from_secs(60)).await, 1);
        assert!(queues.is_empty().await);

        queues.fan_out(&pdu("E2"), &dests(&["b.example"])).await;
        sender.wait_for(2).await;
        assert!(sender.sent()[1].txn.previous_ids.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_replaces_a_queue_closed_under_it() {
        let sender = RecordingSender::open();
        let queues = registry(&sender);

        queues.fan_out(&pdu("E1"), &dests(&["b.example"])).await;
        sender.wait_for(1).await;
        tokio::task::yield_now().await;

        let stale = queues.queue_for("b.example").await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(queues.evict_idle(Duration::from_secs(60)).await, 1);

        let returned = stale.enqueue(pdu("E2")).await.unwrap_err();
        assert_eq!(returned.event_id(), "E2");

        // A producer that looked the queue up just before it was evicted.
        queues.inner.queues.lock().await.insert("b.example".to_owned(), Arc::clone(&stale));

        queues.fan_out(&pdu("E2"), &dests(&["b.example"])).await;
        sender.wait_for(2).await;
        tokio::task::yield_now().await;

        let fresh = queues.queue_for("b.example").await;
        assert!(!Arc::ptr_eq(&fresh, &stale));

        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].event_ids(), vec!["E2"]);
        assert!(sent[1].txn.previous_ids.is_empty());
    }
}
