//! The queue of events for a single destination.
//!
//! A [`DestinationQueue`] batches whatever is pending into one transaction,
//! sends it, and repeats until nothing is pending. Exactly one send task runs
//! per queue, so at most one transaction is ever in flight to a destination
//! and the `previous_ids` chain is never forked.

use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, error, warn};

use super::{
    retry::RetryPolicy,
    sender::{SendError, TransactionSender},
    DegradedDestination, Shared,
};
use crate::{
    error::FederationError,
    types::{Pdu, Transaction, TransactionId},
};

pub(crate) struct DestinationQueue<S: TransactionSender> {
    origin: String,
    destination: String,
    sender: Arc<S>,
    policy: RetryPolicy,
    registry: Weak<Shared<S>>,
    state: Mutex<QueueState>,
}

struct QueueState {
    /// A send task is alive and will pick up anything pushed to `pending`.
    running: bool,
    /// The queue was evicted or gave up; it must not start another task.
    closed: bool,
    /// Events sent so far; varies the transaction ID.
    sent_counter: u64,
    last_transaction_ids: Vec<TransactionId>,
    pending: Vec<Pdu>,
    idle_since: Instant,
}

impl<S: TransactionSender> DestinationQueue<S> {
    pub(crate) fn new(
        origin: String,
        destination: String,
        sender: Arc<S>,
        policy: RetryPolicy,
        registry: Weak<Shared<S>>,
    ) -> Self {
        Self {
            origin,
            destination,
            sender,
            policy,
            registry,
            state: Mutex::new(QueueState {
                running: false,
                closed: false,
                sent_counter: 0,
                last_transaction_ids: Vec::new(),
                pending: Vec::new(),
                idle_since: Instant::now(),
            }),
        }
    }

    /// Add an event to the pending list, starting the send task if the queue
    /// is idle. Hands the event back if the queue has been closed.
    pub(crate) async fn enqueue(self: &Arc<Self>, pdu: Pdu) -> Result<(), Pdu> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(pdu);
        }
        state.pending.push(pdu);
        if !state.running {
            state.running = true;
            tokio::spawn(Arc::clone(self).run());
        }
        Ok(())
    }

    /// Close the queue if it has been idle for at least `ttl`.
    ///
    /// Never waits: a queue whose lock is busy is by definition not idle.
    pub(crate) fn close_if_idle(&self, ttl: Duration) -> bool {
        let Ok(mut state) = self.state.try_lock() else {
            return false;
        };
        if state.running || !state.pending.is_empty() || state.idle_since.elapsed() < ttl {
            return false;
        }
        state.closed = true;
        true
    }

    async fn run(self: Arc<Self>) {
        while let Some(txn) = self.next_transaction().await {
            if let Err(err) = self.send_with_retries(&txn).await {
                self.give_up(&txn, err).await;
                return;
            }
            self.state.lock().await.sent_counter += txn.pdus.len() as u64;
        }
    }

    /// Flush the pending list into the next transaction of the chain, or mark
    /// the queue idle if there is nothing to send.
    async fn next_transaction(&self) -> Option<Transaction> {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            state.running = false;
            state.idle_since = Instant::now();
            return None;
        }

        let now = Utc::now().timestamp_millis();
        let transaction_id = TransactionId::new(now, state.sent_counter);
        let previous_ids = std::mem::replace(&mut state.last_transaction_ids, vec![transaction_id]);

        Some(Transaction {
            transaction_id,
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            origin_server_ts: now,
            previous_ids,
            pdus: std::mem::take(&mut state.pending),
        })
    }

    async fn send_with_retries(&self, txn: &Transaction) -> Result<(), SendError> {
        let mut attempt = 0;
        loop {
            let result = match timeout(self.policy.request_timeout, self.sender.send_transaction(txn)).await {
                Ok(result) => result,
                Err(_) => Err(SendError::Retriable(FederationError::Timeout(self.destination.clone()))),
            };

            match result {
                Ok(()) => {
                    debug!(
                        destination = %self.destination,
                        txn_id = %txn.transaction_id,
                        pdus = txn.pdus.len(),
                        "Sent transaction"
                    );
                    return Ok(());
                }
                Err(err) if err.is_retriable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        destination = %self.destination,
                        txn_id = %txn.transaction_id,
                        attempt,
                        ?delay,
                        error = %err,
                        "Problem sending transaction, will retry"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Drop everything queued for this destination and leave the registry, so
    /// the next event for it starts over with a fresh queue.
    async fn give_up(&self, txn: &Transaction, err: SendError) {
        let discarded = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.running = false;
            std::mem::take(&mut state.pending).len()
        };
        let dropped_events = txn.pdus.len() + discarded;

        error!(
            destination = %self.destination,
            txn_id = %txn.transaction_id,
            dropped_events,
            error = %err,
            "Giving up on destination"
        );

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.destination, self).await;
            registry.notify_degraded(DegradedDestination {
                destination: self.destination.clone(),
                transaction_id: txn.transaction_id,
                dropped_events,
                reason: err.to_string(),
            });
        }
    }
}
