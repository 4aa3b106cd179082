//! A scriptable [`TransactionSender`] for queue and service tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Notify, Semaphore};

use super::sender::{SendError, TransactionSender};
use crate::types::{Pdu, Transaction};

pub(crate) fn pdu(event_id: &str) -> Pdu {
    Pdu::from_json(json!({ "event_id": event_id, "room_id": "!r:x", "type": "m.room.message" }))
        .expect("test event has an event_id")
}

/// One call to `send_transaction`.
#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub txn: Transaction,
}

impl Attempt {
    pub fn event_ids(&self) -> Vec<&str> {
        self.txn.pdus.iter().map(Pdu::event_id).collect()
    }
}

pub(crate) struct RecordingSender {
    attempts: Mutex<Vec<Attempt>>,
    failures: Mutex<VecDeque<SendError>>,
    gate: Option<Semaphore>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Notified each time a send starts.
    pub started: Notify,
}

impl RecordingSender {
    fn build(gate: Option<Semaphore>, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            gate,
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: Notify::new(),
        })
    }

    /// Every send succeeds immediately.
    pub fn open() -> Arc<Self> {
        Self::build(None, None)
    }

    /// Every send blocks until [`release`](Self::release) lets it through.
    pub fn gated() -> Arc<Self> {
        Self::build(Some(Semaphore::new(0)), None)
    }

    /// Every send takes `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(None, Some(delay))
    }

    pub fn release(&self, sends: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(sends);
        }
    }

    /// Script the outcome of the next send that would otherwise succeed.
    pub fn fail_next(&self, err: SendError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn sent(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn sent_to(&self, destination: &str) -> Vec<Transaction> {
        self.sent()
            .into_iter()
            .map(|a| a.txn)
            .filter(|t| t.destination == destination)
            .collect()
    }

    /// Wait until at least `n` sends have started.
    pub async fn wait_for(&self, n: usize) {
        self.wait_until(|attempts| attempts.len() >= n).await;
    }

    /// Wait until sends carrying at least `n` events have started.
    pub async fn wait_for_events(&self, n: usize) {
        self.wait_until(|attempts| attempts.iter().map(|a| a.txn.pdus.len()).sum::<usize>() >= n)
            .await;
    }

    async fn wait_until(&self, done: impl Fn(&[Attempt]) -> bool) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while !done(&self.attempts.lock().unwrap()) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("sender never saw the expected transactions");
    }
}

/// Keeps `in_flight` honest even when the send future is dropped by a timeout.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TransactionSender for RecordingSender {
    async fn send_transaction(&self, txn: &Transaction) -> Result<(), SendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.attempts.lock().unwrap().push(Attempt { txn: txn.clone() });
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate never closes").forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
