//! Federation data types — events and transaction envelopes.
//!
//! These model the Matrix server-server wire format for `PUT /send/{txnId}`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::FederationError;

// ─── Events ──────────────────────────────────────────────────────────────────

/// A signed persistent event (PDU) produced by the room server.
///
/// The sender never looks inside beyond the `event_id`; the JSON is relayed
/// verbatim. Cloning is cheap so one event can sit in many destination queues.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct Pdu {
    event_id: String,
    json: Arc<Value>,
}

impl Pdu {
    /// Wrap an event's JSON. Fails if it has no string `event_id`.
    pub fn from_json(json: Value) -> Result<Self, FederationError> {
        let event_id = json
            .get("event_id")
            .and_then(Value::as_str)
            .ok_or_else(|| FederationError::MalformedEvent("missing string 'event_id'".into()))?
            .to_owned();
        Ok(Self { event_id, json: Arc::new(json) })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// The event's `room_id`, when present.
    pub fn room_id(&self) -> Option<&str> {
        self.json.get("room_id").and_then(Value::as_str)
    }
}

impl TryFrom<Value> for Pdu {
    type Error = FederationError;

    fn try_from(json: Value) -> Result<Self, Self::Error> {
        Self::from_json(json)
    }
}

impl Serialize for Pdu {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.json.serialize(serializer)
    }
}

// ─── Transaction IDs ─────────────────────────────────────────────────────────

/// Identifier of one transaction to one destination.
///
/// A `(timestamp, counter)` pair: the counter is the destination's running
/// count of events sent, so two transactions built in the same millisecond
/// still differ. Ordered by timestamp, then counter; rendered as `"{ts}-{counter}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId {
    pub origin_server_ts: i64,
    pub counter: u64,
}

impl TransactionId {
    pub fn new(origin_server_ts: i64, counter: u64) -> Self {
        Self { origin_server_ts, counter }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin_server_ts, self.counter)
    }
}

impl FromStr for TransactionId {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || FederationError::MalformedEvent(format!("bad transaction ID '{s}'"));
        let (ts, counter) = s.split_once('-').ok_or_else(bad)?;
        Ok(Self {
            origin_server_ts: ts.parse().map_err(|_| bad())?,
            counter: counter.parse().map_err(|_| bad())?,
        })
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ─── Transaction envelope ────────────────────────────────────────────────────

/// A federation transaction — the body of `PUT /send/{txnId}`.
///
/// `previous_ids` chains each transaction to the one sent before it to the
/// same destination, giving the remote a total order.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    /// Carried in the request path, not the body.
    #[serde(skip)]
    pub transaction_id: TransactionId,
    pub origin: String,
    pub destination: String,
    /// Unix millisecond timestamp on the origin server.
    pub origin_server_ts: i64,
    pub previous_ids: Vec<TransactionId>,
    pub pdus: Vec<Pdu>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pdu_requires_event_id() {
        let err = Pdu::from_json(json!({ "room_id": "!r:x" })).unwrap_err();
        assert!(matches!(err, FederationError::MalformedEvent(_)));

        let pdu: Pdu = serde_json::from_value(json!({ "event_id": "$e1", "room_id": "!r:x" })).unwrap();
        assert_eq!(pdu.event_id(), "$e1");
        assert_eq!(pdu.room_id(), Some("!r:x"));
    }

    #[test]
    fn transaction_ids_order_by_time_then_counter() {
        let a = TransactionId::new(1_000, 7);
        let b = TransactionId::new(1_000, 9);
        let c = TransactionId::new(1_001, 0);
        assert!(a < b && b < c);
        assert_eq!(a.to_string(), "1000-7");
        assert_eq!("1000-7".parse::<TransactionId>().unwrap(), a);
        assert!("1000".parse::<TransactionId>().is_err());
    }

    #[test]
    fn transaction_body_matches_wire_format() {
        let txn = Transaction {
            transaction_id: TransactionId::new(5, 2),
            origin: "a.example".into(),
            destination: "b.example".into(),
            origin_server_ts: 5,
            previous_ids: vec![TransactionId::new(4, 0)],
            pdus: vec![Pdu::from_json(json!({ "event_id": "$e1" })).unwrap()],
        };
        let body = serde_json::to_value(&txn).unwrap();
        assert_eq!(
            body,
            json!({
                "origin": "a.example",
                "destination": "b.example",
                "origin_server_ts": 5,
                "previous_ids": ["4-0"],
                "pdus": [{ "event_id": "$e1" }],
            })
        );
    }
}
