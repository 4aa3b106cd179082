//! # herald-federation
//!
//! Outbound Matrix federation for Herald.
//!
//! ## Architecture
//!
//! The room server hands Herald events together with the servers that should
//! see them. Herald keeps one queue per remote server and delivers each
//! queue's events as a chain of transactions, one request in flight at a time.
//!
//! ```text
//!  room server
//!       │ send_event / update_room
//!       ▼
//!  FederationSender ──► membership store (herald-db)
//!       │
//!       ▼
//!  OutgoingQueues ──► DestinationQueue(b.example) ──► PUT /send/{txnId} ──► b.example
//!                 └─► DestinationQueue(c.example) ──► PUT /send/{txnId} ──► c.example
//! ```
//!
//! ## Key concepts
//!
//! - **Queues** (`queue`): per-destination batching, chaining via
//!   `previous_ids`, bounded retries, idle eviction.
//! - **Transmitter** (`client.rs`): signed `reqwest` client implementing
//!   [`TransactionSender`].
//! - **Server keys** (`keys.rs`) and **signed requests** (`signatures.rs`):
//!   Ed25519 `X-Matrix` request authorization.
//! - **Service** (`service.rs`): the call surface used by the room server.

pub mod client;
pub mod error;
pub mod keys;
pub mod queue;
pub mod service;
pub mod signatures;
pub mod types;

pub use client::FederationClient;
pub use error::FederationError;
pub use keys::ServerKeyPair;
pub use queue::{
    retry::RetryPolicy,
    sender::{SendError, TransactionSender},
    DegradedDestination, OutgoingQueues,
};
pub use service::FederationSender;
pub use types::{Pdu, Transaction, TransactionId};
