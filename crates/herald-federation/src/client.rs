//! Server-to-server HTTP transmitter.
//!
//! [`FederationClient`] is the production [`TransactionSender`]: it signs each
//! transaction with this server's key and `PUT`s it to the destination.
//!
//! # Usage
//!
//! ```rust,no_run
//! use herald_federation::{client::FederationClient, keys::ServerKeyPair};
//! use std::{sync::Arc, time::Duration};
//!
//! let kp = Arc::new(ServerKeyPair::generate());
//! let client = FederationClient::new("herald.example.com", kp, 8448, Duration::from_secs(30)).unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::{
    error::FederationError,
    keys::ServerKeyPair,
    queue::sender::{SendError, TransactionSender},
    signatures::sign_request,
    types::Transaction,
};

// ─── Client ──────────────────────────────────────────────────────────────────

/// Async HTTP client for outbound federation transactions.
///
/// Internally uses `reqwest` with a connection pool and request signing.
pub struct FederationClient {
    server_name: String,
    key_pair: Arc<ServerKeyPair>,
    federation_port: u16,
    http: Client,
}

impl FederationClient {
    /// Create a new federation client sending as `server_name`.
    pub fn new(
        server_name: impl Into<String>,
        key_pair: Arc<ServerKeyPair>,
        federation_port: u16,
        request_timeout: Duration,
    ) -> Result<Self, FederationError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("Herald-Federation/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FederationError::Other(anyhow::anyhow!("failed to build HTTP client: {e}")))?;

        Ok(Self { server_name: server_name.into(), key_pair, federation_port, http })
    }

    /// `https://name` when the name carries a port, else the default federation port.
    fn base_url(&self, destination: &str) -> String {
        if has_explicit_port(destination) {
            format!("https://{destination}")
        } else {
            format!("https://{}:{}", destination, self.federation_port)
        }
    }

    /// `PUT /_matrix/federation/v1/send/{txnId}`
    async fn put_transaction(&self, txn: &Transaction) -> Result<StatusCode, SendError> {
        let uri = format!("/_matrix/federation/v1/send/{}", txn.transaction_id);
        let url = Url::parse(&self.base_url(&txn.destination))
            .and_then(|base| base.join(&uri))
            .map_err(|e| SendError::Permanent(e.into()))?;
        let body = serde_json::to_value(txn).map_err(|e| SendError::Permanent(e.into()))?;

        let auth = sign_request(
            &self.key_pair,
            &self.server_name,
            &txn.destination,
            "PUT",
            &uri,
            Some(&body),
        );
        debug!(destination = %txn.destination, %url, "Federation PUT");

        let resp = self
            .http
            .put(url)
            .header("Authorization", auth.to_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = if e.is_timeout() {
                    FederationError::Timeout(txn.destination.clone())
                } else {
                    FederationError::RemoteHttp(txn.destination.clone(), e.to_string())
                };
                if e.is_builder() { SendError::Permanent(err) } else { SendError::Retriable(err) }
            })?;
        Ok(resp.status())
    }
}

impl TransactionSender for FederationClient {
    async fn send_transaction(&self, txn: &Transaction) -> Result<(), SendError> {
        let status = self.put_transaction(txn).await?;
        classify(&txn.destination, status)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Map a response status onto the queue's retry decision.
///
/// Timeouts, rate limiting and server errors are worth retrying; any other
/// refusal will be refused again.
fn classify(destination: &str, status: StatusCode) -> Result<(), SendError> {
    if status.is_success() {
        return Ok(());
    }
    let err = FederationError::RemoteRejected {
        server: destination.to_owned(),
        status: status.as_u16(),
    };
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Err(SendError::Retriable(err))
    } else {
        Err(SendError::Permanent(err))
    }
}

fn has_explicit_port(server_name: &str) -> bool {
    // IPv6 literal with port: [::1]:8448
    if server_name.starts_with('[') {
        return server_name.contains("]:");
    }
    // hostname:port — but ignore IPv6 with extra colons.
    server_name.chars().filter(|&c| c == ':').count() == 1
}
