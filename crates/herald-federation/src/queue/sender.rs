//! The transmission contract between a destination queue and the wire.

use std::future::Future;

use thiserror::Error;

use crate::{error::FederationError, types::Transaction};

/// Delivers one transaction to its destination.
///
/// Implementations own serialisation, signing and HTTP; the queue only
/// consumes the typed outcome to decide between retrying and giving up.
pub trait TransactionSender: Send + Sync + 'static {
    fn send_transaction(
        &self,
        txn: &Transaction,
    ) -> impl Future<Output = Result<(), SendError>> + Send;
}

/// Why a transaction was not delivered.
#[derive(Debug, Error)]
pub enum SendError {
    /// Worth sending the same transaction again after a pause.
    #[error("retriable: {0}")]
    Retriable(#[source] FederationError),
    /// Resending will not help; the destination is given up on.
    #[error("permanent: {0}")]
    Permanent(#[source] FederationError),
}

impl SendError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, SendError::Retriable(_))
    }
}
