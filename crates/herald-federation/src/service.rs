//! The federation sender service — what the room server talks to.
//!
//! It joins the two halves of the sender: membership changes go to the
//! store, outbound events go to the destination queues.

use herald_common::models::JoinedHost;
use herald_db::{membership, Database};
use tracing::debug;

use crate::{
    error::FederationError,
    queue::{sender::TransactionSender, OutgoingQueues},
    types::Pdu,
};

/// Entry point for the room server.
pub struct FederationSender<S: TransactionSender> {
    db: Database,
    queues: OutgoingQueues<S>,
}

impl<S: TransactionSender> FederationSender<S> {
    pub fn new(db: Database, queues: OutgoingQueues<S>) -> Self {
        Self { db, queues }
    }

    /// The server name we send as.
    pub fn origin(&self) -> &str {
        self.queues.origin()
    }

    pub fn queues(&self) -> &OutgoingQueues<S> {
        &self.queues
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Queue `pdu` for delivery to `destinations`.
    ///
    /// `origin` must be our own server name; we never send on behalf of others.
    pub async fn send_event(
        &self,
        pdu: Pdu,
        origin: &str,
        destinations: &[String],
    ) -> Result<(), FederationError> {
        self.check_origin(origin)?;
        self.queues.fan_out(&pdu, destinations).await;
        Ok(())
    }

    /// Queue `pdu` for every server currently joined to `room_id`.
    ///
    /// Returns the destinations the event was handed to, ourselves excluded.
    pub async fn send_event_to_room(
        &self,
        pdu: Pdu,
        origin: &str,
        room_id: &str,
    ) -> Result<Vec<String>, FederationError> {
        self.check_origin(origin)?;

        let mut destinations: Vec<String> = membership::joined_hosts(&self.db, room_id)
            .await?
            .into_iter()
            .map(|host| host.server_name)
            .filter(|name| name != self.origin())
            .collect();
        destinations.sort();
        destinations.dedup();
        debug!(room_id, event_id = pdu.event_id(), ?destinations, "Resolved room destinations");

        self.queues.fan_out(&pdu, &destinations).await;
        Ok(destinations)
    }

    /// Apply a membership delta from the room server.
    ///
    /// See [`membership::update_room`]; returns the joined hosts as they were
    /// before the delta.
    pub async fn update_room(
        &self,
        room_id: &str,
        old_last_sent_event_id: &str,
        new_last_sent_event_id: &str,
        add_hosts: &[JoinedHost],
        remove_hosts: &[String],
    ) -> Result<Vec<JoinedHost>, FederationError> {
        Ok(membership::update_room(
            &self.db,
            room_id,
            old_last_sent_event_id,
            new_last_sent_event_id,
            add_hosts,
            remove_hosts,
        )
        .await?)
    }

    pub async fn joined_hosts(&self, room_id: &str) -> Result<Vec<JoinedHost>, FederationError> {
        Ok(membership::joined_hosts(&self.db, room_id).await?)
    }

    fn check_origin(&self, origin: &str) -> Result<(), FederationError> {
        if origin != self.origin() {
            return Err(FederationError::IdentityMismatch {
                got: origin.to_owned(),
                expected: self.origin().to_owned(),
            });
        }
        Ok(())
    }
}
