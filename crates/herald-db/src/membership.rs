//! Room membership store.
//!
//! [`update_room`] is the only write path for the `room` and `joined_hosts`
//! tables. It applies a membership delta from the room server in a single
//! transaction, guarded by the room's `last_sent_event_id`.

use herald_common::models::JoinedHost;
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    repository::{joined_hosts, rooms},
    Database,
};

/// Apply a membership delta to a room.
///
/// `old_last_sent_event_id` must match what is stored (an empty string for a
/// room we have never seen), otherwise [`StoreError::LastSentIdMismatch`] is
/// returned and nothing changes. On success the room's joined hosts as they
/// were *before* the delta are returned.
pub async fn update_room(
    db: &Database,
    room_id: &str,
    old_last_sent_event_id: &str,
    new_last_sent_event_id: &str,
    add_hosts: &[JoinedHost],
    remove_hosts: &[String],
) -> Result<Vec<JoinedHost>, StoreError> {
    let mut txn = db.pool.begin().await?;

    rooms::insert_room(&mut txn, room_id).await?;
    let last_sent_event_id = rooms::select_room_for_update(&mut txn, db.backend, room_id).await?;
    if last_sent_event_id != old_last_sent_event_id {
        txn.rollback().await?;
        warn!(
            room_id,
            database_id = %last_sent_event_id,
            room_server_id = %old_last_sent_event_id,
            "Room state desynchronised from room server"
        );
        return Err(StoreError::LastSentIdMismatch {
            database_id: last_sent_event_id,
            room_server_id: old_last_sent_event_id.to_owned(),
        });
    }

    let joined = joined_hosts::select_joined_hosts(&mut txn, room_id).await?;
    for host in add_hosts {
        joined_hosts::insert_joined_host(&mut txn, room_id, host).await?;
    }
    joined_hosts::delete_joined_hosts(&mut txn, remove_hosts).await?;
    rooms::update_room(&mut txn, room_id, new_last_sent_event_id).await?;

    txn.commit().await?;
    debug!(
        room_id,
        last_sent_event_id = new_last_sent_event_id,
        added = add_hosts.len(),
        removed = remove_hosts.len(),
        "Applied membership delta"
    );
    Ok(joined)
}

/// Current joined hosts of a room (empty for an unknown room).
pub async fn joined_hosts(db: &Database, room_id: &str) -> Result<Vec<JoinedHost>, StoreError> {
    let mut conn = db.pool.acquire().await?;
    Ok(joined_hosts::select_joined_hosts(&mut conn, room_id).await?)
}

/// The stored `last_sent_event_id` of a room, `None` if we have never seen it.
pub async fn last_sent_event_id(db: &Database, room_id: &str) -> Result<Option<String>, StoreError> {
    let mut conn = db.pool.acquire().await?;
    Ok(rooms::select_last_sent_event_id(&mut conn, room_id).await?)
}
