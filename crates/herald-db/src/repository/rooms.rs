//! Room repository — the last event this server reflected for each room.

use sqlx::AnyConnection;

use crate::Backend;

/// Create the room row with an empty `last_sent_event_id` if it is missing.
pub async fn insert_room(conn: &mut AnyConnection, room_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO room (room_id, last_sent_event_id) VALUES ($1, '') ON CONFLICT DO NOTHING",
    )
    .bind(room_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Read `last_sent_event_id` and lock the row until the transaction ends.
///
/// SQLite has no row locks; a transaction that already wrote holds the
/// database-wide write lock, which serializes updates just the same.
pub async fn select_room_for_update(
    conn: &mut AnyConnection,
    backend: Backend,
    room_id: &str,
) -> Result<String, sqlx::Error> {
    let sql = match backend {
        Backend::Postgres => "SELECT last_sent_event_id FROM room WHERE room_id = $1 FOR UPDATE",
        Backend::Sqlite => "SELECT last_sent_event_id FROM room WHERE room_id = $1",
    };
    let (last_sent_event_id,): (String,) =
        sqlx::query_as(sql).bind(room_id).fetch_one(conn).await?;
    Ok(last_sent_event_id)
}

/// Read `last_sent_event_id` without locking. `None` for an unknown room.
pub async fn select_last_sent_event_id(
    conn: &mut AnyConnection,
    room_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT last_sent_event_id FROM room WHERE room_id = $1")
            .bind(room_id)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(|(id,)| id))
}

/// Overwrite `last_sent_event_id` for a room.
pub async fn update_room(
    conn: &mut AnyConnection,
    room_id: &str,
    last_sent_event_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE room SET last_sent_event_id = $1 WHERE room_id = $2")
        .bind(last_sent_event_id)
        .bind(room_id)
        .execute(conn)
        .await?;
    Ok(())
}
