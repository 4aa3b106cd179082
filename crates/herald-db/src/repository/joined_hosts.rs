//! Joined-host repository — which remote servers are in which room.

use herald_common::models::JoinedHost;
use sqlx::AnyConnection;

/// Record that `host.server_name` joined `room_id` through `host.event_id`.
pub async fn insert_joined_host(
    conn: &mut AnyConnection,
    room_id: &str,
    host: &JoinedHost,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO joined_hosts (room_id, event_id, server_name) VALUES ($1, $2, $3)")
        .bind(room_id)
        .bind(&host.event_id)
        .bind(&host.server_name)
        .execute(conn)
        .await?;
    Ok(())
}

/// Remove the joined hosts created by any of `event_ids`.
///
/// Event IDs are globally unique, so no room filter is needed.
pub async fn delete_joined_hosts(
    conn: &mut AnyConnection,
    event_ids: &[String],
) -> Result<u64, sqlx::Error> {
    let mut removed = 0;
    for event_id in event_ids {
        removed += sqlx::query("DELETE FROM joined_hosts WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(removed)
}

/// List the joined hosts of a room.
pub async fn select_joined_hosts(
    conn: &mut AnyConnection,
    room_id: &str,
) -> Result<Vec<JoinedHost>, sqlx::Error> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT event_id, server_name FROM joined_hosts
        WHERE room_id = $1
        ORDER BY event_id
        "#,
    )
    .bind(room_id)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(event_id, server_name)| JoinedHost { event_id, server_name })
        .collect())
}
