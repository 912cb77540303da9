//! Single-row watch state table

use crate::models::WatchState;
use chrono::{DateTime, Utc};
use hdm_common::{Error, Result};
use sqlx::{Pool, Row, Sqlite};

pub async fn load(db: &Pool<Sqlite>) -> Result<Option<WatchState>> {
    let row = sqlx::query(
        "SELECT channel_id, resource_id, expiration, resume_token FROM watch_state WHERE id = 1",
    )
    .fetch_optional(db)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let expiration: String = row.get("expiration");
    let expiration = DateTime::parse_from_rfc3339(&expiration)
        .map_err(|e| Error::InvalidState(format!("watch expiration: {}", e)))?
        .with_timezone(&Utc);

    Ok(Some(WatchState {
        channel_id: row.get("channel_id"),
        resource_id: row.get("resource_id"),
        expiration,
        resume_token: row.get("resume_token"),
    }))
}

pub async fn save(db: &Pool<Sqlite>, state: &WatchState) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO watch_state (id, channel_id, resource_id, expiration, resume_token, updated_at)
        VALUES (1, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            channel_id = excluded.channel_id,
            resource_id = excluded.resource_id,
            expiration = excluded.expiration,
            resume_token = excluded.resume_token,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&state.channel_id)
    .bind(&state.resource_id)
    .bind(state.expiration.to_rfc3339())
    .bind(&state.resume_token)
    .bind(Utc::now().to_rfc3339())
    .execute(db)
    .await?;
    Ok(())
}

pub async fn clear(db: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("DELETE FROM watch_state WHERE id = 1")
        .execute(db)
        .await?;
    Ok(())
}
