//! Managed downstream-channel persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::models::ManagedChannel;

use super::Database;

fn channel_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ManagedChannel> {
    Ok(ManagedChannel {
        id: row.try_get::<String, _>("id")?.parse::<Uuid>()?,
        group_id: row.try_get::<String, _>("group_id")?.parse::<Uuid>()?,
        manager_channel_id: row.try_get("manager_channel_id")?,
        channel_id: row.try_get("channel_id")?,
        event_id: row.try_get("event_id")?,
        league: row.try_get("league")?,
        home_team_name: row.try_get("home_team_name")?,
        away_team_name: row.try_get("away_team_name")?,
        scheduled_delete_at: row.try_get::<Option<DateTime<Utc>>, _>("scheduled_delete_at")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

impl Database {
    pub async fn list_managed_channels(&self) -> Result<Vec<ManagedChannel>> {
        let rows = sqlx::query("SELECT * FROM managed_channels ORDER BY channel_id")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(channel_from_row).collect()
    }

    pub async fn upsert_managed_channel(&self, channel: &ManagedChannel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO managed_channels
                (id, group_id, manager_channel_id, channel_id, event_id, league,
                 home_team_name, away_team_name, scheduled_delete_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (group_id, channel_id) DO UPDATE SET
                manager_channel_id = excluded.manager_channel_id,
                event_id = excluded.event_id,
                league = excluded.league,
                home_team_name = excluded.home_team_name,
                away_team_name = excluded.away_team_name,
                scheduled_delete_at = excluded.scheduled_delete_at,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(channel.id.to_string())
        .bind(channel.group_id.to_string())
        .bind(channel.manager_channel_id)
        .bind(&channel.channel_id)
        .bind(&channel.event_id)
        .bind(&channel.league)
        .bind(&channel.home_team_name)
        .bind(&channel.away_team_name)
        .bind(channel.scheduled_delete_at)
        .bind(channel.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_managed_channel(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM managed_channels WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
