//! Team-channel and alias persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::TeamChannelConfig;

use super::Database;

/// One user-defined alias row: `(league, alias) → provider team id`.
#[derive(Debug, Clone)]
pub struct TeamAlias {
    pub id: Uuid,
    pub league: String,
    pub alias: String,
    pub provider_team_id: String,
}

impl Database {
    pub async fn list_enabled_team_channels(&self) -> Result<Vec<TeamChannelConfig>> {
        let rows = sqlx::query("SELECT * FROM team_channels WHERE enabled = 1 ORDER BY channel_id")
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| {
                Ok(TeamChannelConfig {
                    id: row.try_get::<String, _>("id")?.parse::<Uuid>()?,
                    provider: row.try_get("provider")?,
                    provider_team_id: row.try_get("provider_team_id")?,
                    league: row.try_get("league")?,
                    channel_id: row.try_get("channel_id")?,
                    display_name: row.try_get("display_name")?,
                    logo_url: row.try_get("logo_url")?,
                    template_id: row
                        .try_get::<Option<String>, _>("template_id")?
                        .map(|s| s.parse::<Uuid>())
                        .transpose()?,
                    enabled: row.try_get::<i64, _>("enabled")? != 0,
                    created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                    updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
                })
            })
            .collect()
    }

    pub async fn save_team_channel(&self, channel: &TeamChannelConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO team_channels
                (id, provider, provider_team_id, league, channel_id, display_name,
                 logo_url, template_id, enabled, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (id) DO UPDATE SET
                provider = excluded.provider,
                provider_team_id = excluded.provider_team_id,
                league = excluded.league,
                channel_id = excluded.channel_id,
                display_name = excluded.display_name,
                logo_url = excluded.logo_url,
                template_id = excluded.template_id,
                enabled = excluded.enabled,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(channel.id.to_string())
        .bind(&channel.provider)
        .bind(&channel.provider_team_id)
        .bind(&channel.league)
        .bind(&channel.channel_id)
        .bind(&channel.display_name)
        .bind(&channel.logo_url)
        .bind(channel.template_id.map(|id| id.to_string()))
        .bind(channel.enabled as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All aliases, keyed for the matcher: `(league, lowercased alias) → team id`.
    pub async fn load_alias_map(&self) -> Result<HashMap<(String, String), String>> {
        let rows = sqlx::query("SELECT league, alias, provider_team_id FROM team_aliases")
            .fetch_all(self.pool())
            .await?;

        let mut map = HashMap::new();
        for row in &rows {
            let league: String = row.try_get("league")?;
            let alias: String = row.try_get("alias")?;
            let team_id: String = row.try_get("provider_team_id")?;
            map.insert((league, alias.to_lowercase()), team_id);
        }
        Ok(map)
    }

    pub async fn save_team_alias(&self, alias: &TeamAlias) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO team_aliases (id, league, alias, provider_team_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (league, alias) DO UPDATE SET
                provider_team_id = excluded.provider_team_id
            "#,
        )
        .bind(alias.id.to_string())
        .bind(&alias.league)
        .bind(&alias.alias)
        .bind(&alias.provider_team_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn team_channel_round_trip() {
        let db = Database::new_in_memory().await.unwrap();
        let channel = TeamChannelConfig {
            id: Uuid::new_v4(),
            provider: "espn".to_string(),
            provider_team_id: "8".to_string(),
            league: "nba".to_string(),
            channel_id: "pistons.nba".to_string(),
            display_name: "Detroit Pistons".to_string(),
            logo_url: None,
            template_id: None,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db.save_team_channel(&channel).await.unwrap();

        let channels = db.list_enabled_team_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].channel_id, "pistons.nba");
    }

    #[tokio::test]
    async fn aliases_are_league_scoped() {
        let db = Database::new_in_memory().await.unwrap();
        for (league, team_id) in [("eng.1", "367"), ("nba", "24")] {
            db.save_team_alias(&TeamAlias {
                id: Uuid::new_v4(),
                league: league.to_string(),
                alias: "Spurs".to_string(),
                provider_team_id: team_id.to_string(),
            })
            .await
            .unwrap();
        }

        let map = db.load_alias_map().await.unwrap();
        assert_eq!(
            map.get(&("eng.1".to_string(), "spurs".to_string())),
            Some(&"367".to_string())
        );
        assert_eq!(
            map.get(&("nba".to_string(), "spurs".to_string())),
            Some(&"24".to_string())
        );
    }
}
