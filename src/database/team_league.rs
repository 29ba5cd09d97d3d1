//! Snapshot persistence for the team/league reverse index.

use anyhow::Result;
use sqlx::Row;

use crate::models::Team;

use super::Database;

impl Database {
    /// Replace the whole snapshot atomically.
    pub async fn save_team_league_snapshot(&self, teams: &[Team]) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM team_league_cache")
            .execute(&mut *tx)
            .await?;

        for team in teams {
            sqlx::query(
                r#"
                INSERT INTO team_league_cache (provider, league, provider_team_id, team)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (provider, league, provider_team_id) DO UPDATE SET
                    team = excluded.team,
                    refreshed_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&team.provider)
            .bind(&team.league)
            .bind(&team.provider_team_id)
            .bind(serde_json::to_string(team)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_team_league_snapshot(&self) -> Result<Vec<Team>> {
        let rows = sqlx::query("SELECT team FROM team_league_cache")
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| Ok(serde_json::from_str(row.try_get("team")?)?))
            .collect()
    }

    /// When the persisted snapshot was last rebuilt.
    pub async fn team_league_snapshot_refreshed_at(
        &self,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        let refreshed = sqlx::query_scalar::<_, Option<chrono::DateTime<chrono::Utc>>>(
            "SELECT MAX(refreshed_at) FROM team_league_cache",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(refreshed)
    }

    pub async fn league_provider_overrides(
        &self,
    ) -> Result<std::collections::HashMap<String, String>> {
        let rows = sqlx::query("SELECT league, provider FROM league_providers")
            .fetch_all(self.pool())
            .await?;

        let mut map = std::collections::HashMap::new();
        for row in &rows {
            map.insert(row.try_get("league")?, row.try_get("provider")?);
        }
        Ok(map)
    }
}
