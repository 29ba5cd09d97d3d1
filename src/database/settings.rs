//! Settings singleton persistence. The row stores the whole `Settings`
//! struct as JSON so new options never need a migration.

use anyhow::Result;

use crate::models::Settings;

use super::Database;

impl Database {
    /// Load the settings singleton, seeding defaults on first access.
    pub async fn get_settings(&self) -> Result<Settings> {
        let row = sqlx::query_scalar::<_, String>("SELECT data FROM settings WHERE id = 1")
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => {
                let settings = Settings::default();
                self.update_settings(&settings).await?;
                Ok(settings)
            }
        }
    }

    pub async fn update_settings(&self, settings: &Settings) -> Result<()> {
        let data = serde_json::to_string(settings)?;
        sqlx::query(
            r#"
            INSERT INTO settings (id, data, updated_at) VALUES (1, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (id) DO UPDATE SET data = excluded.data, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(data)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
