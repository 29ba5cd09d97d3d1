//! Run control: the monotonic generation counter and the cross-process
//! abort flag polled by the orchestrator.

use anyhow::Result;

use super::Database;

impl Database {
    /// Increment and return the generation counter. The first thing a run does.
    pub async fn next_generation(&self) -> Result<i64> {
        let generation = sqlx::query_scalar::<_, i64>(
            "UPDATE run_control SET generation = generation + 1 WHERE id = 1 RETURNING generation",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(generation)
    }

    pub async fn current_generation(&self) -> Result<i64> {
        let generation =
            sqlx::query_scalar::<_, i64>("SELECT generation FROM run_control WHERE id = 1")
                .fetch_one(self.pool())
                .await?;
        Ok(generation)
    }

    pub async fn request_abort(&self) -> Result<()> {
        sqlx::query("UPDATE run_control SET abort_requested = 1 WHERE id = 1")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn clear_abort(&self) -> Result<()> {
        sqlx::query("UPDATE run_control SET abort_requested = 0 WHERE id = 1")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn is_abort_requested(&self) -> Result<bool> {
        let flag =
            sqlx::query_scalar::<_, i64>("SELECT abort_requested FROM run_control WHERE id = 1")
                .fetch_one(self.pool())
                .await?;
        Ok(flag != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generation_is_monotonic() {
        let db = Database::new_in_memory().await.unwrap();
        assert_eq!(db.current_generation().await.unwrap(), 0);
        assert_eq!(db.next_generation().await.unwrap(), 1);
        assert_eq!(db.next_generation().await.unwrap(), 2);
        assert_eq!(db.current_generation().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn abort_flag_round_trip() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(!db.is_abort_requested().await.unwrap());
        db.request_abort().await.unwrap();
        assert!(db.is_abort_requested().await.unwrap());
        db.clear_abort().await.unwrap();
        assert!(!db.is_abort_requested().await.unwrap());
    }
}
