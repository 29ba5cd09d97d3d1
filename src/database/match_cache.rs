//! Persisted fingerprint → event match cache, aged by generation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::models::matching::MATCH_CACHE_MAX_AGE_GENERATIONS;
use crate::models::{MatchCacheEntry, StreamFingerprint};

use super::Database;

impl Database {
    pub async fn get_match_cache_entry(
        &self,
        fingerprint: &StreamFingerprint,
    ) -> Result<Option<MatchCacheEntry>> {
        let row = sqlx::query("SELECT * FROM match_cache WHERE fingerprint = ?")
            .bind(fingerprint.as_str())
            .fetch_optional(self.pool())
            .await?;

        row.map(|row| {
            Ok(MatchCacheEntry {
                fingerprint: StreamFingerprint::from_stored(row.try_get("fingerprint")?),
                event_id: row.try_get("event_id")?,
                league: row.try_get("league")?,
                last_seen_generation: row.try_get("last_seen_generation")?,
                created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            })
        })
        .transpose()
    }

    /// Record a match, or refresh an existing entry's generation.
    /// Writes for one fingerprint are serialized by the upsert.
    pub async fn upsert_match_cache_entry(&self, entry: &MatchCacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO match_cache
                (fingerprint, event_id, league, last_seen_generation, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (fingerprint) DO UPDATE SET
                event_id = excluded.event_id,
                league = excluded.league,
                last_seen_generation = excluded.last_seen_generation
            "#,
        )
        .bind(entry.fingerprint.as_str())
        .bind(&entry.event_id)
        .bind(&entry.league)
        .bind(entry.last_seen_generation)
        .bind(entry.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Mark a cached fingerprint as seen in the current generation.
    pub async fn touch_match_cache_entry(
        &self,
        fingerprint: &StreamFingerprint,
        generation: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE match_cache SET last_seen_generation = ? WHERE fingerprint = ?")
            .bind(generation)
            .bind(fingerprint.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Drop entries unseen for `MATCH_CACHE_MAX_AGE_GENERATIONS` generations.
    /// Returns the number purged.
    pub async fn purge_stale_match_cache(&self, current_generation: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM match_cache WHERE ? - last_seen_generation >= ?")
            .bind(current_generation)
            .bind(MATCH_CACHE_MAX_AGE_GENERATIONS)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(fingerprint: &StreamFingerprint, generation: i64) -> MatchCacheEntry {
        MatchCacheEntry {
            fingerprint: fingerprint.clone(),
            event_id: "401772821".to_string(),
            league: "nfl".to_string(),
            last_seen_generation: generation,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn purge_at_generation_distance_five() {
        let db = Database::new_in_memory().await.unwrap();
        let fp = StreamFingerprint::compute(&Uuid::new_v4(), "7", "Giants at Patriots");
        db.upsert_match_cache_entry(&entry(&fp, 10)).await.unwrap();

        // Distance 4: entry survives
        assert_eq!(db.purge_stale_match_cache(14).await.unwrap(), 0);
        assert!(db.get_match_cache_entry(&fp).await.unwrap().is_some());

        // Distance 5: entry is purged
        assert_eq!(db.purge_stale_match_cache(15).await.unwrap(), 1);
        assert!(db.get_match_cache_entry(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn touch_refreshes_generation() {
        let db = Database::new_in_memory().await.unwrap();
        let fp = StreamFingerprint::compute(&Uuid::new_v4(), "7", "Spurs v Arsenal");
        db.upsert_match_cache_entry(&entry(&fp, 10)).await.unwrap();
        db.touch_match_cache_entry(&fp, 15).await.unwrap();

        assert_eq!(db.purge_stale_match_cache(15).await.unwrap(), 0);
        let cached = db.get_match_cache_entry(&fp).await.unwrap().unwrap();
        assert_eq!(cached.last_seen_generation, 15);
    }
}
