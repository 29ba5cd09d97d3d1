//! Run-history persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::models::{RunCounters, RunRecord, RunStatus};

use super::Database;

impl Database {
    /// Write a completed run record and its issues in one transaction.
    pub async fn insert_run_record(&self, record: &RunRecord) -> Result<i64> {
        let status = match record.status {
            RunStatus::Success => "success",
            RunStatus::Aborted => "aborted",
            RunStatus::Failed => "failed",
        };

        let mut tx = self.pool().begin().await?;

        let run_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO runs
                (generation, status, started_at, finished_at, programmes_emitted,
                 events_processed, streams_matched, streams_unmatched,
                 channels_created, channels_deleted, unresolved_variables)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(record.generation)
        .bind(status)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.counters.programmes_emitted)
        .bind(record.counters.events_processed)
        .bind(record.counters.streams_matched)
        .bind(record.counters.streams_unmatched)
        .bind(record.counters.channels_created)
        .bind(record.counters.channels_deleted)
        .bind(record.counters.unresolved_variables)
        .fetch_one(&mut *tx)
        .await?;

        for issue in &record.issues {
            sqlx::query("INSERT INTO run_issues (run_id, message) VALUES (?, ?)")
                .bind(run_id)
                .bind(issue)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(run_id)
    }

    pub async fn latest_run_record(&self) -> Result<Option<RunRecord>> {
        let row = sqlx::query("SELECT * FROM runs ORDER BY id DESC LIMIT 1")
            .fetch_optional(self.pool())
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let run_id: i64 = row.try_get("id")?;
        let status = match row.try_get::<String, _>("status")?.as_str() {
            "aborted" => RunStatus::Aborted,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Success,
        };

        let issues = sqlx::query("SELECT message FROM run_issues WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(|r| r.try_get::<String, _>("message"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RunRecord {
            generation: row.try_get("generation")?,
            status,
            started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
            finished_at: row.try_get::<DateTime<Utc>, _>("finished_at")?,
            counters: RunCounters {
                programmes_emitted: row.try_get("programmes_emitted")?,
                events_processed: row.try_get("events_processed")?,
                streams_matched: row.try_get("streams_matched")?,
                streams_unmatched: row.try_get("streams_unmatched")?,
                channels_created: row.try_get("channels_created")?,
                channels_deleted: row.try_get("channels_deleted")?,
                unresolved_variables: row.try_get("unresolved_variables")?,
            },
            issues,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_record_round_trip_with_issues() {
        let db = Database::new_in_memory().await.unwrap();
        let record = RunRecord {
            generation: 7,
            status: RunStatus::Success,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            counters: RunCounters {
                programmes_emitted: 120,
                events_processed: 30,
                streams_matched: 25,
                streams_unmatched: 5,
                channels_created: 3,
                channels_deleted: 1,
                unresolved_variables: 2,
            },
            issues: vec![
                "stream 'UFC FN Prelims' unmatched: no_event_found".to_string(),
                "unresolved variable {odds_spread} in template nfl".to_string(),
            ],
        };
        db.insert_run_record(&record).await.unwrap();

        let loaded = db.latest_run_record().await.unwrap().unwrap();
        assert_eq!(loaded.generation, 7);
        assert_eq!(loaded.counters.streams_matched, 25);
        assert_eq!(loaded.issues.len(), 2);
    }
}
