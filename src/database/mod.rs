//! SQLite persistence layer.
//!
//! Embedded migrations are applied in filename order inside transactions,
//! tracked in a `_migrations` ledger; `schema_meta` carries the resulting
//! version. Per-entity query modules extend `Database` with `impl` blocks.

use crate::assets::MigrationAssets;
use crate::config::DatabaseConfig;
use anyhow::Result;
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite, SqlitePool};

pub mod control;
pub mod groups;
pub mod managed_channels;
pub mod match_cache;
pub mod runs;
pub mod settings;
pub mod team_league;
pub mod teams;
pub mod templates;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        if !Sqlite::database_exists(&config.url).await? {
            Sqlite::create_database(&config.url).await?;
        }

        let pool = SqlitePool::connect(&config.url).await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                success BOOLEAN NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (name, content) in MigrationAssets::get_migrations() {
            let version: i64 = name
                .split('_')
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("Migration {} has no numeric prefix", name))?;

            let applied = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM _migrations WHERE version = ? AND success = true",
            )
            .bind(version)
            .fetch_one(&self.pool)
            .await?;

            if applied > 0 {
                continue;
            }

            let start = std::time::Instant::now();
            let mut transaction = self.pool.begin().await?;

            // SQLite executes one statement per call; split on the
            // statement terminator with comment lines removed
            let mut failed = None;
            for fragment in content.split(';') {
                let statement = fragment
                    .lines()
                    .filter(|line| !line.trim_start().starts_with("--"))
                    .collect::<Vec<_>>()
                    .join("\n");
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                if let Err(e) = sqlx::query(statement).execute(&mut *transaction).await {
                    failed = Some(e);
                    break;
                }
            }

            match failed {
                None => {
                    sqlx::query(
                        "INSERT INTO _migrations (version, description, success) VALUES (?, ?, true)",
                    )
                    .bind(version)
                    .bind(&name)
                    .execute(&mut *transaction)
                    .await?;
                    transaction.commit().await?;
                    tracing::info!(
                        "Applied migration: {} ({}ms)",
                        name,
                        start.elapsed().as_millis()
                    );
                }
                Some(e) => {
                    transaction.rollback().await?;
                    return Err(anyhow::anyhow!("Migration {} failed: {}", name, e));
                }
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn schema_version(&self) -> Result<i64> {
        let version =
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(version), 0) FROM schema_meta")
                .fetch_one(&self.pool)
                .await?;
        Ok(version)
    }
}
