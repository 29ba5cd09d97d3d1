//! Event-group and exception-keyword persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::models::{DuplicateMode, EventGroup, ExceptionKeyword};

use super::Database;

fn group_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<EventGroup> {
    let duplicate_mode = match row.try_get::<String, _>("duplicate_mode")?.as_str() {
        "separate" => DuplicateMode::Separate,
        "ignore" => DuplicateMode::Ignore,
        _ => DuplicateMode::Consolidate,
    };
    Ok(EventGroup {
        id: row.try_get::<String, _>("id")?.parse::<Uuid>()?,
        name: row.try_get("name")?,
        m3u_group: row.try_get("m3u_group")?,
        league_selectors: serde_json::from_str(row.try_get("league_selectors")?)?,
        include_regex: row.try_get("include_regex")?,
        exclude_regex: row.try_get("exclude_regex")?,
        duplicate_mode,
        include_final: row.try_get::<i64, _>("include_final")? != 0,
        template_id: row
            .try_get::<Option<String>, _>("template_id")?
            .map(|s| s.parse::<Uuid>())
            .transpose()?,
        channel_group: row.try_get("channel_group")?,
        channel_start_number: row.try_get("channel_start_number")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

impl Database {
    pub async fn list_enabled_event_groups(&self) -> Result<Vec<EventGroup>> {
        let rows = sqlx::query("SELECT * FROM event_groups WHERE enabled = 1 ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(group_from_row).collect()
    }

    pub async fn save_event_group(&self, group: &EventGroup) -> Result<()> {
        let mode = match group.duplicate_mode {
            DuplicateMode::Consolidate => "consolidate",
            DuplicateMode::Separate => "separate",
            DuplicateMode::Ignore => "ignore",
        };
        sqlx::query(
            r#"
            INSERT INTO event_groups
                (id, name, m3u_group, league_selectors, include_regex, exclude_regex,
                 duplicate_mode, include_final, template_id, channel_group,
                 channel_start_number, enabled, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                m3u_group = excluded.m3u_group,
                league_selectors = excluded.league_selectors,
                include_regex = excluded.include_regex,
                exclude_regex = excluded.exclude_regex,
                duplicate_mode = excluded.duplicate_mode,
                include_final = excluded.include_final,
                template_id = excluded.template_id,
                channel_group = excluded.channel_group,
                channel_start_number = excluded.channel_start_number,
                enabled = excluded.enabled,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(group.id.to_string())
        .bind(&group.name)
        .bind(&group.m3u_group)
        .bind(serde_json::to_string(&group.league_selectors)?)
        .bind(&group.include_regex)
        .bind(&group.exclude_regex)
        .bind(mode)
        .bind(group.include_final as i64)
        .bind(group.template_id.map(|id| id.to_string()))
        .bind(&group.channel_group)
        .bind(group.channel_start_number)
        .bind(group.enabled as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_exception_keywords(&self, group_id: Uuid) -> Result<Vec<ExceptionKeyword>> {
        let rows = sqlx::query("SELECT * FROM exception_keywords WHERE group_id = ? ORDER BY keyword")
            .bind(group_id.to_string())
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ExceptionKeyword {
                    id: row.try_get::<String, _>("id")?.parse::<Uuid>()?,
                    group_id: row.try_get::<String, _>("group_id")?.parse::<Uuid>()?,
                    keyword: row.try_get("keyword")?,
                    separate: row.try_get::<i64, _>("separate")? != 0,
                })
            })
            .collect()
    }

    pub async fn save_exception_keyword(&self, keyword: &ExceptionKeyword) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exception_keywords (id, group_id, keyword, separate)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                keyword = excluded.keyword,
                separate = excluded.separate
            "#,
        )
        .bind(keyword.id.to_string())
        .bind(keyword.group_id.to_string())
        .bind(&keyword.keyword)
        .bind(keyword.separate as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_group() -> EventGroup {
        EventGroup {
            id: Uuid::new_v4(),
            name: "NFL Sunday".to_string(),
            m3u_group: "US Sports | NFL".to_string(),
            league_selectors: vec!["nfl".to_string()],
            include_regex: None,
            exclude_regex: Some(r"(?i)replay".to_string()),
            duplicate_mode: DuplicateMode::Consolidate,
            include_final: false,
            template_id: None,
            channel_group: Some("Sports Events".to_string()),
            channel_start_number: Some(9000),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn group_round_trip() {
        let db = Database::new_in_memory().await.unwrap();
        let group = sample_group();
        db.save_event_group(&group).await.unwrap();

        let groups = db.list_enabled_event_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "NFL Sunday");
        assert_eq!(groups[0].league_selectors, vec!["nfl"]);
        assert_eq!(groups[0].exclude_regex.as_deref(), Some(r"(?i)replay"));
    }

    #[tokio::test]
    async fn disabled_groups_are_hidden() {
        let db = Database::new_in_memory().await.unwrap();
        let mut group = sample_group();
        group.enabled = false;
        db.save_event_group(&group).await.unwrap();
        assert!(db.list_enabled_event_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exception_keywords_scoped_to_group() {
        let db = Database::new_in_memory().await.unwrap();
        let group = sample_group();
        db.save_event_group(&group).await.unwrap();
        db.save_exception_keyword(&ExceptionKeyword {
            id: Uuid::new_v4(),
            group_id: group.id,
            keyword: "multicam".to_string(),
            separate: true,
        })
        .await
        .unwrap();

        let keywords = db.list_exception_keywords(group.id).await.unwrap();
        assert_eq!(keywords.len(), 1);
        assert_eq!(keywords[0].keyword, "multicam");
        assert!(db
            .list_exception_keywords(Uuid::new_v4())
            .await
            .unwrap()
            .is_empty());
    }
}
