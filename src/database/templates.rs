//! Template and condition-rule persistence.

use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use crate::models::{Condition, ConditionRule, FillerConfig, TemplateConfig};

use super::Database;

fn template_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TemplateConfig> {
    let filler: FillerConfig = serde_json::from_str(row.try_get("filler")?)?;
    let categories: Vec<String> = serde_json::from_str(row.try_get("categories")?)?;
    Ok(TemplateConfig {
        id: row.try_get::<String, _>("id")?.parse::<Uuid>()?,
        name: row.try_get("name")?,
        title_template: row.try_get("title_template")?,
        subtitle_template: row.try_get("subtitle_template")?,
        description_rules: Vec::new(),
        filler,
        categories,
        channel_name_template: row.try_get("channel_name_template")?,
        duration_hours: row.try_get("duration_hours")?,
    })
}

fn rule_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ConditionRule> {
    let kind: Option<String> = row.try_get("condition_kind")?;
    let value: Option<String> = row.try_get("condition_value")?;
    let condition = kind.and_then(|k| Condition::parse(&k, value.as_deref()));
    Ok(ConditionRule {
        id: row.try_get::<String, _>("id")?.parse::<Uuid>()?,
        condition,
        priority: row.try_get("priority")?,
        template: row.try_get("template")?,
    })
}

impl Database {
    pub async fn get_template(&self, id: Uuid) -> Result<Option<TemplateConfig>> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut template = template_from_row(&row)?;
        template.description_rules = self.get_condition_rules(id).await?;
        Ok(Some(template))
    }

    async fn get_condition_rules(&self, template_id: Uuid) -> Result<Vec<ConditionRule>> {
        let rows = sqlx::query(
            "SELECT * FROM condition_rules WHERE template_id = ? ORDER BY priority, id",
        )
        .bind(template_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    /// Insert or replace a template together with its rules, atomically.
    pub async fn save_template(&self, template: &TemplateConfig) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO templates
                (id, name, title_template, subtitle_template, filler, categories,
                 channel_name_template, duration_hours, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                title_template = excluded.title_template,
                subtitle_template = excluded.subtitle_template,
                filler = excluded.filler,
                categories = excluded.categories,
                channel_name_template = excluded.channel_name_template,
                duration_hours = excluded.duration_hours,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(template.id.to_string())
        .bind(&template.name)
        .bind(&template.title_template)
        .bind(&template.subtitle_template)
        .bind(serde_json::to_string(&template.filler)?)
        .bind(serde_json::to_string(&template.categories)?)
        .bind(&template.channel_name_template)
        .bind(template.duration_hours)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM condition_rules WHERE template_id = ?")
            .bind(template.id.to_string())
            .execute(&mut *tx)
            .await?;

        for rule in &template.description_rules {
            let (kind, value) = match &rule.condition {
                Some(c) => {
                    let (k, v) = c.to_kind_value();
                    (Some(k.to_string()), v)
                }
                None => (None, None),
            };
            sqlx::query(
                r#"
                INSERT INTO condition_rules
                    (id, template_id, condition_kind, condition_value, priority, template)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(rule.id.to_string())
            .bind(template.id.to_string())
            .bind(kind)
            .bind(value)
            .bind(rule.priority)
            .bind(&rule.template)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Reusable rule library users copy into templates.
    pub async fn list_condition_presets(&self) -> Result<Vec<ConditionRule>> {
        let rows = sqlx::query("SELECT * FROM condition_presets ORDER BY priority, name")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(rule_from_row).collect()
    }

    pub async fn save_condition_preset(&self, name: &str, rule: &ConditionRule) -> Result<()> {
        let (kind, value) = match &rule.condition {
            Some(c) => {
                let (k, v) = c.to_kind_value();
                (Some(k.to_string()), v)
            }
            None => (None, None),
        };
        sqlx::query(
            r#"
            INSERT INTO condition_presets
                (id, name, condition_kind, condition_value, priority, template)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                condition_kind = excluded.condition_kind,
                condition_value = excluded.condition_value,
                priority = excluded.priority,
                template = excluded.template
            "#,
        )
        .bind(rule.id.to_string())
        .bind(name)
        .bind(kind.ok_or_else(|| anyhow::anyhow!("presets need a condition"))?)
        .bind(value)
        .bind(rule.priority)
        .bind(&rule.template)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Template for a channel/group, or the built-in fallback.
    pub async fn template_or_fallback(&self, id: Option<Uuid>) -> Result<TemplateConfig> {
        if let Some(id) = id {
            if let Some(template) = self.get_template(id).await? {
                return Ok(template);
            }
            tracing::warn!("Template {} not found, using fallback", id);
        }
        Ok(TemplateConfig::fallback())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::DEFAULT_RULE_PRIORITY;

    fn sample_template() -> TemplateConfig {
        let mut template = TemplateConfig::fallback();
        template.id = Uuid::new_v4();
        template.name = "nfl".to_string();
        template.description_rules = vec![
            ConditionRule {
                id: Uuid::new_v4(),
                condition: Condition::parse("win_streak", Some("5")),
                priority: 10,
                template: "Riding a {streak}-game streak".to_string(),
            },
            ConditionRule {
                id: Uuid::new_v4(),
                condition: None,
                priority: DEFAULT_RULE_PRIORITY,
                template: "{team} vs {opponent}".to_string(),
            },
        ];
        template
    }

    #[tokio::test]
    async fn template_round_trip_with_rules() {
        let db = Database::new_in_memory().await.unwrap();
        let template = sample_template();
        db.save_template(&template).await.unwrap();

        let loaded = db.get_template(template.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "nfl");
        assert_eq!(loaded.description_rules.len(), 2);
        assert_eq!(loaded.description_rules[0].priority, 10);
        assert_eq!(
            loaded.description_rules[0].condition,
            Some(Condition::WinStreakAtLeast(5))
        );
        assert!(loaded.description_rules[1].is_default());
    }

    #[tokio::test]
    async fn condition_presets_round_trip() {
        let db = Database::new_in_memory().await.unwrap();
        let rule = ConditionRule {
            id: Uuid::new_v4(),
            condition: Condition::parse("is_top_ten_matchup", None),
            priority: 5,
            template: "Top-10 showdown: {matchup}".to_string(),
        };
        db.save_condition_preset("top ten", &rule).await.unwrap();

        let presets = db.list_condition_presets().await.unwrap();
        assert_eq!(presets.len(), 1);
        assert_eq!(
            presets[0].condition,
            Some(Condition::IsTopTenMatchup)
        );
        assert_eq!(presets[0].priority, 5);
    }

    #[tokio::test]
    async fn missing_template_yields_fallback() {
        let db = Database::new_in_memory().await.unwrap();
        let template = db
            .template_or_fallback(Some(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(template.name, "default");
    }
}
