use rust_embed::RustEmbed;

/// Embedded database migrations, applied in filename order at startup.
#[derive(RustEmbed)]
#[folder = "migrations/"]
pub struct MigrationAssets;

impl MigrationAssets {
    /// All migration files as `(name, sql)` pairs, sorted by name.
    pub fn get_migrations() -> Vec<(String, String)> {
        let mut migrations = Vec::new();

        for file_path in Self::iter() {
            if !file_path.ends_with(".sql") {
                continue;
            }
            if let Some(file) = Self::get(&file_path) {
                let content = String::from_utf8_lossy(&file.data).to_string();
                migrations.push((file_path.to_string(), content));
            }
        }

        migrations.sort_by(|a, b| a.0.cmp(&b.0));
        migrations
    }
}
