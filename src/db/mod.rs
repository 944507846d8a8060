//! SQLite persistence for bot settings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::settings::SettingsStore;

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored setting record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSetting {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Each in-memory connection is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create settings table")?;

        Ok(())
    }

    /// All stored settings with their modification time.
    pub async fn get_settings(&self) -> Result<Vec<StoredSetting>> {
        sqlx::query_as::<_, StoredSetting>(
            "SELECT key, value, updated_at FROM settings ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read settings")
    }

    /// Remove a setting so its default applies again.
    pub async fn remove_setting(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SettingsStore for Database {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read setting '{}'", key))?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store setting '{}'", key))?;

        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .get_settings()
            .await?
            .into_iter()
            .map(|s| (s.key, s.value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settings_round_trip() {
        let db = Database::new("sqlite::memory:").await.unwrap();

        assert_eq!(db.get("pairs").await.unwrap(), None);

        db.set("pairs", "XBT/EUR").await.unwrap();
        db.set("pairs", "ETH/EUR").await.unwrap();
        db.set("monitor_interval_secs", "0").await.unwrap();

        assert_eq!(db.get("pairs").await.unwrap().as_deref(), Some("ETH/EUR"));
        assert_eq!(
            db.entries().await.unwrap(),
            vec![
                ("monitor_interval_secs".to_string(), "0".to_string()),
                ("pairs".to_string(), "ETH/EUR".to_string()),
            ]
        );

        let rows = db.get_settings().await.unwrap();
        assert!(rows.iter().all(|row| !row.updated_at.is_empty()));

        assert!(db.remove_setting("pairs").await.unwrap());
        assert!(!db.remove_setting("pairs").await.unwrap());
        assert_eq!(db.get("pairs").await.unwrap(), None);
    }
}
