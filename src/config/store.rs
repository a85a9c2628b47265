use arc_swap::ArcSwap;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::AppConfig;
use crate::error::{AppError, Result};

/// Row holding the whole settings document
const DOCUMENT_KEY: &str = "usb_gadgetd";

/// Daemon settings, one JSON document in SQLite with an in-memory copy
///
/// Readers load the cached `Arc` without touching the database, so the
/// gadget controller can consult vendor properties on every request.
/// Writers persist first and publish to the cache only on success.
#[derive(Clone)]
pub struct ConfigStore {
    pool: Pool<Sqlite>,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Open the settings database at `db_path`, creating it with defaults
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&format!("sqlite:{}?mode=rwc", db_path.display()))
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let config = match Self::load(&pool).await? {
            Some(config) => config,
            None => {
                info!("No stored settings, writing defaults");
                let config = AppConfig::default();
                Self::persist(&pool, &config).await?;
                config
            }
        };

        Ok(Self {
            pool,
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    async fn load(pool: &Pool<Sqlite>) -> Result<Option<AppConfig>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT document FROM settings WHERE key = ?1")
                .bind(DOCUMENT_KEY)
                .fetch_optional(pool)
                .await?;

        row.map(|(json,)| {
            serde_json::from_str(&json)
                .map_err(|e| AppError::Config(format!("stored settings unreadable: {}", e)))
        })
        .transpose()
    }

    async fn persist(pool: &Pool<Sqlite>, config: &AppConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, document) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET document = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(DOCUMENT_KEY)
        .bind(serde_json::to_string(config)?)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Current settings
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Replace the whole document
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        Self::persist(&self.pool, &config).await?;
        self.cache.store(Arc::new(config));
        debug!("Settings replaced");
        Ok(())
    }

    /// Edit a copy of the current settings and store it
    ///
    /// Concurrent edits are last-writer-wins.
    pub async fn update<F>(&self, edit: F) -> Result<Arc<AppConfig>>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = AppConfig::clone(&self.cache.load());
        edit(&mut config);

        Self::persist(&self.pool, &config).await?;
        let config = Arc::new(config);
        self.cache.store(config.clone());
        debug!("Settings updated");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_defaults_then_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("settings.db");

        let store = ConfigStore::new(&db_path).await.unwrap();
        assert_eq!(store.get().vendor.usb_config, "");
        assert!(!store.get().vendor.uvc_enabled);

        let updated = store
            .update(|c| {
                c.vendor.usb_config = "diag".to_string();
                c.vendor.uvc_enabled = true;
                c.web.http_port = 9000;
            })
            .await
            .unwrap();
        assert_eq!(updated.vendor.usb_config, "diag");
        assert!(store.get().vendor.uvc_enabled);

        drop(store);
        let reopened = ConfigStore::new(&db_path).await.unwrap();
        assert_eq!(reopened.get().vendor.usb_config, "diag");
        assert_eq!(reopened.get().web.http_port, 9000);
    }

    #[tokio::test]
    async fn test_set_replaces_document() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("settings.db")).await.unwrap();
        store
            .update(|c| c.vendor.boot_mode = "factory".to_string())
            .await
            .unwrap();

        store.set(AppConfig::default()).await.unwrap();
        assert_eq!(store.get().vendor.boot_mode, AppConfig::default().vendor.boot_mode);
    }

    #[tokio::test]
    async fn test_unreadable_document_is_config_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("settings.db");
        let store = ConfigStore::new(&db_path).await.unwrap();

        sqlx::query("UPDATE settings SET document = 'not json' WHERE key = ?1")
            .bind(DOCUMENT_KEY)
            .execute(&store.pool)
            .await
            .unwrap();

        let result = ConfigStore::new(&db_path).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
