use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::models::{AccountId, DownloadStatus};

/// Well-known setting keys shared between this process and the UI writing
/// the configuration.
pub mod keys {
    pub const AUTO_TARGETS: &str = "auto_download_targets";
    pub const DOWNLOAD_LIMIT: &str = "auto_download_limit";
    pub const TIME_WINDOW: &str = "auto_download_time_window";
}

/// Boundary to the persistent record store of downloaded files.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn count_downloading(&self, account: AccountId) -> anyhow::Result<u32>;

    async fn lookup_by_unique_ids(
        &self,
        ids: &[String],
    ) -> anyhow::Result<HashMap<String, DownloadStatus>>;
}

#[derive(Debug, Clone)]
pub struct SettingChange {
    pub key: String,
    pub value: String,
}

/// Boundary to the settings key/value store and its change-notification bus.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Change notifications for keys updated outside this process.
    fn subscribe(&self) -> broadcast::Receiver<SettingChange>;
}
