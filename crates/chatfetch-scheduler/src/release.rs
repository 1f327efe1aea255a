use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use chatfetch_core::client::ChatClient;
use chatfetch_core::models::AccountId;
use chatfetch_core::store::FileStore;
use chatfetch_queue::QueueHandle;

use crate::{Clock, SchedulerConfig, Service, ServiceDeps, SharedLimits, SystemClock, surplus};

/// Admission controller's release side: every tick, hands each account's
/// oldest waiting messages to the client, at most `surplus` of them. The
/// store's status field is the source of truth for retries, so a failed
/// start is logged and dropped rather than re-queued.
pub struct DownloadReleaseService {
    queue: QueueHandle,
    client: Arc<dyn ChatClient>,
    files: Arc<dyn FileStore>,
    limits: Arc<SharedLimits>,
    interval: Duration,
    clock: Box<dyn Clock>,
}

impl DownloadReleaseService {
    pub fn new(config: &SchedulerConfig, deps: &ServiceDeps) -> Self {
        Self {
            queue: deps.queue.clone(),
            client: deps.client.clone(),
            files: deps.files.clone(),
            limits: deps.limits.clone(),
            interval: config.release_interval,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn release_account(&self, account: AccountId) {
        let surplus = surplus(self.files.as_ref(), &self.limits, account).await as usize;
        if surplus == 0 {
            tracing::debug!("no download capacity for account {account}");
            return;
        }
        let batch = match self.queue.drain(account, surplus).await {
            Ok(batch) => batch,
            Err(_) => return,
        };
        if batch.is_empty() {
            return;
        }
        tracing::debug!("releasing {} download(s) for account {account}", batch.len());

        for message in batch {
            match self
                .client
                .start_download(account, message.chat_id, message.message_id, message.file_id)
                .await
            {
                Ok(()) => tracing::info!(
                    "download started: chat {} message {} file {}",
                    message.chat_id,
                    message.message_id,
                    message.file_id
                ),
                Err(err) => tracing::error!(
                    "starting download failed: chat {} message {}: {err}",
                    message.chat_id,
                    message.message_id
                ),
            }
        }
    }
}

#[async_trait]
impl Service for DownloadReleaseService {
    fn name(&self) -> &str {
        "DownloadRelease"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        if !self.limits.download_allowed(self.clock.now_time()) {
            tracing::debug!("outside download window, skipping release");
            return Ok(());
        }
        for account in self.queue.accounts().await? {
            self.release_account(account).await;
        }
        Ok(())
    }
}
