use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use chatfetch_core::client::ChatClient;
use chatfetch_core::models::DownloadStatus;
use chatfetch_core::store::{FileStore, SettingsStore};
use chatfetch_queue::QueueHandle;
use chatfetch_registry::{Target, TargetRegistry};

use crate::{Clock, SchedulerConfig, Service, ServiceDeps, SharedLimits, SystemClock, surplus};

const MAX_PAGE_SIZE: usize = 100;

/// Backfill scanner: pages backwards through each pending target's history,
/// rotating through the rule's file kinds, under a per-target wall-clock
/// budget. Cursor state lives in the registry and only advances once a
/// page's candidates are safely queued (or the page held nothing new).
pub struct HistoryScanService {
    registry: Arc<TargetRegistry>,
    queue: QueueHandle,
    client: Arc<dyn ChatClient>,
    files: Arc<dyn FileStore>,
    settings: Arc<dyn SettingsStore>,
    limits: Arc<SharedLimits>,
    interval: Duration,
    budget: Duration,
    soft_cap: usize,
    clock: Box<dyn Clock>,
}

impl HistoryScanService {
    pub fn new(config: &SchedulerConfig, deps: &ServiceDeps) -> Self {
        Self {
            registry: deps.registry.clone(),
            queue: deps.queue.clone(),
            client: deps.client.clone(),
            files: deps.files.clone(),
            settings: deps.settings.clone(),
            limits: deps.limits.clone(),
            interval: config.scan_interval,
            budget: config.scan_budget,
            soft_cap: config.queue_soft_cap,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn scan_target(&self, mut target: Target) {
        let key = target.key();
        let account = target.account_id;
        let chat = target.chat_id;
        let started = Instant::now();
        let page_size = self.soft_cap.min(MAX_PAGE_SIZE).max(1);
        tracing::debug!("scanning history for {key}, kind {}", target.next_kind);

        loop {
            if started.elapsed() >= self.budget {
                tracing::debug!("scan budget exhausted for {key}");
                break;
            }
            if !self.registry.contains(key).await {
                break;
            }
            if surplus(self.files.as_ref(), &self.limits, account).await == 0 {
                tracing::debug!("account {account} at download limit, deferring scan of {key}");
                break;
            }
            let depth = match self.queue.queued_len(account).await {
                Ok(depth) => depth,
                Err(_) => break,
            };
            if depth > self.soft_cap {
                tracing::debug!("waiting queue past soft cap, deferring scan of {key}");
                break;
            }

            let page = match self
                .client
                .search_messages(
                    account,
                    chat,
                    target.query(),
                    target.next_kind,
                    target.next_cursor,
                    page_size,
                )
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    tracing::error!("searching {key} for {} failed: {err}", target.next_kind);
                    break;
                }
            };

            if page.messages.is_empty() {
                match target.kind_after(target.next_kind) {
                    Some(next) => {
                        tracing::debug!(
                            "{key}: no more {} files, switching to {next}",
                            target.next_kind
                        );
                        target.next_kind = next;
                        target.next_cursor = 0;
                        self.registry
                            .update(key, |t| {
                                t.next_kind = next;
                                t.next_cursor = 0;
                            })
                            .await;
                        continue;
                    }
                    None => {
                        tracing::debug!("{key}: history backfill complete");
                        self.registry
                            .update(key, |t| t.history_complete = true)
                            .await;
                        break;
                    }
                }
            }

            let ids: Vec<String> = page.messages.iter().map(|m| m.unique_id.clone()).collect();
            let known = match self.files.lookup_by_unique_ids(&ids).await {
                Ok(known) => known,
                Err(err) => {
                    tracing::warn!("file record lookup for {key} failed: {err}");
                    break;
                }
            };
            let mut seen = HashSet::new();
            let cursor = page.next_cursor;
            let candidates: Vec<_> = page
                .messages
                .into_iter()
                .filter(|m| {
                    known
                        .get(&m.unique_id)
                        .is_none_or(|status| *status == DownloadStatus::Idle)
                })
                .filter(|m| seen.insert(m.unique_id.clone()))
                .collect();

            if candidates.is_empty() {
                target.next_cursor = cursor;
                self.registry.update(key, |t| t.next_cursor = cursor).await;
                continue;
            }

            match self.queue.enqueue(account, candidates, false).await {
                Ok(true) => {
                    self.registry.update(key, |t| t.next_cursor = cursor).await;
                    break;
                }
                Ok(false) => {
                    tracing::debug!("waiting queue rejected batch for {key}, retrying next tick");
                    break;
                }
                Err(err) => {
                    tracing::warn!("enqueue for {key} failed: {err}");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Service for HistoryScanService {
    fn name(&self) -> &str {
        "HistoryScan"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        if !self.limits.download_allowed(self.clock.now_time()) {
            tracing::debug!("outside download window, skipping history scan");
            return Ok(());
        }
        for target in self.registry.list_enabled(true).await {
            self.scan_target(target).await;
        }
        if let Err(err) = self.registry.persist(self.settings.as_ref()).await {
            tracing::warn!("persisting auto-download targets failed: {err}");
        }
        Ok(())
    }
}
