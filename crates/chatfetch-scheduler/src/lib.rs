mod live;
mod release;
mod scan;
mod settings;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;
use tokio::sync::{broadcast, mpsc};

use chatfetch_core::client::ChatClient;
use chatfetch_core::models::{AccountId, NewMessageEvent, TimeWindow, TimeWindowRecord};
use chatfetch_core::store::{FileStore, SettingsStore, keys};
use chatfetch_queue::QueueHandle;
use chatfetch_registry::{RemovalListener, Target, TargetRegistry};

pub use crate::live::run_live_ingest;
pub use crate::release::DownloadReleaseService;
pub use crate::scan::HistoryScanService;
pub use crate::settings::run_settings_watch;

pub const DEFAULT_DOWNLOAD_LIMIT: u32 = 5;
pub const DEFAULT_QUEUE_SOFT_CAP: usize = 30;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    pub release_interval: Duration,
    /// Wall-clock budget for one target's scan within a single tick.
    pub scan_budget: Duration,
    pub download_limit: u32,
    pub queue_soft_cap: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(120),
            release_interval: Duration::from_secs(10),
            scan_budget: Duration::from_secs(10),
            download_limit: DEFAULT_DOWNLOAD_LIMIT,
            queue_soft_cap: DEFAULT_QUEUE_SOFT_CAP,
        }
    }
}

#[async_trait]
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn interval(&self) -> Duration;
    async fn tick(&mut self) -> anyhow::Result<()>;
}

pub async fn run_service(mut service: Box<dyn Service>, mut shutdown: broadcast::Receiver<()>) {
    let name = service.name().to_string();
    tracing::info!("starting service: {name}");

    let mut interval = tokio::time::interval(service.interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = service.tick().await {
                    tracing::error!("service {name} error: {err}");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("shutting down service: {name}");
                break;
            }
        }
    }
}

pub trait Clock: Send + Sync {
    fn now_time(&self) -> NaiveTime;
}

#[derive(Debug, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_time(&self) -> NaiveTime {
        chrono::Local::now().time()
    }
}

/// Admission state shared by the scan and release services and updated live
/// from setting-change notifications.
pub struct SharedLimits {
    limit: AtomicU32,
    window: std::sync::Mutex<Option<TimeWindow>>,
}

impl SharedLimits {
    pub fn new(limit: u32, window: Option<TimeWindow>) -> Self {
        Self {
            limit: AtomicU32::new(limit),
            window: std::sync::Mutex::new(window),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn set_limit(&self, limit: u32) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    pub fn window(&self) -> Option<TimeWindow> {
        *self.window.lock().expect("window lock")
    }

    pub fn set_window(&self, window: Option<TimeWindow>) {
        *self.window.lock().expect("window lock") = window;
    }

    pub fn download_allowed(&self, now: NaiveTime) -> bool {
        self.window().is_none_or(|window| window.admits(now))
    }
}

#[derive(Clone)]
pub struct ServiceDeps {
    pub registry: Arc<TargetRegistry>,
    pub queue: QueueHandle,
    pub client: Arc<dyn ChatClient>,
    pub files: Arc<dyn FileStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub limits: Arc<SharedLimits>,
}

/// Purges a disabled target's waiting entries; registered on the registry so
/// the purge completes before `reconcile` returns.
pub struct QueuePurge(pub QueueHandle);

#[async_trait]
impl RemovalListener for QueuePurge {
    async fn targets_removed(&self, removed: &[Target]) {
        for target in removed {
            if let Err(err) = self.0.purge_chat(target.account_id, target.chat_id).await {
                tracing::warn!("purging waiting queue for {} failed: {err}", target.key());
            }
        }
    }
}

/// Remaining per-account download capacity. The store is the source of truth
/// for what is already running; an unreadable count fails open to the full
/// limit.
pub(crate) async fn surplus(
    files: &dyn FileStore,
    limits: &SharedLimits,
    account: AccountId,
) -> u32 {
    let limit = limits.limit();
    match files.count_downloading(account).await {
        Ok(downloading) => limit.saturating_sub(downloading),
        Err(err) => {
            tracing::warn!("counting downloads for account {account} failed: {err}");
            limit
        }
    }
}

pub(crate) fn decode_window(raw: &str) -> anyhow::Result<TimeWindow> {
    let record: TimeWindowRecord = serde_json::from_str(raw)?;
    TimeWindow::from_record(&record)
}

/// Seed the shared limits from the settings store; unreadable values are
/// logged and leave the configured defaults in place.
pub async fn load_limits(settings: &dyn SettingsStore, config: &SchedulerConfig) -> SharedLimits {
    let mut limit = config.download_limit;
    match settings.get(keys::DOWNLOAD_LIMIT).await {
        Ok(Some(raw)) => match raw.trim().parse() {
            Ok(parsed) => limit = parsed,
            Err(err) => tracing::warn!("invalid stored download limit {raw:?}: {err}"),
        },
        Ok(None) => {}
        Err(err) => tracing::error!("reading download limit failed: {err}"),
    }

    let mut window = None;
    match settings.get(keys::TIME_WINDOW).await {
        Ok(Some(raw)) if !raw.trim().is_empty() => match decode_window(&raw) {
            Ok(decoded) => window = Some(decoded),
            Err(err) => tracing::warn!("invalid stored download time window: {err}"),
        },
        Ok(_) => {}
        Err(err) => tracing::error!("reading download time window failed: {err}"),
    }

    SharedLimits::new(limit, window)
}

pub async fn start_services(
    config: &SchedulerConfig,
    deps: ServiceDeps,
    events: mpsc::Receiver<NewMessageEvent>,
) -> (broadcast::Sender<()>, Vec<tokio::task::JoinHandle<()>>) {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    deps.registry
        .register_removal_listener(Arc::new(QueuePurge(deps.queue.clone())));

    let services: Vec<Box<dyn Service>> = vec![
        Box::new(HistoryScanService::new(config, &deps)),
        Box::new(DownloadReleaseService::new(config, &deps)),
    ];
    let mut handles = Vec::with_capacity(services.len() + 2);
    for service in services {
        handles.push(tokio::spawn(run_service(service, shutdown_tx.subscribe())));
    }
    handles.push(tokio::spawn(run_settings_watch(
        deps.clone(),
        shutdown_tx.subscribe(),
    )));
    handles.push(tokio::spawn(run_live_ingest(
        events,
        deps.clone(),
        shutdown_tx.subscribe(),
    )));

    let target_count = deps.registry.list_enabled(false).await.len();
    tracing::info!(
        "auto download scheduler started: scan every {:?}, release every {:?}, limit {} per account, window {:?}, {target_count} target(s)",
        config.scan_interval,
        config.release_interval,
        deps.limits.limit(),
        deps.limits.window(),
    );

    (shutdown_tx, handles)
}

pub async fn shutdown_services(
    tx: broadcast::Sender<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("auto download scheduler stopped");
}
