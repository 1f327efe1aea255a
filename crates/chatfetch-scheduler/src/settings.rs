use tokio::sync::broadcast;

use chatfetch_core::store::{SettingChange, keys};
use chatfetch_registry::TargetsRecord;

use crate::{DEFAULT_DOWNLOAD_LIMIT, ServiceDeps, decode_window};

/// Applies setting-change notifications live: the per-account limit, the
/// daily time window, and the enabled-target set (which goes through
/// `reconcile`, purging queues for disabled targets).
pub async fn run_settings_watch(deps: ServiceDeps, mut shutdown: broadcast::Receiver<()>) {
    let mut changes = deps.settings.subscribe();
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => apply_setting_change(&deps, change).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("settings watcher lagged, dropped {skipped} notification(s)");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

pub(crate) async fn apply_setting_change(deps: &ServiceDeps, change: SettingChange) {
    match change.key.as_str() {
        keys::DOWNLOAD_LIMIT => {
            let limit = change
                .value
                .trim()
                .parse()
                .unwrap_or(DEFAULT_DOWNLOAD_LIMIT);
            tracing::debug!("download limit updated to {limit}");
            deps.limits.set_limit(limit);
        }
        keys::TIME_WINDOW => {
            if change.value.trim().is_empty() {
                tracing::debug!("download time window cleared");
                deps.limits.set_window(None);
                return;
            }
            match decode_window(&change.value) {
                Ok(window) => {
                    tracing::debug!("download time window updated: {window:?}");
                    deps.limits.set_window(Some(window));
                }
                Err(err) => tracing::warn!("ignoring undecodable time window update: {err}"),
            }
        }
        keys::AUTO_TARGETS => match TargetsRecord::decode(&change.value) {
            Ok(desired) => {
                tracing::debug!("auto-download targets updated: {} entries", desired.items.len());
                deps.registry.reconcile(&desired, deps.client.as_ref()).await;
            }
            Err(err) => tracing::warn!("ignoring undecodable auto-download targets: {err}"),
        },
        _ => {}
    }
}
