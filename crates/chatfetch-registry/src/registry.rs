use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use chatfetch_core::client::ChatClient;
use chatfetch_core::models::{AccountId, ChatId, FileKind, DEFAULT_KIND_ORDER};
use chatfetch_core::store::{keys, SettingsStore};

use crate::records::{RuleRecord, TargetRecord, TargetsRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub account_id: AccountId,
    pub chat_id: ChatId,
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.account_id, self.chat_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetRule {
    pub query: Option<String>,
    pub kinds: Vec<FileKind>,
}

/// One enabled (account, conversation) pair plus its backfill scan state.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub account_id: AccountId,
    pub chat_id: ChatId,
    pub rule: Option<TargetRule>,
    pub next_kind: FileKind,
    pub next_cursor: i64,
    pub history_complete: bool,
}

impl Target {
    pub fn key(&self) -> TargetKey {
        TargetKey {
            account_id: self.account_id,
            chat_id: self.chat_id,
        }
    }

    /// The ordered kind rotation for this target.
    pub fn kinds(&self) -> &[FileKind] {
        match &self.rule {
            Some(rule) if !rule.kinds.is_empty() => &rule.kinds,
            _ => &DEFAULT_KIND_ORDER,
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.rule
            .as_ref()
            .and_then(|rule| rule.query.as_deref())
            .filter(|q| !q.trim().is_empty())
    }

    /// The kind after `current` in the rotation, if any.
    pub fn kind_after(&self, current: FileKind) -> Option<FileKind> {
        let kinds = self.kinds();
        let idx = kinds.iter().position(|k| *k == current)?;
        kinds.get(idx + 1).copied()
    }

    fn from_record(record: TargetRecord) -> Self {
        let rule = record.rule.map(|rule| TargetRule {
            query: rule.query,
            kinds: rule.kinds,
        });
        let mut target = Self {
            account_id: record.account_id,
            chat_id: record.chat_id,
            rule,
            next_kind: FileKind::Photo,
            next_cursor: record.next_cursor,
            history_complete: record.history_complete,
        };
        target.next_kind = match record.next_kind {
            Some(kind) if target.kinds().contains(&kind) => kind,
            _ => target.kinds()[0],
        };
        target
    }

    fn to_record(&self) -> TargetRecord {
        TargetRecord {
            account_id: self.account_id,
            chat_id: self.chat_id,
            rule: self.rule.as_ref().map(|rule| RuleRecord {
                query: rule.query.clone(),
                kinds: rule.kinds.clone(),
            }),
            next_kind: Some(self.next_kind),
            next_cursor: self.next_cursor,
            history_complete: self.history_complete,
        }
    }
}

/// Notified with the removed targets before `reconcile` returns, so queue
/// cleanup is complete by the time the configuration update is acknowledged.
#[async_trait]
pub trait RemovalListener: Send + Sync {
    async fn targets_removed(&self, removed: &[Target]);
}

/// Authoritative in-memory set of enabled targets. Constructed once at
/// process start and shared by handle; mutation (load/reconcile/persist)
/// is serialized behind one async mutex.
#[derive(Default)]
pub struct TargetRegistry {
    inner: Mutex<Vec<Target>>,
    listeners: std::sync::Mutex<Vec<Arc<dyn RemovalListener>>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_removal_listener(&self, listener: Arc<dyn RemovalListener>) {
        self.listeners.lock().expect("listener lock").push(listener);
    }

    /// Rebuild the target set from the settings store. Entries whose account
    /// is not authorized are dropped and only come back via a later
    /// configuration update.
    pub async fn load(
        &self,
        settings: &dyn SettingsStore,
        client: &dyn ChatClient,
    ) -> anyhow::Result<()> {
        let record = match settings.get(keys::AUTO_TARGETS).await? {
            Some(raw) => TargetsRecord::decode(&raw)?,
            None => return Ok(()),
        };
        let mut inner = self.inner.lock().await;
        inner.clear();
        for item in record.items {
            if !client.is_authorized(item.account_id) {
                tracing::warn!(
                    "skipping auto-download target {}:{}: account not authorized",
                    item.account_id,
                    item.chat_id
                );
                continue;
            }
            let target = Target::from_record(item);
            inner.retain(|t| t.key() != target.key());
            inner.push(target);
        }
        tracing::info!("loaded {} auto-download target(s)", inner.len());
        Ok(())
    }

    /// Apply a newly-submitted configuration: add or replace authorized
    /// entries, drop unauthorized ones with a warning, and remove tracked
    /// targets absent from the desired set. Removal listeners run before
    /// this returns.
    pub async fn reconcile(&self, desired: &TargetsRecord, client: &dyn ChatClient) {
        let removed = {
            let mut inner = self.inner.lock().await;
            for item in &desired.items {
                if !client.is_authorized(item.account_id) {
                    tracing::warn!(
                        "rejecting auto-download target {}:{}: account not authorized",
                        item.account_id,
                        item.chat_id
                    );
                    continue;
                }
                let target = Target::from_record(item.clone());
                let existed = inner.iter().any(|t| t.key() == target.key());
                inner.retain(|t| t.key() != target.key());
                if !existed {
                    tracing::info!("auto-download target enabled: {}", target.key());
                }
                inner.push(target);
            }

            let mut removed = Vec::new();
            inner.retain(|target| {
                if desired.contains(target.account_id, target.chat_id) {
                    return true;
                }
                tracing::info!("auto-download target disabled: {}", target.key());
                removed.push(target.clone());
                false
            });
            removed
        };

        if removed.is_empty() {
            return;
        }
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .expect("listener lock")
            .iter()
            .cloned()
            .collect();
        for listener in listeners {
            listener.targets_removed(&removed).await;
        }
    }

    /// Write the current target set back to the settings store, merging
    /// additively with entries some other process instance owns.
    pub async fn persist(&self, settings: &dyn SettingsStore) -> anyhow::Result<()> {
        let inner = self.inner.lock().await;
        let mut merged = match settings.get(keys::AUTO_TARGETS).await? {
            Some(raw) => TargetsRecord::decode(&raw).unwrap_or_else(|err| {
                tracing::warn!("discarding undecodable stored targets: {err}");
                TargetsRecord::default()
            }),
            None => TargetsRecord::default(),
        };
        for target in inner.iter() {
            merged.upsert(target.to_record());
        }
        settings.put(keys::AUTO_TARGETS, &merged.encode()?).await
    }

    pub async fn list_enabled(&self, pending_only: bool) -> Vec<Target> {
        self.inner
            .lock()
            .await
            .iter()
            .filter(|target| !pending_only || !target.history_complete)
            .cloned()
            .collect()
    }

    pub async fn contains(&self, key: TargetKey) -> bool {
        self.inner.lock().await.iter().any(|t| t.key() == key)
    }

    /// Apply a scan-state mutation to one target, if still tracked.
    pub async fn update<F>(&self, key: TargetKey, mutate: F) -> bool
    where
        F: FnOnce(&mut Target),
    {
        let mut inner = self.inner.lock().await;
        match inner.iter_mut().find(|t| t.key() == key) {
            Some(target) => {
                mutate(target);
                true
            }
            None => false,
        }
    }
}
