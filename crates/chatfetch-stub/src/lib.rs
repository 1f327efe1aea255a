use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use chatfetch_core::client::ChatClient;
use chatfetch_core::models::{
    AccountId, ChatId, DownloadStatus, FileKind, MediaMessage, MessageId, SearchPage,
};
use chatfetch_core::store::{FileStore, SettingChange, SettingsStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedDownload {
    pub account_id: AccountId,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub file_id: i32,
}

#[derive(Default)]
struct ClientState {
    authorized: Mutex<HashSet<AccountId>>,
    // (account, chat, kind) -> pages, addressed by cursor as page index.
    pages: Mutex<HashMap<(AccountId, ChatId, FileKind), Vec<Vec<MediaMessage>>>>,
    messages: Mutex<HashMap<(ChatId, MessageId), MediaMessage>>,
    started: Mutex<Vec<StartedDownload>>,
    fail_search: AtomicBool,
    fail_start: AtomicBool,
    fail_get: AtomicBool,
}

/// Scripted chat client. Search pages are pre-loaded per (account, chat,
/// kind); the pagination cursor is the page index, and searching past the
/// last scripted page yields empty pages forever.
#[derive(Clone, Default)]
pub struct StubClient {
    state: Arc<ClientState>,
}

impl StubClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authorize(&self, account: AccountId) {
        self.state
            .authorized
            .lock()
            .expect("authorized lock")
            .insert(account);
    }

    pub fn deauthorize(&self, account: AccountId) {
        self.state
            .authorized
            .lock()
            .expect("authorized lock")
            .remove(&account);
    }

    pub fn script_page(
        &self,
        account: AccountId,
        chat: ChatId,
        kind: FileKind,
        messages: Vec<MediaMessage>,
    ) {
        self.state
            .pages
            .lock()
            .expect("pages lock")
            .entry((account, chat, kind))
            .or_default()
            .push(messages);
    }

    pub fn insert_message(&self, message: MediaMessage) {
        self.state
            .messages
            .lock()
            .expect("messages lock")
            .insert((message.chat_id, message.message_id), message);
    }

    pub fn fail_search(&self, fail: bool) {
        self.state.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start_download(&self, fail: bool) {
        self.state.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get_message(&self, fail: bool) {
        self.state.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn started_downloads(&self) -> Vec<StartedDownload> {
        self.state.started.lock().expect("started lock").clone()
    }
}

#[async_trait]
impl ChatClient for StubClient {
    fn is_authorized(&self, account: AccountId) -> bool {
        self.state
            .authorized
            .lock()
            .expect("authorized lock")
            .contains(&account)
    }

    async fn search_messages(
        &self,
        account: AccountId,
        chat: ChatId,
        _query: Option<&str>,
        kind: FileKind,
        from_cursor: i64,
        limit: usize,
    ) -> anyhow::Result<SearchPage> {
        if self.state.fail_search.load(Ordering::SeqCst) {
            anyhow::bail!("scripted search failure");
        }
        let pages = self.state.pages.lock().expect("pages lock");
        let scripted = pages.get(&(account, chat, kind));
        let index = from_cursor.max(0) as usize;
        let messages = scripted
            .and_then(|pages| pages.get(index))
            .map(|page| page.iter().take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(SearchPage {
            messages,
            next_cursor: from_cursor + 1,
        })
    }

    async fn get_message(
        &self,
        _account: AccountId,
        chat: ChatId,
        message: MessageId,
    ) -> anyhow::Result<MediaMessage> {
        if self.state.fail_get.load(Ordering::SeqCst) {
            anyhow::bail!("scripted get_message failure");
        }
        self.state
            .messages
            .lock()
            .expect("messages lock")
            .get(&(chat, message))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("message {chat}:{message} not scripted"))
    }

    async fn start_download(
        &self,
        account: AccountId,
        chat: ChatId,
        message: MessageId,
        file_id: i32,
    ) -> anyhow::Result<()> {
        if self.state.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("scripted start_download failure");
        }
        self.state
            .started
            .lock()
            .expect("started lock")
            .push(StartedDownload {
                account_id: account,
                chat_id: chat,
                message_id: message,
                file_id,
            });
        Ok(())
    }
}

#[derive(Default)]
struct FileStoreState {
    statuses: Mutex<HashMap<String, DownloadStatus>>,
    downloading: Mutex<HashMap<AccountId, u32>>,
    fail_count: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryFileStore {
    state: Arc<FileStoreState>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, unique_id: &str, status: DownloadStatus) {
        self.state
            .statuses
            .lock()
            .expect("statuses lock")
            .insert(unique_id.to_string(), status);
    }

    pub fn set_downloading(&self, account: AccountId, count: u32) {
        self.state
            .downloading
            .lock()
            .expect("downloading lock")
            .insert(account, count);
    }

    pub fn fail_count_downloading(&self, fail: bool) {
        self.state.fail_count.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn count_downloading(&self, account: AccountId) -> anyhow::Result<u32> {
        if self.state.fail_count.load(Ordering::SeqCst) {
            anyhow::bail!("scripted count failure");
        }
        Ok(self
            .state
            .downloading
            .lock()
            .expect("downloading lock")
            .get(&account)
            .copied()
            .unwrap_or(0))
    }

    async fn lookup_by_unique_ids(
        &self,
        ids: &[String],
    ) -> anyhow::Result<HashMap<String, DownloadStatus>> {
        let statuses = self.state.statuses.lock().expect("statuses lock");
        Ok(ids
            .iter()
            .filter_map(|id| statuses.get(id).map(|status| (id.clone(), *status)))
            .collect())
    }
}

pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
    change_tx: broadcast::Sender<SettingChange>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            values: Mutex::new(HashMap::new()),
            change_tx,
        }
    }
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an update arriving from outside this process: store the
    /// value and publish a change notification.
    pub fn emit(&self, key: &str, value: &str) {
        self.values
            .lock()
            .expect("values lock")
            .insert(key.to_string(), value.to_string());
        let _ = self.change_tx.send(SettingChange {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.lock().expect("values lock").get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values
            .lock()
            .expect("values lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.change_tx.subscribe()
    }
}
