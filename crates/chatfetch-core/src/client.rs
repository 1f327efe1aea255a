use async_trait::async_trait;

use crate::models::{AccountId, ChatId, FileKind, MediaMessage, MessageId, SearchPage};

/// Boundary to the chat-platform client binding. Implementations wrap the
/// real platform SDK; the scheduler only ever talks through this trait.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Whether the account is connected and authorized right now.
    fn is_authorized(&self, account: AccountId) -> bool;

    /// Page backwards through messages matching the kind filter and optional
    /// free-text query. `from_cursor` 0 starts from the newest message.
    async fn search_messages(
        &self,
        account: AccountId,
        chat: ChatId,
        query: Option<&str>,
        kind: FileKind,
        from_cursor: i64,
        limit: usize,
    ) -> anyhow::Result<SearchPage>;

    async fn get_message(
        &self,
        account: AccountId,
        chat: ChatId,
        message: MessageId,
    ) -> anyhow::Result<MediaMessage>;

    /// Fire-and-forget from the scheduler's perspective; final status is
    /// observed later through the file store.
    async fn start_download(
        &self,
        account: AccountId,
        chat: ChatId,
        message: MessageId,
        file_id: i32,
    ) -> anyhow::Result<()>;
}
