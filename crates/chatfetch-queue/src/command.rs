use tokio::sync::oneshot;

use chatfetch_core::models::{AccountId, ChatId, MediaMessage};

#[derive(Debug)]
pub enum QueueCommand {
    Enqueue {
        account: AccountId,
        messages: Vec<MediaMessage>,
        force: bool,
        reply: oneshot::Sender<bool>,
    },
    Drain {
        account: AccountId,
        max: usize,
        reply: oneshot::Sender<Vec<MediaMessage>>,
    },
    PurgeChat {
        account: AccountId,
        chat: ChatId,
    },
    QueuedLen {
        account: AccountId,
        reply: oneshot::Sender<usize>,
    },
    Accounts {
        reply: oneshot::Sender<Vec<AccountId>>,
    },
    Shutdown,
}
