use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::{mpsc, oneshot};

use chatfetch_core::models::{AccountId, ChatId, MediaMessage};

use crate::command::QueueCommand;
use crate::error::QueueError;

#[derive(Debug, Clone)]
pub struct QueueHandle {
    command_tx: mpsc::Sender<QueueCommand>,
}

impl QueueHandle {
    /// Returns whether anything was added. The soft cap applies to the
    /// non-forced path only and is checked against the pre-insert length.
    pub async fn enqueue(
        &self,
        account: AccountId,
        messages: Vec<MediaMessage>,
        force: bool,
    ) -> Result<bool, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(QueueCommand::Enqueue {
                account,
                messages,
                force,
                reply: reply_tx,
            })
            .await
            .map_err(|_| QueueError::Shutdown)?;
        reply_rx.await.map_err(|_| QueueError::Shutdown)
    }

    pub async fn drain(
        &self,
        account: AccountId,
        max: usize,
    ) -> Result<Vec<MediaMessage>, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(QueueCommand::Drain {
                account,
                max,
                reply: reply_tx,
            })
            .await
            .map_err(|_| QueueError::Shutdown)?;
        reply_rx.await.map_err(|_| QueueError::Shutdown)
    }

    pub async fn purge_chat(&self, account: AccountId, chat: ChatId) -> Result<(), QueueError> {
        self.command_tx
            .send(QueueCommand::PurgeChat { account, chat })
            .await
            .map_err(|_| QueueError::Shutdown)
    }

    pub async fn queued_len(&self, account: AccountId) -> Result<usize, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(QueueCommand::QueuedLen {
                account,
                reply: reply_tx,
            })
            .await
            .map_err(|_| QueueError::Shutdown)?;
        reply_rx.await.map_err(|_| QueueError::Shutdown)
    }

    /// Accounts that currently have at least one waiting message.
    pub async fn accounts(&self) -> Result<Vec<AccountId>, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(QueueCommand::Accounts { reply: reply_tx })
            .await
            .map_err(|_| QueueError::Shutdown)?;
        reply_rx.await.map_err(|_| QueueError::Shutdown)
    }

    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.command_tx
            .send(QueueCommand::Shutdown)
            .await
            .map_err(|_| QueueError::Shutdown)
    }
}

/// Single owner of every account's waiting queue. All mutation goes through
/// the command channel, so per-account state is never shared across the scan
/// and release ticks directly.
pub struct QueueCoordinator {
    queues: HashMap<AccountId, VecDeque<MediaMessage>>,
    soft_cap: usize,
    command_rx: mpsc::Receiver<QueueCommand>,
}

impl QueueCoordinator {
    pub fn new(soft_cap: usize) -> (Self, QueueHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let coordinator = Self {
            queues: HashMap::new(),
            soft_cap,
            command_rx,
        };
        (coordinator, QueueHandle { command_tx })
    }

    pub async fn run(&mut self) {
        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                QueueCommand::Enqueue {
                    account,
                    messages,
                    force,
                    reply,
                } => {
                    let _ = reply.send(self.enqueue(account, messages, force));
                }
                QueueCommand::Drain {
                    account,
                    max,
                    reply,
                } => {
                    let _ = reply.send(self.drain(account, max));
                }
                QueueCommand::PurgeChat { account, chat } => {
                    self.purge_chat(account, chat);
                }
                QueueCommand::QueuedLen { account, reply } => {
                    let len = self.queues.get(&account).map_or(0, VecDeque::len);
                    let _ = reply.send(len);
                }
                QueueCommand::Accounts { reply } => {
                    let accounts = self.queues.keys().copied().collect();
                    let _ = reply.send(accounts);
                }
                QueueCommand::Shutdown => break,
            }
        }
    }

    fn enqueue(&mut self, account: AccountId, messages: Vec<MediaMessage>, force: bool) -> bool {
        if messages.is_empty() {
            return false;
        }
        let queue = self.queues.entry(account).or_default();
        if !force && queue.len() > self.soft_cap {
            tracing::debug!("waiting queue full for account {account}, rejecting batch");
            return false;
        }

        let mut seen: HashSet<String> = queue.iter().map(|m| m.unique_id.clone()).collect();
        let before = queue.len();
        for message in messages {
            if seen.insert(message.unique_id.clone()) {
                queue.push_back(message);
            }
        }
        let added = queue.len() - before;
        if added > 0 {
            tracing::debug!("queued {added} waiting message(s) for account {account}");
        }
        added > 0
    }

    fn drain(&mut self, account: AccountId, max: usize) -> Vec<MediaMessage> {
        let Some(queue) = self.queues.get_mut(&account) else {
            return Vec::new();
        };
        let count = max.min(queue.len());
        let drained = queue.drain(..count).collect();
        if queue.is_empty() {
            self.queues.remove(&account);
        }
        drained
    }

    fn purge_chat(&mut self, account: AccountId, chat: ChatId) {
        if let Some(queue) = self.queues.get_mut(&account) {
            let before = queue.len();
            queue.retain(|m| m.chat_id != chat);
            let removed = before - queue.len();
            if removed > 0 {
                tracing::debug!("purged {removed} waiting message(s) for chat {chat}");
            }
            if queue.is_empty() {
                self.queues.remove(&account);
            }
        }
    }
}
