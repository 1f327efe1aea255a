use tokio::sync::{broadcast, mpsc};

use chatfetch_core::client::ChatClient;
use chatfetch_core::models::NewMessageEvent;
use chatfetch_queue::QueueHandle;
use chatfetch_registry::{TargetKey, TargetRegistry};

use crate::ServiceDeps;

/// Consumes platform new-message notifications and force-enqueues matching
/// messages. Events for untracked conversations or unauthorized accounts
/// are dropped silently; this path never triggers a backfill catch-up.
pub async fn run_live_ingest(
    mut events: mpsc::Receiver<NewMessageEvent>,
    deps: ServiceDeps,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!("live ingestion started");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    handle_new_message(event, &deps.registry, deps.client.as_ref(), &deps.queue)
                        .await;
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::info!("live ingestion stopped");
}

pub(crate) async fn handle_new_message(
    event: NewMessageEvent,
    registry: &TargetRegistry,
    client: &dyn ChatClient,
    queue: &QueueHandle,
) {
    let key = TargetKey {
        account_id: event.account_id,
        chat_id: event.chat_id,
    };
    if !registry.contains(key).await {
        tracing::trace!("ignoring live message for untracked conversation {key}");
        return;
    }
    if !client.is_authorized(event.account_id) {
        return;
    }
    match client
        .get_message(event.account_id, event.chat_id, event.message_id)
        .await
    {
        Ok(message) => {
            if let Err(err) = queue.enqueue(event.account_id, vec![message], true).await {
                tracing::warn!("force enqueue for {key} failed: {err}");
            }
        }
        Err(err) => {
            tracing::error!(
                "fetching live message {key}:{} failed: {err}",
                event.message_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chatfetch_core::models::{FileKind, MediaMessage};
    use chatfetch_queue::QueueCoordinator;
    use chatfetch_registry::{TargetRecord, TargetsRecord};
    use chatfetch_stub::{MemoryFileStore, MemorySettings, StubClient};

    use crate::SharedLimits;

    fn message(chat: i64, id: i64, unique: &str) -> MediaMessage {
        MediaMessage {
            chat_id: chat,
            message_id: id,
            file_id: id as i32,
            unique_id: unique.to_string(),
            kind: FileKind::Photo,
            size: 512,
        }
    }

    fn event(account: i64, chat: i64, id: i64) -> NewMessageEvent {
        NewMessageEvent {
            account_id: account,
            chat_id: chat,
            message_id: id,
        }
    }

    async fn tracked_registry(client: &StubClient) -> Arc<TargetRegistry> {
        let registry = Arc::new(TargetRegistry::new());
        let mut desired = TargetsRecord::default();
        desired.upsert(TargetRecord {
            account_id: 1,
            chat_id: 10,
            rule: None,
            next_kind: None,
            next_cursor: 0,
            history_complete: false,
        });
        registry.reconcile(&desired, client).await;
        registry
    }

    fn spawn_queue(soft_cap: usize) -> QueueHandle {
        let (mut coordinator, queue) = QueueCoordinator::new(soft_cap);
        tokio::spawn(async move { coordinator.run().await });
        queue
    }

    #[tokio::test]
    async fn tracked_message_is_force_enqueued_past_the_cap() {
        let client = StubClient::new();
        client.authorize(1);
        let registry = tracked_registry(&client).await;
        // Zero cap: only the forced path can admit anything.
        let queue = spawn_queue(0);
        client.insert_message(message(10, 5, "live"));

        handle_new_message(event(1, 10, 5), &registry, &client, &queue).await;
        assert_eq!(queue.queued_len(1).await.expect("len"), 1);
    }

    #[tokio::test]
    async fn untracked_conversation_is_dropped() {
        let client = StubClient::new();
        client.authorize(1);
        let registry = tracked_registry(&client).await;
        let queue = spawn_queue(30);
        client.insert_message(message(20, 5, "live"));

        handle_new_message(event(1, 20, 5), &registry, &client, &queue).await;
        assert_eq!(queue.queued_len(1).await.expect("len"), 0);
    }

    #[tokio::test]
    async fn unauthorized_account_is_dropped() {
        let client = StubClient::new();
        client.authorize(1);
        let registry = tracked_registry(&client).await;
        client.deauthorize(1);
        let queue = spawn_queue(30);
        client.insert_message(message(10, 5, "live"));

        handle_new_message(event(1, 10, 5), &registry, &client, &queue).await;
        assert_eq!(queue.queued_len(1).await.expect("len"), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_dropped_without_retry() {
        let client = StubClient::new();
        client.authorize(1);
        let registry = tracked_registry(&client).await;
        let queue = spawn_queue(30);
        client.fail_get_message(true);

        handle_new_message(event(1, 10, 5), &registry, &client, &queue).await;
        assert_eq!(queue.queued_len(1).await.expect("len"), 0);
    }

    #[tokio::test]
    async fn duplicate_live_message_does_not_queue_twice() {
        let client = StubClient::new();
        client.authorize(1);
        let registry = tracked_registry(&client).await;
        let queue = spawn_queue(30);
        client.insert_message(message(10, 5, "live"));

        handle_new_message(event(1, 10, 5), &registry, &client, &queue).await;
        handle_new_message(event(1, 10, 5), &registry, &client, &queue).await;
        assert_eq!(queue.queued_len(1).await.expect("len"), 1);
    }

    #[tokio::test]
    async fn ingest_loop_processes_events_until_shutdown() {
        let client = StubClient::new();
        client.authorize(1);
        let registry = tracked_registry(&client).await;
        let queue = spawn_queue(30);
        client.insert_message(message(10, 5, "live"));

        let deps = ServiceDeps {
            registry: registry.clone(),
            queue: queue.clone(),
            client: Arc::new(client.clone()),
            files: Arc::new(MemoryFileStore::new()),
            settings: Arc::new(MemorySettings::new()),
            limits: Arc::new(SharedLimits::new(5, None)),
        };
        let (events_tx, events_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(run_live_ingest(events_rx, deps, shutdown_rx));

        events_tx.send(event(1, 10, 5)).await.expect("send");
        tokio::task::yield_now().await;
        let _ = shutdown_tx.send(());
        task.await.expect("join");

        assert_eq!(queue.queued_len(1).await.expect("len"), 1);
    }
}
