use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("waiting queue is shutting down")]
    Shutdown,
}
