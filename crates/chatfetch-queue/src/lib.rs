mod command;
mod coordinator;
mod error;

pub use crate::command::QueueCommand;
pub use crate::coordinator::{QueueCoordinator, QueueHandle};
pub use crate::error::QueueError;
