mod records;
mod registry;

pub use crate::records::{RuleRecord, TargetRecord, TargetsRecord};
pub use crate::registry::{RemovalListener, Target, TargetKey, TargetRegistry, TargetRule};
