mod processor;
mod registry;
mod stats;

pub use processor::{EmailPage, InboxProcessor, ProcessorProgress};
pub use registry::ProcessorRegistry;
pub use stats::{SenderSummary, StatsSnapshot};
