mod base;
mod iggy_sink;

pub use base::{EventBus, EventEmitter, RunnerLogEvent, RuntimeEvent};
pub use iggy_sink::{IggyHistoryConfig, IggyHistoryError, IggyHistorySink, IggyHistorySubscription};
