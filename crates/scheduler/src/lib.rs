//! Scheduler
//!
//! Drives the pipeline: a periodic scan → analysis → decision → execution
//! cycle and a monitor loop feeding live prices to the risk engines.

pub mod cycle;
pub mod events;
pub mod monitor;
pub mod notifier;
pub mod orchestrator;

#[cfg(test)]
mod testing;

pub use cycle::{rank, CycleReport, Pipeline, Providers};
pub use events::{channels, EventBus, PipelineEvent, RedisForwarder};
pub use monitor::{run_monitor, MonitorReport};
pub use notifier::WebhookNotifier;
pub use orchestrator::{Scheduler, SchedulerError, SchedulerState};
