//! Step lifecycle events.
//!
//! Every step execution appends a start and a finish event to a run-level
//! sink. The sink is passed explicitly into each execution; there is no
//! global event log.

mod reader;
mod record;
mod sink;

pub use reader::{
    events_for_run, list_runs, read_events, step_summaries, EventFollower, RunSummary,
    StepProgress, StepSummary,
};
pub use record::{EventStatus, LifecycleEvent};
pub use sink::{
    CollectingEventSink, EventSink, JsonlEventLog, LoggingEventSink, NoOpEventSink,
    EVENTS_FILE_NAME,
};
