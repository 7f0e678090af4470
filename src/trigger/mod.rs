//! Run activation surfaces.
//!
//! All three share the pipeline's execution lock:
//!
//! - [`ManualTrigger`]: operator request, optionally forcing out the holder
//! - [`MarkerWatcher`]: launches a run when the shared trigger marker advances
//! - [`IntervalScheduler`]: launches a run on a fixed interval

mod manual;
mod scheduler;
mod watcher;

pub use manual::{ManualTrigger, TriggerResponse};
pub use scheduler::IntervalScheduler;
pub use watcher::{MarkerPoll, MarkerWatcher};

use tracing::{debug, warn};

use crate::coordinator::CoordinatorError;
use crate::pipeline::PipelineError;

/// Log a launch refused by the lock; other failures are warnings.
fn log_refused(source: &'static str, error: &PipelineError) {
    match error {
        PipelineError::Coordinator(CoordinatorError::AlreadyRunning { execution_id, owner, .. }) => {
            debug!(source, execution_id = %execution_id, owner = ?owner, "Run already in progress, skipping");
        }
        other => warn!(source, error = %other, "Could not launch run"),
    }
}
