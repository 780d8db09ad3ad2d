//! Broadcasting of job progress for live observers.

pub mod job_progress;

pub use job_progress::{
    JobCounters, JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker,
};
