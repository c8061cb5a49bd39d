//! Render job and response types

use std::path::PathBuf;

use super::fingerprint::{ColorPair, Fingerprint, OutputKind};
use crate::error::RenderFailure;
use crate::fragment::{Fragment, FragmentKey};

/// Unique identifier for submitted render tasks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Everything a worker needs to produce one artifact
#[derive(Clone, Debug)]
pub struct RenderJob {
    pub id: TaskId,
    /// Fragment the artifact belongs to
    pub key: FragmentKey,
    /// Text handed to the renderer
    pub source: String,
    pub kind: OutputKind,
    pub colors: ColorPair,
    pub fingerprint: Fingerprint,
    /// Cache path the renderer must create
    pub output: PathBuf,
}

impl RenderJob {
    /// The id is assigned by the scheduler on submit
    #[must_use]
    pub fn new(
        key: FragmentKey,
        source: impl Into<String>,
        kind: OutputKind,
        colors: ColorPair,
        fingerprint: Fingerprint,
        output: PathBuf,
    ) -> Self {
        Self {
            id: TaskId::new(0),
            key,
            source: source.into(),
            kind,
            colors,
            fingerprint,
            output,
        }
    }
}

/// Request sent to render workers
#[derive(Debug)]
pub enum RenderRequest {
    /// Render a job queued under the given cancellation generation
    Render { job: RenderJob, generation: u64 },

    /// Shutdown the worker
    Shutdown,
}

/// Response from render workers
#[derive(Debug)]
pub enum RenderResponse {
    /// A worker picked up the job and is running the renderer
    Started(TaskId),

    /// The renderer returned
    Finished {
        id: TaskId,
        result: Result<PathBuf, RenderFailure>,
    },

    /// Job was cancelled before it started
    Cancelled(TaskId),
}

/// How a task ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Rendered(PathBuf),
    Failed(RenderFailure),
    Cancelled,
}

/// A finished task as seen by the host thread
#[derive(Clone, Debug)]
pub struct Completion {
    pub id: TaskId,
    pub key: FragmentKey,
    /// The fragment the task was submitted for, when the submitter provided it
    pub fragment: Option<Fragment>,
    pub outcome: TaskOutcome,
}
