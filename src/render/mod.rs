//! Render infrastructure: content addressing, artifact cache, worker pool

pub mod cache;
pub mod fingerprint;
pub mod renderer;
mod request;
pub mod scheduler;
pub mod state;
mod worker;

pub use cache::{ArtifactCache, CacheEntry};
pub use fingerprint::{ColorPair, Fingerprint, OutputKind, StaticConfig, fingerprint};
pub use renderer::{CommandRenderer, Renderer};
pub use request::{Completion, RenderJob, RenderRequest, RenderResponse, TaskId, TaskOutcome};
pub use scheduler::{Continuation, RenderScheduler};
pub use state::{Command, Effect, FragmentState, FragmentStates};

/// Concurrent external renders allowed by default
pub const DEFAULT_MAX_CONCURRENT: usize = 30;
