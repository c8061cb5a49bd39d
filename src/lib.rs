// Export modules for the binary and for tests
pub mod apply;
pub mod engine;
pub mod error;
pub mod events;
pub mod fragment;
pub mod panic_handler;
pub mod parsers;
pub mod paths;
pub mod render;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the host-facing surface
pub use apply::{ApplySummary, Applier, HandlerRegistry, Operation};
pub use engine::{EngineConfig, RenderEngine};
pub use error::{CacheError, ConfigError, ParseError, RenderFailure};
pub use events::{Artifact, ArtifactKind, LogEvents, RenderEvents};
pub use fragment::{Fragment, FragmentKey, FragmentKind};
pub use parsers::{FragmentParser, ParserRegistry};
pub use settings::Settings;
