//! What the engine tells the host about fragments

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::RenderFailure;
use crate::fragment::Fragment;
use crate::render::OutputKind;

/// File format of a displayed artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Svg,
    Png,
    /// A user image shown as-is (jpg, gif, ...)
    Image,
}

impl From<OutputKind> for ArtifactKind {
    fn from(kind: OutputKind) -> Self {
        match kind {
            OutputKind::Svg => ArtifactKind::Svg,
            OutputKind::Png => ArtifactKind::Png,
        }
    }
}

/// A displayable image for a fragment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    /// View scale the host should display at
    pub scale: f32,
    /// Pixel size, when the file header could be read
    pub dimensions: Option<(usize, usize)>,
}

impl Artifact {
    /// Describe the file at `path`, reading its dimensions from the header
    #[must_use]
    pub fn from_path(path: &Path, kind: ArtifactKind, scale: f32) -> Self {
        let dimensions = match imagesize::size(path) {
            Ok(size) => Some((size.width, size.height)),
            Err(e) => {
                debug!("No dimensions for {path:?}: {e}");
                None
            }
        };

        Self {
            path: path.to_path_buf(),
            kind,
            scale,
            dimensions,
        }
    }

    /// Like [`Artifact::from_path`], guessing the kind from the extension
    #[must_use]
    pub fn detect(path: &Path, scale: f32) -> Self {
        Self::from_path(path, kind_of(path), scale)
    }

    /// Describe an artifact whose bytes are already in memory
    #[must_use]
    pub fn from_bytes(path: &Path, bytes: &[u8], scale: f32) -> Self {
        let dimensions = imagesize::blob_size(bytes)
            .map(|size| (size.width, size.height))
            .ok();

        Self {
            path: path.to_path_buf(),
            kind: kind_of(path),
            scale,
            dimensions,
        }
    }

    /// Displayed size after applying the view scale
    #[must_use]
    pub fn scaled_dimensions(&self) -> Option<(usize, usize)> {
        self.dimensions.map(|(w, h)| {
            (
                (w as f32 * self.scale).round() as usize,
                (h as f32 * self.scale).round() as usize,
            )
        })
    }
}

fn kind_of(path: &Path) -> ArtifactKind {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(OutputKind::from_extension)
        .map_or(ArtifactKind::Image, ArtifactKind::from)
}

/// Sink for fragment display changes; implemented by the host UI
pub trait RenderEvents {
    fn show_waiting(&mut self, fragment: &Fragment);
    fn show_rendered(&mut self, fragment: &Fragment, artifact: &Artifact);
    fn show_error(&mut self, fragment: &Fragment, failure: &RenderFailure);

    /// Remove whatever is displayed over the fragment
    fn clear(&mut self, _fragment: &Fragment) {}
}

/// Reports display changes to the log; used by the CLI
#[derive(Debug, Default)]
pub struct LogEvents;

impl RenderEvents for LogEvents {
    fn show_waiting(&mut self, fragment: &Fragment) {
        debug!("{} at {}: waiting", fragment.kind, fragment.begin);
    }

    fn show_rendered(&mut self, fragment: &Fragment, artifact: &Artifact) {
        info!(
            "{} at {}: rendered {:?}",
            fragment.kind, fragment.begin, artifact.path
        );
    }

    fn show_error(&mut self, fragment: &Fragment, failure: &RenderFailure) {
        warn!(
            "{} at {}: {} ({})",
            fragment.kind, fragment.begin, failure.description, failure.command
        );
        if !failure.output.is_empty() {
            debug!("Render output:\n{}", failure.output);
        }
    }

    fn clear(&mut self, fragment: &Fragment) {
        debug!("{} at {}: cleared", fragment.kind, fragment.begin);
    }
}
