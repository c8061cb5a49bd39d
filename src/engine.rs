//! Render engine - one document session

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{ConfigError, RenderFailure};
use crate::events::{Artifact, ArtifactKind, RenderEvents};
use crate::fragment::{Fragment, FragmentKey};
use crate::render::{
    ArtifactCache, ColorPair, Command, Completion, DEFAULT_MAX_CONCURRENT, Effect, Fingerprint,
    FragmentState, FragmentStates, OutputKind, RenderJob, RenderScheduler, Renderer, StaticConfig,
    TaskOutcome, fingerprint,
};

/// View scale factor applied per enlarge/shrink step
pub const DEFAULT_ZOOM_STEP: f32 = 1.2;
const MIN_SCALE: f32 = 0.1;
const MAX_SCALE: f32 = 10.0;
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Everything needed to start a session
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_dir: PathBuf,
    pub max_concurrent: usize,
    pub output_kind: OutputKind,
    pub colors: ColorPair,
    pub static_config: StaticConfig,
    /// Base for relative image paths; the working directory when unset
    pub document_dir: Option<PathBuf>,
    pub zoom_step: f32,
}

impl EngineConfig {
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            output_kind: OutputKind::default(),
            colors: ColorPair::default(),
            static_config: StaticConfig::default(),
            document_dir: None,
            zoom_step: DEFAULT_ZOOM_STEP,
        }
    }
}

/// What a typeset fragment was last rendered from
#[derive(Debug, Clone)]
struct RenderSource {
    text: String,
    fingerprint: Fingerprint,
}

/// Owns the cache, scheduler and fragment states for one document.
///
/// All methods run on the host thread. Rendering is asynchronous: call
/// [`RenderEngine::poll`] (or [`RenderEngine::run_until_idle`]) to apply
/// finished renders and emit their events.
pub struct RenderEngine {
    config: EngineConfig,
    cache: ArtifactCache,
    scheduler: RenderScheduler,
    states: FragmentStates,
    events: Box<dyn RenderEvents>,
    fragments: HashMap<FragmentKey, Fragment>,
    sources: HashMap<FragmentKey, RenderSource>,
    scale: f32,
    tasks_started: usize,
}

impl RenderEngine {
    /// Start a session. Fails if the cache directory cannot be created.
    pub fn activate(
        config: EngineConfig,
        renderer: Arc<dyn Renderer>,
        events: Box<dyn RenderEvents>,
    ) -> Result<Self, ConfigError> {
        if !(config.zoom_step.is_finite() && config.zoom_step > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "zoom step must be positive, got {}",
                config.zoom_step
            )));
        }

        let cache = ArtifactCache::open(&config.cache_dir)?;
        let scheduler = RenderScheduler::new(renderer, config.max_concurrent);
        info!(
            "Render engine active: cache {:?}, up to {} concurrent renders, {} output",
            config.cache_dir,
            scheduler.max_concurrent(),
            config.output_kind
        );

        Ok(Self {
            config,
            cache,
            scheduler,
            states: FragmentStates::new(),
            events,
            fragments: HashMap::new(),
            sources: HashMap::new(),
            scale: 1.0,
            tasks_started: 0,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ArtifactCache {
        &mut self.cache
    }

    #[must_use]
    pub fn state_of(&self, key: FragmentKey) -> FragmentState {
        self.states.get(key)
    }

    #[must_use]
    pub fn states(&self) -> &FragmentStates {
        &self.states
    }

    /// Render tasks submitted since activation
    #[must_use]
    pub fn tasks_started(&self) -> usize {
        self.tasks_started
    }

    /// Tasks whose outcome has not been applied yet
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Multiply the view scale, clamped to a sane range
    pub fn adjust_scale(&mut self, factor: f32) -> f32 {
        self.scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        self.scale
    }

    /// Colors for renders from now on; existing artifacts are untouched
    pub fn set_colors(&mut self, colors: ColorPair) {
        if self.config.colors != colors {
            debug!("Colors changed to {colors:?}");
            self.config.colors = colors;
        }
    }

    #[must_use]
    pub fn fingerprint_for(&self, source: &str) -> Fingerprint {
        fingerprint(
            source,
            self.config.output_kind,
            &self.config.colors,
            &self.config.static_config,
        )
    }

    /// Cache path of the artifact `source` would render to
    #[must_use]
    pub fn artifact_path(&self, source: &str) -> PathBuf {
        self.cache.path_for(&self.fingerprint_for(source), self.config.output_kind)
    }

    /// Bytes of the fragment's displayed artifact.
    ///
    /// Cached artifacts are read through the cache's memo, so hosts that
    /// redraw often do not hit the disk each time.
    pub fn artifact_bytes(&mut self, key: FragmentKey) -> Option<Arc<Vec<u8>>> {
        let FragmentState::Rendered { artifact } = self.states.get(key) else {
            return None;
        };
        if artifact.starts_with(self.cache.dir()) {
            return self.cache.load_path(&artifact);
        }
        match fs::read(&artifact) {
            Ok(bytes) => Some(Arc::new(bytes)),
            Err(e) => {
                warn!("Failed to read {artifact:?}: {e}");
                None
            }
        }
    }

    /// Render a math fragment from its raw text
    pub fn render(&mut self, fragment: &Fragment) {
        self.render_source(fragment, &fragment.source);
    }

    /// Render a fragment from the given LaTeX instead of its raw text
    pub fn render_source(&mut self, fragment: &Fragment, source: &str) {
        if !fragment.is_renderable() {
            debug!("Skipping empty {} at {}", fragment.kind, fragment.begin);
            return;
        }

        let key = fragment.key();
        self.fragments.insert(key, fragment.clone());

        // An in-flight task keeps the source it was submitted with
        if self.states.is_waiting(key) {
            return;
        }

        let fingerprint = self.fingerprint_for(source);
        let cached = self
            .cache
            .contains(&fingerprint, self.config.output_kind)
            .then(|| self.cache.path_for(&fingerprint, self.config.output_kind));
        self.sources.insert(
            key,
            RenderSource {
                text: source.to_string(),
                fingerprint,
            },
        );

        let effects = self.states.apply(Command::RequestRender { key, cached });
        self.execute_effects(effects);
    }

    /// Display an existing image file, with no external process
    pub fn show_image(&mut self, fragment: &Fragment, path: &Path) {
        let key = fragment.key();
        self.fragments.insert(key, fragment.clone());
        if !matches!(self.states.get(key), FragmentState::Unrendered) {
            return;
        }

        let effects = if path.is_file() {
            self.states.apply(Command::RequestRender {
                key,
                cached: Some(path.to_path_buf()),
            })
        } else {
            self.states.apply(Command::Fail {
                key,
                failure: RenderFailure::new(
                    "",
                    format!("image not found: {}", path.display()),
                    "",
                ),
            })
        };
        self.execute_effects(effects);
    }

    /// Resolve an image reference against the document directory
    #[must_use]
    pub fn resolve_image(&self, target: &str) -> PathBuf {
        let target = target.trim();
        let path = match target.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map_or_else(|| PathBuf::from(target), |h| h.join(rest)),
            None => PathBuf::from(target),
        };
        if path.is_absolute() {
            return path;
        }
        match &self.config.document_dir {
            Some(dir) => dir.join(path),
            None => path,
        }
    }

    /// Show the fragment's source again
    pub fn reveal(&mut self, fragment: &Fragment) {
        let key = fragment.key();
        self.fragments.insert(key, fragment.clone());
        let effects = self.states.apply(Command::Reveal { key });
        self.execute_effects(effects);
        self.forget_if_unrendered(key);
    }

    /// Invalidate the fragment's artifact and render it again
    pub fn regenerate(&mut self, fragment: &Fragment) {
        self.regenerate_source(fragment, &fragment.source);
    }

    pub fn regenerate_source(&mut self, fragment: &Fragment, source: &str) {
        if !fragment.is_renderable() {
            return;
        }

        let key = fragment.key();
        self.fragments.insert(key, fragment.clone());
        let fingerprint = self.fingerprint_for(source);
        self.sources.insert(
            key,
            RenderSource {
                text: source.to_string(),
                fingerprint,
            },
        );

        let effects = self.states.apply(Command::Regenerate { key });
        self.execute_effects(effects);
    }

    /// Re-emit a displayed artifact at `factor` times the current view scale
    pub fn rescale(&mut self, fragment: &Fragment, factor: f32) {
        let key = fragment.key();
        if let FragmentState::Rendered { artifact } = self.states.get(key) {
            let scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
            let artifact = self.describe(fragment, &artifact, scale);
            self.events.show_rendered(fragment, &artifact);
        }
    }

    /// Cancel every render that has not started; returns how many
    pub fn cancel_waiting(&mut self) -> usize {
        let cancelled = self.scheduler.cancel_waiting();
        for (_, key) in &cancelled {
            let effects = self.states.apply(Command::TaskCancelled { key: *key });
            self.execute_effects(effects);
            self.forget_if_unrendered(*key);
        }
        if !cancelled.is_empty() {
            info!("Cancelled {} waiting renders", cancelled.len());
        }
        cancelled.len()
    }

    /// Apply finished renders without blocking; returns how many were applied
    pub fn poll(&mut self) -> usize {
        let completions = self.scheduler.poll();
        self.complete_all(completions)
    }

    /// Poll until nothing is in flight or `timeout` elapses.
    ///
    /// Returns whether the engine went idle.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let completions = self.scheduler.poll();
            self.complete_all(completions);
            if self.scheduler.is_idle() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let completions = self.scheduler.wait(remaining.min(POLL_SLICE));
            self.complete_all(completions);
        }
    }

    fn complete_all(&mut self, completions: Vec<Completion>) -> usize {
        let count = completions.len();
        for completion in completions {
            self.complete(completion);
        }
        count
    }

    fn complete(&mut self, completion: Completion) {
        let Completion {
            id,
            key,
            fragment,
            outcome,
        } = completion;
        if let Some(fragment) = fragment {
            self.fragments.entry(key).or_insert(fragment);
        }

        let command = match outcome {
            TaskOutcome::Rendered(artifact) => Command::TaskSucceeded {
                key,
                task: id,
                artifact,
            },
            TaskOutcome::Failed(failure) => Command::TaskFailed {
                key,
                task: id,
                failure,
            },
            TaskOutcome::Cancelled => Command::TaskCancelled { key },
        };
        let cancelled = matches!(command, Command::TaskCancelled { .. });
        let effects = self.states.apply(command);
        self.execute_effects(effects);
        if cancelled {
            self.forget_if_unrendered(key);
        }
    }

    /// Drop what was kept for a fragment that shows its source again
    fn forget_if_unrendered(&mut self, key: FragmentKey) {
        if matches!(self.states.get(key), FragmentState::Unrendered) {
            self.fragments.remove(&key);
            self.sources.remove(&key);
        }
    }

    fn describe(&mut self, fragment: &Fragment, path: &Path, scale: f32) -> Artifact {
        if !fragment.kind.is_typeset() {
            return Artifact::from_path(path, ArtifactKind::Image, scale);
        }
        match self.cache.load_path(path) {
            Some(bytes) => Artifact::from_bytes(path, &bytes, scale),
            None => Artifact::detect(path, scale),
        }
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ShowWaiting(key) => {
                    if let Some(fragment) = self.fragments.get(&key) {
                        self.events.show_waiting(fragment);
                    }
                }

                Effect::ShowRendered { key, artifact } => {
                    if let Some(fragment) = self.fragments.get(&key).cloned() {
                        let artifact = self.describe(&fragment, &artifact, self.scale);
                        self.events.show_rendered(&fragment, &artifact);
                    }
                }

                Effect::ShowError { key, failure } => {
                    if let Some(fragment) = self.fragments.get(&key) {
                        self.events.show_error(fragment, &failure);
                    }
                }

                Effect::Clear(key) => {
                    if let Some(fragment) = self.fragments.get(&key) {
                        self.events.clear(fragment);
                    }
                }

                Effect::Submit(key) => self.submit(key),

                Effect::Invalidate(key) => {
                    let Some(source) = self.sources.get(&key) else {
                        continue;
                    };
                    if let Err(e) = self
                        .cache
                        .invalidate(&source.fingerprint, self.config.output_kind)
                    {
                        warn!("Failed to invalidate artifact for {key:?}: {e}");
                    }
                }

                Effect::Render(key) => {
                    let fragment = self.fragments.get(&key).cloned();
                    let source = self.sources.get(&key).map(|s| s.text.clone());
                    if let (Some(fragment), Some(source)) = (fragment, source) {
                        self.render_source(&fragment, &source);
                    }
                }
            }
        }
    }

    fn submit(&mut self, key: FragmentKey) {
        let Some(source) = self.sources.get(&key) else {
            warn!("No source recorded for {key:?}; not submitting");
            return;
        };

        let kind = self.config.output_kind;
        let job = RenderJob::new(
            key,
            source.text.clone(),
            kind,
            self.config.colors.clone(),
            source.fingerprint.clone(),
            self.cache.path_for(&source.fingerprint, kind),
        );
        let fragment = self.fragments.get(&key).cloned();

        let task = self.scheduler.submit(job, fragment, None);
        self.tasks_started += 1;
        let effects = self.states.apply(Command::Submitted { key, task });
        self.execute_effects(effects);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentKind;
    use crate::test_utils::{EventRecord, FakeRenderer, RecordingEvents};

    const IDLE: Duration = Duration::from_secs(10);

    fn engine(dir: &Path, renderer: Arc<FakeRenderer>) -> (RenderEngine, RecordingEvents) {
        let events = RecordingEvents::default();
        let engine = RenderEngine::activate(
            EngineConfig::new(dir.join("cache")),
            renderer,
            Box::new(events.clone()),
        )
        .unwrap();
        (engine, events)
    }

    fn inline(document: &str, begin: usize, end: usize) -> Fragment {
        Fragment::new(document, FragmentKind::InlineMath, begin..end, begin + 1..end - 1).unwrap()
    }

    #[test]
    fn activation_fails_on_unusable_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let result = RenderEngine::activate(
            EngineConfig::new(blocker.join("cache")),
            Arc::new(FakeRenderer::new()),
            Box::new(RecordingEvents::default()),
        );
        assert!(matches!(result, Err(ConfigError::CacheDir { .. })));
    }

    #[test]
    fn miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::new());
        let (mut engine, events) = engine(dir.path(), renderer.clone());
        let doc = "a $x^2$ b";
        let frag = inline(doc, 2, 7);

        engine.render(&frag);
        assert!(engine.state_of(frag.key()).is_waiting());
        assert!(engine.run_until_idle(IDLE));
        assert_eq!(renderer.calls(), 1);
        assert!(matches!(engine.state_of(frag.key()), FragmentState::Rendered { .. }));
        assert_eq!(
            events.records(),
            vec![
                EventRecord::Waiting(2),
                EventRecord::Rendered(2, engine.artifact_path("$x^2$"))
            ]
        );

        engine.reveal(&frag);
        engine.render(&frag);
        assert!(matches!(engine.state_of(frag.key()), FragmentState::Rendered { .. }));
        assert_eq!(renderer.calls(), 1);
        assert_eq!(engine.tasks_started(), 1);
    }

    #[test]
    fn empty_content_is_never_submitted() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::new());
        let (mut engine, events) = engine(dir.path(), renderer.clone());
        let doc = "$ $";
        let frag = Fragment::new(doc, FragmentKind::InlineMath, 0..3, 1..2).unwrap();

        engine.render(&frag);
        assert_eq!(engine.state_of(frag.key()), FragmentState::Unrendered);
        assert!(events.records().is_empty());
        assert_eq!(engine.tasks_started(), 0);
    }

    #[test]
    fn failure_reaches_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::new().fail_on("\\undefined"));
        let (mut engine, events) = engine(dir.path(), renderer);
        let doc = "$\\undefined$";
        let frag = inline(doc, 0, doc.len());

        engine.render(&frag);
        assert!(engine.run_until_idle(IDLE));
        match engine.state_of(frag.key()) {
            FragmentState::Error { failure } => assert!(failure.output.contains("\\undefined")),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(matches!(events.records().last(), Some(EventRecord::Error(0, _))));
    }

    #[test]
    fn regenerate_replaces_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::new());
        let (mut engine, _events) = engine(dir.path(), renderer.clone());
        let doc = "$y$";
        let frag = inline(doc, 0, 3);

        engine.render(&frag);
        assert!(engine.run_until_idle(IDLE));
        let path = engine.artifact_path("$y$");
        fs::write(&path, "stale").unwrap();

        engine.regenerate(&frag);
        assert!(engine.state_of(frag.key()).is_waiting());
        assert!(engine.run_until_idle(IDLE));
        assert_eq!(renderer.calls(), 2);
        assert_ne!(fs::read_to_string(&path).unwrap(), "stale");
    }

    #[test]
    fn regenerate_after_the_file_is_written_keeps_the_new_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::new());
        let (mut engine, _events) = engine(dir.path(), renderer.clone());
        let doc = "$x^2$";
        let frag = inline(doc, 0, doc.len());
        let path = engine.artifact_path(doc);

        engine.render(&frag);
        let deadline = Instant::now() + IDLE;
        while !path.exists() {
            assert!(Instant::now() < deadline, "artifact never written");
            std::thread::sleep(Duration::from_millis(1));
        }

        // The result is not applied yet, so the fragment is still waiting
        engine.regenerate(&frag);
        assert_eq!(engine.in_flight(), 1);
        assert!(engine.run_until_idle(IDLE));

        assert_eq!(
            engine.state_of(frag.key()),
            FragmentState::Rendered {
                artifact: path.clone()
            }
        );
        assert!(path.is_file());
        assert_eq!(renderer.calls(), 2);
        assert_eq!(engine.tasks_started(), 2);
    }

    #[test]
    fn artifact_bytes_are_served_from_the_memo() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::new());
        let (mut engine, _events) = engine(dir.path(), renderer.clone());
        let doc = "$x^2$";
        let frag = inline(doc, 0, doc.len());

        assert!(engine.artifact_bytes(frag.key()).is_none());
        engine.render(&frag);
        assert!(engine.run_until_idle(IDLE));

        let bytes = engine.artifact_bytes(frag.key()).unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("<svg"));

        let path = engine.artifact_path(doc);
        fs::write(&path, "stale").unwrap();
        assert_eq!(engine.artifact_bytes(frag.key()).unwrap(), bytes);

        engine.regenerate(&frag);
        assert!(engine.run_until_idle(IDLE));
        let fresh = engine.artifact_bytes(frag.key()).unwrap();
        assert!(String::from_utf8_lossy(&fresh).contains("x^2"));
        assert_eq!(fs::read(&path).unwrap(), *fresh);
    }

    #[test]
    fn image_bytes_are_read_from_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _events) = engine(dir.path(), Arc::new(FakeRenderer::new()));
        let image = dir.path().join("fig.png");
        fs::write(&image, b"not really a png").unwrap();
        let doc = "![x](fig.png)";
        let frag = Fragment::new(doc, FragmentKind::Image, 0..doc.len(), 5..12).unwrap();

        engine.show_image(&frag, &image);
        assert_eq!(
            engine.artifact_bytes(frag.key()).unwrap().as_slice(),
            b"not really a png"
        );
    }

    #[test]
    fn revealed_fragments_are_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _events) = engine(dir.path(), Arc::new(FakeRenderer::new()));
        let doc = "$a$ $b$";
        let a = inline(doc, 0, 3);
        let b = inline(doc, 4, 7);

        engine.render(&a);
        engine.render(&b);
        assert!(engine.run_until_idle(IDLE));
        assert_eq!(engine.fragments.len(), 2);

        engine.reveal(&a);
        assert!(!engine.fragments.contains_key(&a.key()));
        assert!(!engine.sources.contains_key(&a.key()));
        engine.reveal(&b);
        assert!(engine.fragments.is_empty());
        assert!(engine.sources.is_empty());
    }

    #[test]
    fn cancelled_fragments_are_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::new());
        let mut config = EngineConfig::new(dir.path().join("cache"));
        config.max_concurrent = 1;
        let mut engine = RenderEngine::activate(
            config,
            renderer.clone(),
            Box::new(RecordingEvents::default()),
        )
        .unwrap();
        let doc = "$a$ $b$ $c$";

        renderer.hold();
        for begin in [0, 4, 8] {
            engine.render(&inline(doc, begin, begin + 3));
        }
        let deadline = Instant::now() + IDLE;
        while renderer.active() < 1 {
            assert!(Instant::now() < deadline, "renderer never became busy");
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(engine.cancel_waiting(), 2);
        assert_eq!(engine.fragments.len(), 1);
        assert!(engine.sources.contains_key(&FragmentKey(0)));

        renderer.release();
        assert!(engine.run_until_idle(IDLE));
        assert!(matches!(engine.state_of(FragmentKey(0)), FragmentState::Rendered { .. }));
    }

    #[test]
    fn missing_image_is_an_error_without_a_task() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::new());
        let (mut engine, _events) = engine(dir.path(), renderer.clone());
        let doc = "![x](nope.png)";
        let frag = Fragment::new(doc, FragmentKind::Image, 0..doc.len(), 5..13).unwrap();

        engine.show_image(&frag, &dir.path().join("nope.png"));
        assert!(matches!(engine.state_of(frag.key()), FragmentState::Error { .. }));
        assert_eq!(engine.tasks_started(), 0);
        assert_eq!(renderer.calls(), 0);
    }

    #[test]
    fn resolve_image_uses_document_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::new(dir.path().join("cache"));
        config.document_dir = Some(PathBuf::from("/docs"));
        let engine = RenderEngine::activate(
            config,
            Arc::new(FakeRenderer::new()),
            Box::new(RecordingEvents::default()),
        )
        .unwrap();

        assert_eq!(engine.resolve_image("img/a.png"), PathBuf::from("/docs/img/a.png"));
        assert_eq!(engine.resolve_image("/abs/a.png"), PathBuf::from("/abs/a.png"));
    }

    #[test]
    fn scale_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _events) = engine(dir.path(), Arc::new(FakeRenderer::new()));
        for _ in 0..100 {
            engine.adjust_scale(2.0);
        }
        assert_eq!(engine.scale(), MAX_SCALE);
        for _ in 0..100 {
            engine.adjust_scale(0.5);
        }
        assert_eq!(engine.scale(), MIN_SCALE);
    }
}
