use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use texpane::apply::{Applier, Operation};
use texpane::engine::{EngineConfig, RenderEngine};
use texpane::fragment::FragmentKey;
use texpane::render::{ColorPair, FragmentState};
use texpane::settings::Settings;
use texpane::test_utils::{EventRecord, FakeRenderer, RecordingEvents};

const IDLE: Duration = Duration::from_secs(10);

fn session(
    cache_dir: &Path,
    renderer: Arc<FakeRenderer>,
    configure: impl FnOnce(&mut EngineConfig),
) -> (RenderEngine, RecordingEvents) {
    let mut config = EngineConfig::new(cache_dir);
    configure(&mut config);
    let events = RecordingEvents::default();
    let engine = RenderEngine::activate(config, renderer, Box::new(events.clone())).unwrap();
    (engine, events)
}

fn wait_for_active(renderer: &FakeRenderer, count: usize) {
    let deadline = Instant::now() + IDLE;
    while renderer.active() < count {
        assert!(Instant::now() < deadline, "renderer never became busy");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn is_rendered(engine: &RenderEngine, begin: usize) -> bool {
    matches!(
        engine.state_of(FragmentKey(begin)),
        FragmentState::Rendered { .. }
    )
}

#[test]
fn cached_artifact_is_reused_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let doc = "Energy: $E = mc^2$.";
    let renderer = Arc::new(FakeRenderer::new());

    {
        let (mut engine, _events) = session(&cache, renderer.clone(), |_| {});
        let mut applier = Applier::with_defaults();
        let summary = applier.apply(&mut engine, doc, &[Operation::Render], None);
        assert_eq!(summary.tasks_started, 1);
        assert!(engine.run_until_idle(IDLE));
    }

    let (mut engine, events) = session(&cache, renderer.clone(), |_| {});
    let mut applier = Applier::with_defaults();
    let summary = applier.apply(&mut engine, doc, &[Operation::Render], None);

    assert_eq!(summary.tasks_started, 0);
    assert_eq!(renderer.calls(), 1);
    assert_eq!(
        events.records(),
        vec![EventRecord::Rendered(8, engine.artifact_path("$E = mc^2$"))]
    );
}

#[test]
fn swapped_colors_render_a_distinct_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let doc = "$x^2$";
    let renderer = Arc::new(FakeRenderer::new());

    let black_on_white = {
        let (mut engine, _events) = session(&cache, renderer.clone(), |config| {
            config.colors = ColorPair::new("black", "white");
        });
        Applier::with_defaults().apply(&mut engine, doc, &[Operation::Render], None);
        assert!(engine.run_until_idle(IDLE));
        engine.artifact_path(doc)
    };
    assert!(black_on_white.is_file());

    let (mut engine, events) = session(&cache, renderer.clone(), |config| {
        config.colors = ColorPair::new("black", "white");
    });
    let mut applier = Applier::with_defaults();
    applier.apply(&mut engine, doc, &[Operation::Render], None);
    assert!(is_rendered(&engine, 0));
    assert_eq!(renderer.calls(), 1);

    engine.set_colors(ColorPair::new("white", "black"));
    applier.apply(&mut engine, doc, &[Operation::Reveal, Operation::Render], None);
    assert!(engine.state_of(FragmentKey(0)).is_waiting());
    assert!(engine.run_until_idle(IDLE));

    let white_on_black = engine.artifact_path(doc);
    assert_ne!(white_on_black, black_on_white);
    assert_eq!(renderer.calls(), 2);
    assert!(fs::read_to_string(&white_on_black)
        .unwrap()
        .contains("data-fg=\"white\""));
    assert!(matches!(
        events.records().last(),
        Some(EventRecord::Rendered(0, path)) if *path == white_on_black
    ));
}

#[test]
fn repeated_requests_keep_one_task_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(FakeRenderer::new());
    let (mut engine, _events) = session(&dir.path().join("cache"), renderer.clone(), |_| {});
    let mut applier = Applier::with_defaults();
    let doc = "$\\alpha$";

    renderer.hold();
    applier.apply(&mut engine, doc, &[Operation::Render], None);
    applier.apply(&mut engine, doc, &[Operation::Render], None);
    applier.apply(&mut engine, doc, &[Operation::Regenerate], None);
    assert_eq!(engine.tasks_started(), 1);
    assert_eq!(engine.in_flight(), 1);

    // Regenerate waits for the running task, then renders once more
    renderer.release();
    assert!(engine.run_until_idle(IDLE));
    assert_eq!(renderer.calls(), 2);
    assert_eq!(engine.tasks_started(), 2);
    assert!(renderer.max_concurrent() <= 1);
    assert!(is_rendered(&engine, 0));
    assert!(engine.artifact_path(doc).is_file());
}

#[test]
fn concurrent_renders_stay_within_limit() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(FakeRenderer::new().with_delay(Duration::from_millis(20)));
    let (mut engine, _events) = session(&dir.path().join("cache"), renderer.clone(), |config| {
        config.max_concurrent = 3;
    });
    let doc: String = (0..12).map(|i| format!("$a_{i}$ ")).collect();

    let summary = Applier::with_defaults().apply(&mut engine, &doc, &[Operation::Render], None);
    assert_eq!(summary.tasks_started, 12);
    assert!(engine.run_until_idle(IDLE));

    assert_eq!(renderer.calls(), 12);
    assert!(renderer.max_concurrent() <= 3);
    assert!(engine
        .states()
        .entries()
        .iter()
        .all(|(_, state)| matches!(state, FragmentState::Rendered { .. })));
}

#[test]
fn bulk_apply_survives_malformed_and_failing_fragments() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(FakeRenderer::new().fail_on("\\bad"));
    let (mut engine, events) = session(&dir.path().join("cache"), renderer.clone(), |config| {
        config.document_dir = Some(dir.path().to_path_buf());
    });
    let doc = "$a$ \\(oops $\\bad$ ![fig](missing.png) $b$";

    let summary = Applier::with_defaults().apply(&mut engine, doc, &[Operation::Render], None);
    assert_eq!(summary.malformed, 1);
    assert_eq!(summary.fragments, 4);
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.tasks_started, 3);
    assert!(engine.run_until_idle(IDLE));

    assert!(is_rendered(&engine, 0));
    assert!(is_rendered(&engine, doc.len() - 3));
    let errors: Vec<usize> = events
        .records()
        .iter()
        .filter_map(|r| match r {
            EventRecord::Error(begin, _) => Some(*begin),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors.contains(&doc.find("$\\bad$").unwrap()));
    assert!(errors.contains(&doc.find("![fig]").unwrap()));
}

#[test]
fn invalidated_artifact_is_rendered_again() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(FakeRenderer::new());
    let (mut engine, _events) = session(&dir.path().join("cache"), renderer.clone(), |_| {});
    let mut applier = Applier::with_defaults();
    let doc = "$\\sum_i i$";

    applier.apply(&mut engine, doc, &[Operation::Render], None);
    assert!(engine.run_until_idle(IDLE));
    let path = engine.artifact_path(doc);
    assert!(path.is_file());

    let fingerprint = engine.fingerprint_for(doc);
    let kind = engine.config().output_kind;
    assert!(engine.cache_mut().invalidate(&fingerprint, kind).unwrap());
    assert!(!path.exists());

    applier.apply(&mut engine, doc, &[Operation::Reveal, Operation::Render], None);
    assert!(engine.state_of(FragmentKey(0)).is_waiting());
    assert!(engine.run_until_idle(IDLE));
    assert_eq!(renderer.calls(), 2);
    assert!(path.is_file());
}

#[test]
fn cancel_returns_queued_fragments_to_unrendered() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(FakeRenderer::new());
    let (mut engine, events) = session(&dir.path().join("cache"), renderer.clone(), |config| {
        config.max_concurrent = 1;
    });
    let doc = "$a$ $b$ $c$ $d$";

    renderer.hold();
    Applier::with_defaults().apply(&mut engine, doc, &[Operation::Render], None);
    wait_for_active(&renderer, 1);

    assert_eq!(engine.cancel_waiting(), 3);
    for begin in [4, 8, 12] {
        assert_eq!(engine.state_of(FragmentKey(begin)), FragmentState::Unrendered);
    }
    assert!(events.records().contains(&EventRecord::Cleared(4)));

    renderer.release();
    assert!(engine.run_until_idle(IDLE));
    assert_eq!(renderer.calls(), 1);
    assert!(is_rendered(&engine, 0));
    assert_eq!(engine.state_of(FragmentKey(12)), FragmentState::Unrendered);
}

#[cfg(unix)]
#[test]
fn configured_commands_produce_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::from_yaml(&format!(
        "cache_dir: {}\ncommands:\n  svg:\n    - cp {{tex}} {{output}}\n",
        dir.path().join("cache").display()
    ))
    .unwrap();
    settings.validate().unwrap();

    let config = settings.to_engine_config(None).unwrap();
    let mut engine = RenderEngine::activate(
        config,
        Arc::new(settings.renderer()),
        Box::new(RecordingEvents::default()),
    )
    .unwrap();
    let doc = "$$\\int_0^1 x\\,dx$$";

    Applier::with_defaults().apply(&mut engine, doc, &[Operation::Render], None);
    assert!(engine.run_until_idle(IDLE));

    let path = engine.artifact_path(doc);
    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("\\documentclass"));
    assert!(written.contains("\\int_0^1"));
}
