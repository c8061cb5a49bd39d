//! Fakes for exercising the engine without a TeX installation

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::RenderFailure;
use crate::events::{Artifact, RenderEvents};
use crate::fragment::Fragment;
use crate::render::{RenderJob, Renderer};

/// Renderer that writes a tiny SVG and records how it was called
#[derive(Debug, Default)]
pub struct FakeRenderer {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    held: AtomicBool,
    delay: Duration,
    fail_on: Option<String>,
    sources: Mutex<Vec<String>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every render
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every job whose source contains `pattern`
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    /// Block renders in progress until [`FakeRenderer::release`]
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Renders running right now
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of renders ever running at once
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Sources in the order renders started
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }
}

impl Renderer for FakeRenderer {
    fn render(&self, job: &RenderJob) -> Result<(), RenderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.sources.lock().unwrap().push(job.source.clone());

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        while self.held.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }

        let result = match &self.fail_on {
            Some(pattern) if job.source.contains(pattern.as_str()) => Err(RenderFailure::new(
                "fake-latex fragment.tex",
                "fake-latex exited with status 1",
                format!("! Undefined control sequence.\nl.5 {}", job.source),
            )),
            _ => fs::write(
                &job.output,
                format!(
                    "<svg data-fg=\"{}\" data-bg=\"{}\"><!-- {} --></svg>",
                    job.colors.foreground, job.colors.background, job.source
                ),
            )
            .map_err(|e| RenderFailure::new("fake-latex", e.to_string(), "")),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// One call on the event sink, keyed by fragment start
#[derive(Debug, Clone, PartialEq)]
pub enum EventRecord {
    Waiting(usize),
    Rendered(usize, PathBuf),
    Error(usize, RenderFailure),
    Cleared(usize),
}

/// Event sink that records calls; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingEvents {
    records: Rc<RefCell<Vec<EventRecord>>>,
    artifacts: Rc<RefCell<Vec<Artifact>>>,
}

impl RecordingEvents {
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.borrow().clone()
    }

    /// Every artifact passed to `show_rendered`, in order
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.borrow().clone()
    }

    pub fn clear_records(&self) {
        self.records.borrow_mut().clear();
        self.artifacts.borrow_mut().clear();
    }
}

impl RenderEvents for RecordingEvents {
    fn show_waiting(&mut self, fragment: &Fragment) {
        self.records
            .borrow_mut()
            .push(EventRecord::Waiting(fragment.begin));
    }

    fn show_rendered(&mut self, fragment: &Fragment, artifact: &Artifact) {
        self.records
            .borrow_mut()
            .push(EventRecord::Rendered(fragment.begin, artifact.path.clone()));
        self.artifacts.borrow_mut().push(artifact.clone());
    }

    fn show_error(&mut self, fragment: &Fragment, failure: &RenderFailure) {
        self.records
            .borrow_mut()
            .push(EventRecord::Error(fragment.begin, failure.clone()));
    }

    fn clear(&mut self, fragment: &Fragment) {
        self.records
            .borrow_mut()
            .push(EventRecord::Cleared(fragment.begin));
    }
}
