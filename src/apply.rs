//! Bulk-apply driver: scan a range, dispatch handlers per fragment kind

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use anyhow::bail;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::engine::RenderEngine;
use crate::fragment::{Fragment, FragmentKind};
use crate::parsers::{ParserRegistry, table_to_latex};

/// What to do with each fragment in the range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Render,
    Reveal,
    Regenerate,
    Enlarge,
    Shrink,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Render => "render",
            Operation::Reveal => "reveal",
            Operation::Regenerate => "regenerate",
            Operation::Enlarge => "enlarge",
            Operation::Shrink => "shrink",
        };
        f.write_str(name)
    }
}

pub type Handler = Box<dyn Fn(&mut RenderEngine, &Fragment) -> anyhow::Result<()>>;
pub type PostApplyHook = Box<dyn FnMut(&mut RenderEngine, &ApplySummary)>;

/// Operation -> fragment kind -> handler
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(Operation, FragmentKind), Handler>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers for every built-in kind; images have no regenerate handler
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        for kind in [FragmentKind::InlineMath, FragmentKind::BlockMath] {
            registry.register(Operation::Render, kind, |engine, fragment| {
                engine.render(fragment);
                Ok(())
            });
            registry.register(Operation::Regenerate, kind, |engine, fragment| {
                engine.regenerate(fragment);
                Ok(())
            });
        }

        registry.register(Operation::Render, FragmentKind::Table, |engine, fragment| {
            engine.render_source(fragment, &table_to_latex(fragment.content()));
            Ok(())
        });
        registry.register(
            Operation::Regenerate,
            FragmentKind::Table,
            |engine, fragment| {
                engine.regenerate_source(fragment, &table_to_latex(fragment.content()));
                Ok(())
            },
        );

        registry.register(Operation::Render, FragmentKind::Image, |engine, fragment| {
            let target = fragment.content().trim();
            if target.is_empty() {
                bail!("image at offset {} has no path", fragment.begin);
            }
            let path = engine.resolve_image(target);
            engine.show_image(fragment, &path);
            Ok(())
        });

        for kind in [
            FragmentKind::InlineMath,
            FragmentKind::BlockMath,
            FragmentKind::Table,
            FragmentKind::Image,
        ] {
            registry.register(Operation::Reveal, kind, |engine, fragment| {
                engine.reveal(fragment);
                Ok(())
            });
            registry.register(Operation::Enlarge, kind, |engine, fragment| {
                let step = engine.config().zoom_step;
                engine.rescale(fragment, step);
                Ok(())
            });
            registry.register(Operation::Shrink, kind, |engine, fragment| {
                let step = engine.config().zoom_step;
                engine.rescale(fragment, 1.0 / step);
                Ok(())
            });
        }

        registry
    }

    /// Install (or replace) the handler for `operation` on `kind`
    pub fn register<F>(&mut self, operation: Operation, kind: FragmentKind, handler: F)
    where
        F: Fn(&mut RenderEngine, &Fragment) -> anyhow::Result<()> + 'static,
    {
        self.handlers.insert((operation, kind), Box::new(handler));
    }

    pub fn remove(&mut self, operation: Operation, kind: FragmentKind) -> Option<Handler> {
        self.handlers.remove(&(operation, kind))
    }

    #[must_use]
    pub fn get(&self, operation: Operation, kind: FragmentKind) -> Option<&Handler> {
        self.handlers.get(&(operation, kind))
    }

    #[must_use]
    pub fn supports(&self, operation: Operation, kind: FragmentKind) -> bool {
        self.handlers.contains_key(&(operation, kind))
    }
}

/// Result of one [`Applier::apply`] call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplySummary {
    pub operations: Vec<Operation>,
    /// The range that was scanned
    pub range: Range<usize>,
    /// A selection was given; the host should deactivate it
    pub selection_active: bool,
    /// Well-formed fragments found
    pub fragments: usize,
    /// Positions that looked like fragments but failed to parse
    pub malformed: usize,
    /// Handler errors
    pub failures: usize,
    /// Render tasks submitted during this apply
    pub tasks_started: usize,
    /// Engine view scale after the post-apply hooks ran
    pub scale: f32,
}

/// Scans documents and applies operations to every fragment in range
pub struct Applier {
    parsers: ParserRegistry,
    handlers: HandlerRegistry,
    hooks: Vec<PostApplyHook>,
}

impl Default for Applier {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Applier {
    /// No hooks; see [`Applier::with_defaults`]
    #[must_use]
    pub fn new(parsers: ParserRegistry, handlers: HandlerRegistry) -> Self {
        Self {
            parsers,
            handlers,
            hooks: Vec::new(),
        }
    }

    /// Built-in parsers, handlers and hooks
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut applier = Self::new(
            ParserRegistry::with_defaults(),
            HandlerRegistry::with_defaults(),
        );
        applier.add_hook(track_scale);
        applier.add_hook(log_tasks_started);
        applier
    }

    #[must_use]
    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub fn parsers_mut(&mut self) -> &mut ParserRegistry {
        &mut self.parsers
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    /// Hooks run once per apply, after the scan, in the order added
    pub fn add_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&mut RenderEngine, &ApplySummary) + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Apply `operations` to every fragment in `selection` (or the whole
    /// document). Malformed fragments and handler errors are logged and
    /// counted; they never stop the scan.
    pub fn apply(
        &mut self,
        engine: &mut RenderEngine,
        document: &str,
        operations: &[Operation],
        selection: Option<Range<usize>>,
    ) -> ApplySummary {
        let selection_active = selection.is_some();
        let range = selection.unwrap_or(0..document.len());
        let range = range.start.min(document.len())..range.end.min(document.len());
        let tasks_before = engine.tasks_started();

        let mut summary = ApplySummary {
            operations: operations.to_vec(),
            range: range.clone(),
            selection_active,
            fragments: 0,
            malformed: 0,
            failures: 0,
            tasks_started: 0,
            scale: engine.scale(),
        };

        for item in self.parsers.scan(document, range) {
            let fragment = match item {
                Ok(fragment) => fragment,
                Err(e) => {
                    debug!("Skipping malformed fragment: {e}");
                    summary.malformed += 1;
                    continue;
                }
            };
            summary.fragments += 1;

            for &operation in operations {
                let Some(handler) = self.handlers.get(operation, fragment.kind) else {
                    continue;
                };
                if let Err(e) = handler(engine, &fragment) {
                    warn!(
                        "{operation} failed for {} at {}: {e:#}",
                        fragment.kind, fragment.begin
                    );
                    summary.failures += 1;
                }
            }
        }

        summary.tasks_started = engine.tasks_started() - tasks_before;
        for hook in &mut self.hooks {
            hook(engine, &summary);
        }
        summary.scale = engine.scale();
        summary
    }

    /// Apply `operations` to the fragment under `offset` only
    pub fn apply_at_point(
        &mut self,
        engine: &mut RenderEngine,
        document: &str,
        operations: &[Operation],
        offset: usize,
    ) -> Option<ApplySummary> {
        let fragment = self.parsers.fragment_at_point(document, offset)?;
        let mut summary = self.apply(engine, document, operations, Some(fragment.span()));
        summary.selection_active = false;
        Some(summary)
    }
}

/// Enlarge/shrink move the engine scale by one zoom step per apply
fn track_scale(engine: &mut RenderEngine, summary: &ApplySummary) {
    let step = engine.config().zoom_step;
    for operation in &summary.operations {
        match operation {
            Operation::Enlarge => {
                engine.adjust_scale(step);
            }
            Operation::Shrink => {
                engine.adjust_scale(1.0 / step);
            }
            _ => {}
        }
    }
}

fn log_tasks_started(_engine: &mut RenderEngine, summary: &ApplySummary) {
    if summary.tasks_started > 0 {
        info!("{} tasks started", summary.tasks_started);
    }
}
