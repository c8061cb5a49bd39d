//! Per-fragment render state

use std::collections::HashMap;
use std::path::PathBuf;

use super::request::TaskId;
use crate::error::RenderFailure;
use crate::fragment::FragmentKey;

/// Where a fragment is in its render lifecycle
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum FragmentState {
    /// Source is shown as-is
    #[default]
    Unrendered,
    /// A render is queued or running; `task` is set once submitted.
    ///
    /// `regenerate` is set when a regenerate arrived meanwhile: the task's
    /// artifact is discarded and the fragment rendered again once it ends.
    Waiting {
        task: Option<TaskId>,
        regenerate: bool,
    },
    Rendered { artifact: PathBuf },
    Error { failure: RenderFailure },
}

impl FragmentState {
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        matches!(self, FragmentState::Waiting { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            FragmentState::Unrendered => "unrendered",
            FragmentState::Waiting { .. } => "waiting",
            FragmentState::Rendered { .. } => "rendered",
            FragmentState::Error { .. } => "error",
        }
    }
}

/// State of every fragment the session has touched.
///
/// Fragments are keyed by position; a key with no entry is `Unrendered`.
#[derive(Clone, Debug, Default)]
pub struct FragmentStates {
    states: HashMap<FragmentKey, FragmentState>,
}

impl FragmentStates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: FragmentKey) -> FragmentState {
        self.states.get(&key).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn is_waiting(&self, key: FragmentKey) -> bool {
        self.states.get(&key).is_some_and(FragmentState::is_waiting)
    }

    /// Number of fragments with a render queued or running
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.states.values().filter(|s| s.is_waiting()).count()
    }

    /// Every fragment not in the `Unrendered` state, sorted by position
    #[must_use]
    pub fn entries(&self) -> Vec<(FragmentKey, FragmentState)> {
        let mut entries: Vec<_> = self
            .states
            .iter()
            .map(|(k, s)| (*k, s.clone()))
            .collect();
        entries.sort_by_key(|(k, _)| *k);
        entries
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::RequestRender { key, cached } => {
                if !matches!(self.get(key), FragmentState::Unrendered) {
                    return vec![];
                }
                match cached {
                    Some(artifact) => {
                        self.set(
                            key,
                            FragmentState::Rendered {
                                artifact: artifact.clone(),
                            },
                        );
                        vec![Effect::ShowRendered { key, artifact }]
                    }
                    None => {
                        self.set(
                            key,
                            FragmentState::Waiting {
                                task: None,
                                regenerate: false,
                            },
                        );
                        vec![Effect::ShowWaiting(key), Effect::Submit(key)]
                    }
                }
            }

            Command::Submitted { key, task } => {
                if let Some(FragmentState::Waiting { task: slot, .. }) = self.states.get_mut(&key) {
                    *slot = Some(task);
                }
                vec![]
            }

            Command::TaskSucceeded {
                key,
                task,
                artifact,
            } => {
                if self.superseded(key, task) {
                    return vec![];
                }
                if self.regenerate_requested(key) {
                    return self.restart(key);
                }
                self.set(
                    key,
                    FragmentState::Rendered {
                        artifact: artifact.clone(),
                    },
                );
                vec![Effect::ShowRendered { key, artifact }]
            }

            Command::TaskFailed { key, task, failure } => {
                if self.superseded(key, task) {
                    return vec![];
                }
                if self.regenerate_requested(key) {
                    return self.restart(key);
                }
                self.set(
                    key,
                    FragmentState::Error {
                        failure: failure.clone(),
                    },
                );
                vec![Effect::ShowError { key, failure }]
            }

            Command::Fail { key, failure } => {
                if !matches!(self.get(key), FragmentState::Unrendered) {
                    return vec![];
                }
                self.set(
                    key,
                    FragmentState::Error {
                        failure: failure.clone(),
                    },
                );
                vec![Effect::ShowError { key, failure }]
            }

            Command::TaskCancelled { key } => {
                if self.is_waiting(key) {
                    self.states.remove(&key);
                    vec![Effect::Clear(key)]
                } else {
                    vec![]
                }
            }

            Command::Reveal { key } => match self.get(key) {
                FragmentState::Rendered { .. } | FragmentState::Error { .. } => {
                    self.states.remove(&key);
                    vec![Effect::Clear(key)]
                }
                FragmentState::Unrendered | FragmentState::Waiting { .. } => vec![],
            },

            Command::Regenerate { key } => {
                if let Some(FragmentState::Waiting { regenerate, .. }) = self.states.get_mut(&key) {
                    // The file stays until the running task has finished with it
                    *regenerate = true;
                    vec![]
                } else {
                    self.restart(key)
                }
            }
        }
    }

    fn set(&mut self, key: FragmentKey, state: FragmentState) {
        self.states.insert(key, state);
    }

    /// Back to `Unrendered`, dropping the artifact and rendering again
    fn restart(&mut self, key: FragmentKey) -> Vec<Effect> {
        self.states.remove(&key);
        vec![Effect::Invalidate(key), Effect::Clear(key), Effect::Render(key)]
    }

    fn regenerate_requested(&self, key: FragmentKey) -> bool {
        matches!(
            self.states.get(&key),
            Some(FragmentState::Waiting {
                regenerate: true,
                ..
            })
        )
    }

    /// A newer task is waiting on this fragment than the one reporting
    fn superseded(&self, key: FragmentKey, task: TaskId) -> bool {
        matches!(
            self.states.get(&key),
            Some(FragmentState::Waiting {
                task: Some(current),
                ..
            }) if *current != task
        )
    }
}

/// Commands that modify fragment state
#[derive(Clone, Debug)]
pub enum Command {
    /// Render a fragment, with its artifact path if already cached
    RequestRender {
        key: FragmentKey,
        cached: Option<PathBuf>,
    },
    /// The render task for a waiting fragment was queued
    Submitted { key: FragmentKey, task: TaskId },
    TaskSucceeded {
        key: FragmentKey,
        task: TaskId,
        artifact: PathBuf,
    },
    TaskFailed {
        key: FragmentKey,
        task: TaskId,
        failure: RenderFailure,
    },
    /// The fragment cannot be shown and no task is involved (missing image)
    Fail {
        key: FragmentKey,
        failure: RenderFailure,
    },
    /// The task was cancelled before it started
    TaskCancelled { key: FragmentKey },
    /// Show the fragment's source again
    Reveal { key: FragmentKey },
    /// Discard the cached artifact and render again
    Regenerate { key: FragmentKey },
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Display the waiting indicator
    ShowWaiting(FragmentKey),
    ShowRendered {
        key: FragmentKey,
        artifact: PathBuf,
    },
    ShowError {
        key: FragmentKey,
        failure: RenderFailure,
    },
    /// Remove any overlay and show the source
    Clear(FragmentKey),
    /// Queue a render task
    Submit(FragmentKey),
    /// Delete the cached artifact
    Invalidate(FragmentKey),
    /// Start the render flow again (cache lookup, then maybe submit)
    Render(FragmentKey),
}
