//! Render scheduler - bounded worker pool and task bookkeeping

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use super::DEFAULT_MAX_CONCURRENT;
use super::renderer::Renderer;
use super::request::{Completion, RenderJob, RenderRequest, RenderResponse, TaskId, TaskOutcome};
use super::worker::render_worker;
use crate::fragment::{Fragment, FragmentKey};

/// Called on the host thread once a task's outcome is known.
///
/// Optional: every outcome is also returned as a [`Completion`] from
/// [`RenderScheduler::poll`] and [`RenderScheduler::wait`], which is how the
/// engine consumes them. A continuation suits callers that submit one-off
/// jobs and do not want to match completions back to their task ids.
pub type Continuation = Box<dyn FnOnce(&TaskOutcome)>;

struct PendingTask {
    key: FragmentKey,
    fragment: Option<Fragment>,
    started: bool,
    on_done: Option<Continuation>,
}

/// Runs render jobs on at most `max_concurrent` worker threads.
///
/// Each worker runs one job at a time, so the worker count is the permit
/// count. Workers are spawned on demand and pull from a shared FIFO queue.
/// Everything except the queue and the cancellation generation lives on the
/// host thread; completions are delivered by [`RenderScheduler::poll`].
pub struct RenderScheduler {
    renderer: Arc<dyn Renderer>,
    request_tx: Sender<RenderRequest>,
    request_rx: Receiver<RenderRequest>,
    response_tx: Sender<RenderResponse>,
    response_rx: Receiver<RenderResponse>,
    generation: Arc<AtomicU64>,
    max_concurrent: usize,
    num_workers: usize,
    next_task_id: u64,
    pending: HashMap<TaskId, PendingTask>,
    /// Tasks reported cancelled that may still have been running
    cancelled: HashMap<TaskId, (FragmentKey, Option<Fragment>)>,
    ready: Vec<Completion>,
}

impl RenderScheduler {
    #[must_use]
    pub fn new(renderer: Arc<dyn Renderer>, max_concurrent: usize) -> Self {
        // flume receivers can be cloned, which lets every worker pull from
        // the same request queue
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        Self {
            renderer,
            request_tx,
            request_rx,
            response_tx,
            response_rx,
            generation: Arc::new(AtomicU64::new(0)),
            max_concurrent: max_concurrent.max(1),
            num_workers: 0,
            next_task_id: 1,
            pending: HashMap::new(),
            cancelled: HashMap::new(),
            ready: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_default_limit(renderer: Arc<dyn Renderer>) -> Self {
        Self::new(renderer, DEFAULT_MAX_CONCURRENT)
    }

    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Worker threads spawned so far
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.num_workers
    }

    /// Queue a job without blocking; the scheduler assigns `job.id`.
    ///
    /// No deduplication happens here. Callers check the fragment's waiting
    /// marker before submitting.
    pub fn submit(
        &mut self,
        mut job: RenderJob,
        fragment: Option<Fragment>,
        on_done: Option<Continuation>,
    ) -> TaskId {
        let id = self.next_id();
        job.id = id;

        self.pending.insert(
            id,
            PendingTask {
                key: job.key,
                fragment,
                started: false,
                on_done,
            },
        );
        self.ensure_workers();

        let generation = self.generation.load(Ordering::Acquire);
        if self
            .request_tx
            .send(RenderRequest::Render { job, generation })
            .is_err()
        {
            // Only possible if every receiver is gone, which the scheduler prevents
            warn!("Render queue closed; task {id:?} will not run");
        }

        debug!("Submitted task {id:?} ({} outstanding)", self.pending.len());
        id
    }

    /// Drain finished tasks without blocking
    pub fn poll(&mut self) -> Vec<Completion> {
        self.drain_responses();
        std::mem::take(&mut self.ready)
    }

    /// Block until at least one response arrives or `timeout` elapses, then drain
    pub fn wait(&mut self, timeout: Duration) -> Vec<Completion> {
        if self.ready.is_empty() && !self.pending.is_empty() {
            match self.response_rx.recv_timeout(timeout) {
                Ok(response) => self.handle_response(response),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Render response channel disconnected");
                }
            }
        }
        self.poll()
    }

    /// Cancel every task that has not started yet.
    ///
    /// Queued jobs are skipped by the workers when dequeued. Tasks already
    /// running complete normally, and a task that turns out to have started
    /// still delivers its result. Returns the cancelled tasks.
    pub fn cancel_waiting(&mut self) -> Vec<(TaskId, FragmentKey)> {
        self.drain_responses();
        self.generation.fetch_add(1, Ordering::AcqRel);

        let waiting: Vec<TaskId> = self
            .pending
            .iter()
            .filter(|(_, task)| !task.started)
            .map(|(id, _)| *id)
            .collect();

        let mut cancelled = Vec::with_capacity(waiting.len());
        for id in waiting {
            if let Some(task) = self.pending.remove(&id) {
                if let Some(on_done) = task.on_done {
                    on_done(&TaskOutcome::Cancelled);
                }
                self.cancelled.insert(id, (task.key, task.fragment));
                cancelled.push((id, task.key));
            }
        }

        cancelled.sort_by_key(|(id, _)| *id);
        debug!("Cancelled {} waiting tasks", cancelled.len());
        cancelled
    }

    /// Tasks submitted whose outcome has not been delivered
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Tasks a worker has started and not finished
    #[must_use]
    pub fn running(&self) -> usize {
        self.pending.values().filter(|t| t.started).count()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.ready.is_empty()
    }

    #[must_use]
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Stop all workers; running renders are not waited for
    pub fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        for _ in 0..self.num_workers {
            let _ = self.request_tx.send(RenderRequest::Shutdown);
        }
    }

    fn ensure_workers(&mut self) {
        while self.num_workers < self.max_concurrent && self.num_workers < self.pending.len() {
            let renderer = Arc::clone(&self.renderer);
            let rx = self.request_rx.clone();
            let tx = self.response_tx.clone();
            let generation = Arc::clone(&self.generation);

            let spawned = std::thread::Builder::new()
                .name(format!("texpane-render-{}", self.num_workers))
                .spawn(move || render_worker(renderer, rx, tx, generation));

            match spawned {
                Ok(_) => self.num_workers += 1,
                Err(e) => {
                    warn!("Failed to spawn render worker: {e}");
                    break;
                }
            }
        }
    }

    fn drain_responses(&mut self) {
        while let Ok(response) = self.response_rx.try_recv() {
            self.handle_response(response);
        }
    }

    fn handle_response(&mut self, response: RenderResponse) {
        match response {
            RenderResponse::Started(id) => {
                if let Some(task) = self.pending.get_mut(&id) {
                    task.started = true;
                }
            }

            RenderResponse::Finished { id, result } => {
                let outcome = match result {
                    Ok(path) => TaskOutcome::Rendered(path),
                    Err(failure) => TaskOutcome::Failed(failure),
                };

                if let Some(task) = self.pending.remove(&id) {
                    if let Some(on_done) = task.on_done {
                        on_done(&outcome);
                    }
                    self.ready.push(Completion {
                        id,
                        key: task.key,
                        fragment: task.fragment,
                        outcome,
                    });
                } else if let Some((key, fragment)) = self.cancelled.remove(&id) {
                    debug!("Task {id:?} finished after being cancelled");
                    self.ready.push(Completion {
                        id,
                        key,
                        fragment,
                        outcome,
                    });
                }
            }

            RenderResponse::Cancelled(id) => {
                if self.cancelled.remove(&id).is_none() {
                    // Cancelled by shutdown or by a cancel that raced the drain
                    if let Some(task) = self.pending.remove(&id) {
                        if let Some(on_done) = task.on_done {
                            on_done(&TaskOutcome::Cancelled);
                        }
                        self.ready.push(Completion {
                            id,
                            key: task.key,
                            fragment: task.fragment,
                            outcome: TaskOutcome::Cancelled,
                        });
                    }
                }
            }
        }
    }

    fn next_id(&mut self) -> TaskId {
        let id = TaskId::new(self.next_task_id);
        self.next_task_id += 1;
        id
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
