//! Render worker - runs in separate thread(s)

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flume::{Receiver, Sender};
use log::{debug, warn};

use super::renderer::Renderer;
use super::request::{RenderJob, RenderRequest, RenderResponse};
use crate::error::RenderFailure;

/// Worker loop: one job at a time until `Shutdown` or the queue closes.
///
/// `cancel_generation` is read when a job is dequeued; jobs queued under an
/// older generation are reported as cancelled without running.
pub fn render_worker(
    renderer: Arc<dyn Renderer>,
    requests: Receiver<RenderRequest>,
    responses: Sender<RenderResponse>,
    cancel_generation: Arc<AtomicU64>,
) {
    for request in requests {
        match request {
            RenderRequest::Render { job, generation } => {
                if generation < cancel_generation.load(Ordering::Acquire) {
                    debug!("Skipping cancelled task {:?}", job.id);
                    let _ = responses.send(RenderResponse::Cancelled(job.id));
                    continue;
                }

                let _ = responses.send(RenderResponse::Started(job.id));
                let result = run_job(renderer.as_ref(), &job);
                let _ = responses.send(RenderResponse::Finished { id: job.id, result });
            }

            RenderRequest::Shutdown => break,
        }
    }
}

fn run_job(renderer: &dyn Renderer, job: &RenderJob) -> Result<PathBuf, RenderFailure> {
    debug!("Rendering {:?} -> {:?}", job.key, job.output);

    // Every job gets a response, even if the renderer panics
    match panic::catch_unwind(AssertUnwindSafe(|| renderer.render(job))) {
        Ok(result) => result?,
        Err(_) => {
            return Err(RenderFailure::new(
                "",
                "renderer panicked",
                format!("while rendering {:?}", job.key),
            ));
        }
    }

    if job.output.is_file() {
        Ok(job.output.clone())
    } else {
        warn!("Renderer returned success without creating {:?}", job.output);
        Err(RenderFailure::new(
            "",
            "renderer reported success but produced no artifact",
            format!("expected {}", job.output.display()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentKey;
    use crate::render::fingerprint::{ColorPair, Fingerprint, OutputKind};
    use crate::render::request::TaskId;
    use std::fs;

    struct Lazy;

    impl Renderer for Lazy {
        fn render(&self, _job: &RenderJob) -> Result<(), RenderFailure> {
            Ok(())
        }
    }

    struct Writes;

    impl Renderer for Writes {
        fn render(&self, job: &RenderJob) -> Result<(), RenderFailure> {
            fs::write(&job.output, "<svg/>")
                .map_err(|e| RenderFailure::new("write", e.to_string(), ""))
        }
    }

    struct Panics;

    impl Renderer for Panics {
        fn render(&self, _job: &RenderJob) -> Result<(), RenderFailure> {
            panic!("renderer bug");
        }
    }

    fn job(id: u64, output: PathBuf) -> RenderJob {
        RenderJob {
            id: TaskId::new(id),
            key: FragmentKey(0),
            source: "$x$".to_string(),
            kind: OutputKind::Svg,
            colors: ColorPair::default(),
            fingerprint: Fingerprint::parse(&"0".repeat(32)).unwrap(),
            output,
        }
    }

    fn run(
        renderer: Arc<dyn Renderer>,
        requests: Vec<RenderRequest>,
        generation: u64,
    ) -> Vec<RenderResponse> {
        let (req_tx, req_rx) = flume::unbounded();
        let (resp_tx, resp_rx) = flume::unbounded();
        for request in requests {
            req_tx.send(request).unwrap();
        }
        req_tx.send(RenderRequest::Shutdown).unwrap();
        render_worker(renderer, req_rx, resp_tx, Arc::new(AtomicU64::new(generation)));
        resp_rx.drain().collect()
    }

    #[test]
    fn success_requires_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let responses = run(
            Arc::new(Lazy),
            vec![RenderRequest::Render {
                job: job(1, dir.path().join("a.svg")),
                generation: 0,
            }],
            0,
        );

        assert!(matches!(responses[0], RenderResponse::Started(TaskId(1))));
        match &responses[1] {
            RenderResponse::Finished { result: Err(failure), .. } => {
                assert!(failure.description.contains("no artifact"));
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn writes_artifact_and_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("b.svg");
        let responses = run(
            Arc::new(Writes),
            vec![RenderRequest::Render {
                job: job(2, output.clone()),
                generation: 3,
            }],
            3,
        );

        match &responses[1] {
            RenderResponse::Finished { id, result: Ok(path) } => {
                assert_eq!(*id, TaskId(2));
                assert_eq!(path, &output);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn panicking_renderer_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let responses = run(
            Arc::new(Panics),
            vec![
                RenderRequest::Render {
                    job: job(4, dir.path().join("d.svg")),
                    generation: 0,
                },
                RenderRequest::Render {
                    job: job(5, dir.path().join("e.svg")),
                    generation: 0,
                },
            ],
            0,
        );

        let failures = responses
            .iter()
            .filter(|r| matches!(r, RenderResponse::Finished { result: Err(_), .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn stale_generation_is_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("c.svg");
        let responses = run(
            Arc::new(Writes),
            vec![RenderRequest::Render {
                job: job(3, output.clone()),
                generation: 0,
            }],
            1,
        );

        assert_eq!(responses.len(), 1);
        assert!(matches!(responses[0], RenderResponse::Cancelled(TaskId(3))));
        assert!(!output.exists());
    }
}
