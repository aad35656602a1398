//! Serialized execution of generation jobs.
//!
//! One dedicated worker thread owns every call into the pipeline
//! handle. Callers from any number of transport tasks enqueue jobs on
//! an unbounded FIFO channel and suspend on a oneshot until their job
//! completes. The queue has no bound and a queued job has no deadline;
//! callers wait as long as their job takes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::lifecycle::LifecycleManager;
use crate::request::InferenceRequest;
use crate::types::InferenceResult;

/// One queued unit of work.
struct Job {
    request: InferenceRequest,
    reply: oneshot::Sender<Result<InferenceResult>>,
}

/// Accepts jobs from any number of concurrent callers and guarantees
/// they reach the pipeline one at a time, in submission order.
pub struct InferenceExecutor {
    lifecycle: Arc<LifecycleManager>,
    queue: mpsc::UnboundedSender<Job>,
}

impl InferenceExecutor {
    /// Spawn the worker thread and return the executor.
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();

        let worker_lifecycle = lifecycle.clone();
        std::thread::Builder::new()
            .name("kinema-inference".into())
            .spawn(move || worker_loop(worker_lifecycle, rx))
            .expect("failed to spawn inference worker thread");

        Self { lifecycle, queue }
    }

    /// Submit a job and suspend until it completes.
    ///
    /// Fails fast with `NotReady` before anything is queued. Once
    /// queued, the job runs to completion; there is no cancellation.
    pub async fn submit(&self, request: InferenceRequest) -> Result<InferenceResult> {
        self.lifecycle.ensure_ready()?;

        let (reply, response) = oneshot::channel();
        self.queue
            .send(Job { request, reply })
            .map_err(|_| Error::Inference("inference worker is no longer running".into()))?;

        response
            .await
            .map_err(|_| Error::Inference("inference worker dropped the job".into()))?
    }
}

fn worker_loop(lifecycle: Arc<LifecycleManager>, mut queue: mpsc::UnboundedReceiver<Job>) {
    info!("inference worker started");

    while let Some(job) = queue.blocking_recv() {
        let result = run_job(&lifecycle, &job.request);
        if job.reply.send(result).is_err() {
            debug!("caller went away before its job completed");
        }
    }

    info!("inference worker stopped");
}

/// Execute one job against the pipeline handle.
///
/// Errors and panics from the invocation are converted to values here
/// so the worker loop survives every job and keeps draining the queue.
fn run_job(lifecycle: &LifecycleManager, request: &InferenceRequest) -> Result<InferenceResult> {
    let handle = lifecycle.handle()?;

    debug!(
        fps = request.fps,
        frames = request.frames,
        motion_bucket_id = request.motion_bucket_id,
        "executing generation job"
    );

    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| handle.invoke(request)));
    let processing_secs = started.elapsed().as_secs_f32();

    match outcome {
        Ok(Ok(output)) => Ok(InferenceResult {
            video: output.video,
            model_version: handle.model_version().to_string(),
            duration_secs: request.duration_secs(),
            processing_secs,
            device: handle.device(),
        }),
        Ok(Err(e)) => {
            error!(error = %e, "pipeline invocation failed");
            Err(match e {
                Error::Inference(_) => e,
                other => Error::Inference(other.to_string()),
            })
        }
        Err(_) => {
            error!("pipeline invocation panicked");
            Err(Error::Inference("pipeline invocation panicked".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleManager;
    use crate::pipeline::{PipelineHandle, PipelineLoader, PipelineOutput, VideoPipeline};
    use crate::types::Device;
    use base64::Engine;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    // 1x1 RGBA PNG
    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    #[derive(Default)]
    struct ProbeState {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        order: Mutex<Vec<u32>>,
        gate: Option<Mutex<std::sync::mpsc::Receiver<()>>>,
        fail_on_frames: Option<u32>,
        panic_on_frames: Option<u32>,
    }

    struct ProbePipeline(Arc<ProbeState>);

    impl VideoPipeline for ProbePipeline {
        fn invoke(&self, request: &InferenceRequest) -> Result<PipelineOutput> {
            let state = &self.0;
            state.calls.fetch_add(1, Ordering::SeqCst);

            let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(gate) = &state.gate {
                let _ = gate.lock().unwrap().recv();
            }

            std::thread::sleep(Duration::from_millis(2));
            state.order.lock().unwrap().push(request.frames);
            state.in_flight.fetch_sub(1, Ordering::SeqCst);

            if state.panic_on_frames == Some(request.frames) {
                panic!("synthetic panic");
            }
            if state.fail_on_frames == Some(request.frames) {
                return Err(Error::Inference("synthetic failure".into()));
            }

            Ok(PipelineOutput {
                video: vec![0xAB, 0xCD, 0xEF],
            })
        }
    }

    struct ProbeLoader(Arc<ProbeState>);

    impl PipelineLoader for ProbeLoader {
        fn load(&self) -> Result<PipelineHandle> {
            Ok(PipelineHandle::new(
                Box::new(ProbePipeline(self.0.clone())),
                Device::Cuda,
                "svd-xt-1.1",
            ))
        }
    }

    fn ready_executor(state: Arc<ProbeState>) -> Arc<InferenceExecutor> {
        let lifecycle = Arc::new(LifecycleManager::new());
        lifecycle.begin_load(&ProbeLoader(state)).unwrap();
        Arc::new(InferenceExecutor::new(lifecycle))
    }

    fn request(frames: u32) -> InferenceRequest {
        InferenceRequest {
            image: Bytes::from_static(b"raw image bytes"),
            width: 1,
            height: 1,
            fps: 6,
            frames,
            motion: 0.5,
            motion_bucket_id: 128,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_submissions_never_overlap_in_the_pipeline() {
        let state = Arc::new(ProbeState::default());
        let executor = ready_executor(state.clone());

        let mut handles = Vec::new();
        for i in 1..=16 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move { executor.submit(request(i)).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(state.calls.load(Ordering::SeqCst), 16);
        assert_eq!(state.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn jobs_complete_in_submission_order() {
        let (gate_tx, gate_rx) = std::sync::mpsc::channel();
        let state = Arc::new(ProbeState {
            gate: Some(Mutex::new(gate_rx)),
            ..Default::default()
        });
        let executor = ready_executor(state.clone());

        // Park the worker on a first job so the rest pile up in the queue.
        let blocker = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.submit(request(100)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut handles = Vec::new();
        for i in 1..=5u32 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move { executor.submit(request(i)).await }));
            // space out the sends so submission order is deterministic
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        gate_tx.send(()).unwrap();
        drop(gate_tx);

        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let order = state.order.lock().unwrap().clone();
        assert_eq!(order, vec![100, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn submissions_before_load_get_not_ready_and_queue_nothing() {
        let state = Arc::new(ProbeState::default());
        let lifecycle = Arc::new(LifecycleManager::new());
        let executor = InferenceExecutor::new(lifecycle.clone());

        let err = executor.submit(request(14)).await.unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
        assert_eq!(state.calls.load(Ordering::SeqCst), 0);

        lifecycle.begin_load(&ProbeLoader(state.clone())).unwrap();
        executor.submit(request(14)).await.unwrap();
        assert_eq!(state.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_job_does_not_poison_the_worker() {
        let state = Arc::new(ProbeState {
            fail_on_frames: Some(13),
            ..Default::default()
        });
        let executor = ready_executor(state.clone());

        let err = executor.submit(request(13)).await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));

        let result = executor.submit(request(14)).await.unwrap();
        assert_eq!(result.video, vec![0xAB, 0xCD, 0xEF]);
        assert_eq!(state.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_job_does_not_poison_the_worker() {
        let state = Arc::new(ProbeState {
            panic_on_frames: Some(99),
            ..Default::default()
        });
        let executor = ready_executor(state.clone());

        let err = executor.submit(request(99)).await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));

        executor.submit(request(14)).await.unwrap();
        assert_eq!(state.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn end_to_end_result_carries_metadata() {
        let state = Arc::new(ProbeState::default());
        let executor = ready_executor(state);

        let image = Bytes::from(
            base64::engine::general_purpose::STANDARD
                .decode(PNG_1X1)
                .unwrap(),
        );
        let request = crate::request::validate(image, 6, 14, 0.5).unwrap();
        let result = executor.submit(request).await.unwrap();

        assert_eq!(result.model_version, "svd-xt-1.1");
        assert_eq!(result.device, Device::Cuda);
        assert!((result.duration_secs - 14.0 / 6.0).abs() < f32::EPSILON);
        assert!(result.processing_secs >= 0.0);
    }
}
