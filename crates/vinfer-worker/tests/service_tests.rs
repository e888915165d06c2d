//! End-to-end service tests over on-disk stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vinfer_models::{Artifact, ProcessingParams, ProcessingState};
use vinfer_worker::{
    InferencePipeline, InferenceService, SubmitOutcome, VideoInput, WorkerConfig, WorkerError,
    WorkerResult,
};

/// Pipeline that digests the stored video and counts invocations.
#[derive(Default)]
struct CountingPipeline {
    runs: AtomicUsize,
}

#[async_trait]
impl InferencePipeline for CountingPipeline {
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self, input: &VideoInput) -> WorkerResult<Artifact> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let video = tokio::fs::read(&input.path).await?;
        let summary = format!(
            "{}:{}:{}",
            input.params.model_version,
            video.len(),
            vinfer_models::sha256_hex(&video)
        );
        Ok(Artifact::with_content_type(summary.into_bytes(), "text/plain"))
    }
}

fn config(root: &std::path::Path) -> WorkerConfig {
    WorkerConfig {
        cache_dir: root.join("cache"),
        video_dir: root.join("videos"),
        waiter_timeout: Duration::from_secs(10),
        ..WorkerConfig::default()
    }
}

fn video(len: usize) -> Vec<u8> {
    let mut data = b"\0\0\0\x18ftypisom".to_vec();
    data.extend((0..len).map(|i| (i % 241) as u8));
    data
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_submissions_run_pipeline_once() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(CountingPipeline::default());
    let service = InferenceService::from_config(&config(dir.path()), pipeline.clone()).unwrap();
    let payload = video(10 * 1024 * 1024);

    let first = {
        let service = service.clone();
        let payload = payload.clone();
        tokio::spawn(async move { service.process(payload, ProcessingParams::new("v1")).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let service = service.clone();
        let payload = payload.clone();
        tokio::spawn(async move { service.process(payload, ProcessingParams::new("v1")).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(pipeline.runs.load(Ordering::SeqCst), 1);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.artifact.sha256(), second.artifact.sha256());

    // A later lookup is served from the cache.
    let hits_before = service.stats().cache_hits;
    let third = service
        .process(payload, ProcessingParams::new("v1"))
        .await
        .unwrap();
    assert_eq!(third.artifact, first.artifact);
    assert_eq!(pipeline.runs.load(Ordering::SeqCst), 1);
    assert_eq!(service.stats().cache_hits, hits_before + 1);

    let stored = service.videos().locate(&first.fingerprint).await.unwrap().unwrap();
    assert_eq!(stored.extension().and_then(|e| e.to_str()), Some("mp4"));
}

#[tokio::test]
async fn test_param_change_triggers_new_computation() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(CountingPipeline::default());
    let service = InferenceService::from_config(&config(dir.path()), pipeline.clone()).unwrap();

    let a = service
        .process(video(1024), ProcessingParams::new("v1"))
        .await
        .unwrap();
    let b = service
        .process(video(1024), ProcessingParams::new("v1").with_frame_stride(2))
        .await
        .unwrap();

    assert_ne!(a.fingerprint, b.fingerprint);
    assert_eq!(pipeline.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_enqueue_then_poll_until_ready() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(CountingPipeline::default());
    let service = InferenceService::from_config(&config(dir.path()), pipeline).unwrap();

    let submission = service
        .enqueue(video(2048), ProcessingParams::new("v1"))
        .await
        .unwrap();
    assert!(matches!(submission.outcome, SubmitOutcome::Started));

    let fingerprint = submission.fingerprint;
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.state(&fingerprint).await.unwrap() != ProcessingState::Ready {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let artifact = service.artifact(&fingerprint).await.unwrap().unwrap();
    assert_eq!(artifact.content_type(), "text/plain");

    let again = service
        .enqueue(video(2048), ProcessingParams::new("v1"))
        .await
        .unwrap();
    assert!(matches!(again.outcome, SubmitOutcome::Ready(_)));
}

#[tokio::test]
async fn test_empty_video_is_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        InferenceService::from_config(&config(dir.path()), Arc::new(CountingPipeline::default()))
            .unwrap();

    let err = service
        .process(Vec::new(), ProcessingParams::new("v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::InvalidInput(_)));
}

#[test]
fn test_overlapping_directories_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        cache_dir: dir.path().join("data"),
        video_dir: dir.path().join("data").join("videos"),
        ..WorkerConfig::default()
    };

    let err = InferenceService::from_config(&config, Arc::new(CountingPipeline::default()))
        .unwrap_err();
    assert!(matches!(err, WorkerError::ConfigError(_)));
}
