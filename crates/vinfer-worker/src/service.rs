//! Inference service: validation, fingerprinting, video storage and
//! coordinated computation behind one handle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use vinfer_models::{Artifact, ProcessingParams, ProcessingState, VideoFingerprint};
use vinfer_storage::{CacheStore, VideoStore};

use crate::config::WorkerConfig;
use crate::coordinator::{ComputationCoordinator, CoordinatorStats, SubmitOutcome, TicketSnapshot};
use crate::error::{WorkerError, WorkerResult};
use crate::fingerprint::sniff_container;
use crate::pipeline::{InferencePipeline, VideoInput};

/// Result of a blocking submission.
#[derive(Debug, Clone)]
pub struct Processed {
    pub fingerprint: VideoFingerprint,
    pub artifact: Artifact,
}

/// Result of a non-blocking submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub fingerprint: VideoFingerprint,
    pub outcome: SubmitOutcome,
}

/// Entry point used by the HTTP layer.
///
/// Cheap to clone; clones share the coordinator and stores.
#[derive(Clone)]
pub struct InferenceService {
    coordinator: ComputationCoordinator,
    videos: VideoStore,
    pipeline: Arc<dyn InferencePipeline>,
    max_video_size: usize,
    default_model_version: String,
}

impl InferenceService {
    pub fn new(
        coordinator: ComputationCoordinator,
        videos: VideoStore,
        pipeline: Arc<dyn InferencePipeline>,
    ) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            coordinator,
            videos,
            pipeline,
            max_video_size: defaults.max_video_size,
            default_model_version: defaults.default_model_version,
        }
    }

    /// Open the stores named in `config` and wire everything together.
    pub fn from_config(
        config: &WorkerConfig,
        pipeline: Arc<dyn InferencePipeline>,
    ) -> WorkerResult<Self> {
        config.validate()?;

        let store = CacheStore::filesystem(&config.cache_dir)?.with_ttl(config.cache_expiry);
        let videos = VideoStore::new(&config.video_dir)?;
        let coordinator = ComputationCoordinator::from_config(store, config);

        info!(
            cache_dir = %config.cache_dir.display(),
            video_dir = %config.video_dir.display(),
            pipeline = pipeline.name(),
            max_concurrent = config.max_concurrent_computations,
            "Inference service initialized"
        );

        Ok(Self::new(coordinator, videos, pipeline)
            .with_max_video_size(config.max_video_size)
            .with_default_model_version(config.default_model_version.clone()))
    }

    pub fn with_max_video_size(mut self, bytes: usize) -> Self {
        self.max_video_size = bytes;
        self
    }

    pub fn with_default_model_version(mut self, version: impl Into<String>) -> Self {
        self.default_model_version = version.into();
        self
    }

    pub fn coordinator(&self) -> &ComputationCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &CacheStore {
        self.coordinator.store()
    }

    pub fn videos(&self) -> &VideoStore {
        &self.videos
    }

    pub fn max_video_size(&self) -> usize {
        self.max_video_size
    }

    /// Params for the configured default model version.
    pub fn default_params(&self) -> ProcessingParams {
        ProcessingParams::new(self.default_model_version.clone())
    }

    /// Submit a video and wait for its artifact.
    pub async fn process(
        &self,
        video: Vec<u8>,
        params: ProcessingParams,
    ) -> WorkerResult<Processed> {
        self.process_with_timeout(video, params, self.coordinator.default_timeout())
            .await
    }

    pub async fn process_with_timeout(
        &self,
        video: Vec<u8>,
        params: ProcessingParams,
        timeout: Duration,
    ) -> WorkerResult<Processed> {
        let (fingerprint, video, params) = self.identify(video, params).await?;
        let compute = self.compute_fn(fingerprint.clone(), video, params);
        let artifact = self
            .coordinator
            .get_or_compute_with_timeout(&fingerprint, timeout, compute)
            .await?;
        Ok(Processed {
            fingerprint,
            artifact,
        })
    }

    /// Submit a video without waiting for the computation.
    pub async fn enqueue(
        &self,
        video: Vec<u8>,
        params: ProcessingParams,
    ) -> WorkerResult<Submission> {
        let (fingerprint, video, params) = self.identify(video, params).await?;
        let compute = self.compute_fn(fingerprint.clone(), video, params);
        let outcome = self.coordinator.submit(&fingerprint, compute).await;
        Ok(Submission {
            fingerprint,
            outcome,
        })
    }

    pub async fn state(&self, fingerprint: &VideoFingerprint) -> WorkerResult<ProcessingState> {
        self.coordinator.state(fingerprint).await
    }

    /// Cached artifact for a fingerprint, if any.
    pub async fn artifact(&self, fingerprint: &VideoFingerprint) -> WorkerResult<Option<Artifact>> {
        Ok(self.store().load_ready(fingerprint).await?)
    }

    /// Drop the cache entry and stored video. Returns whether anything existed.
    ///
    /// An in-flight computation for the fingerprint is not interrupted and
    /// will publish its result when it finishes.
    pub async fn evict(&self, fingerprint: &VideoFingerprint) -> WorkerResult<bool> {
        let entry_removed = self.store().evict(fingerprint).await?;
        let video_removed = self.videos.delete(fingerprint).await?;
        Ok(entry_removed || video_removed)
    }

    pub async fn in_flight(&self) -> Vec<TicketSnapshot> {
        self.coordinator.in_flight().await
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }

    /// Verify both storage areas accept writes.
    pub async fn check_storage(&self) -> WorkerResult<()> {
        self.store().check_writable().await?;
        self.videos.check_writable().await?;
        Ok(())
    }

    /// Validate the submission and compute its fingerprint off the runtime threads.
    async fn identify(
        &self,
        video: Vec<u8>,
        params: ProcessingParams,
    ) -> WorkerResult<(VideoFingerprint, Vec<u8>, ProcessingParams)> {
        if video.len() > self.max_video_size {
            return Err(WorkerError::invalid_input(format!(
                "Video is {} bytes, limit is {}",
                video.len(),
                self.max_video_size
            )));
        }

        let (fingerprint, video, params) = tokio::task::spawn_blocking(move || {
            let fp = crate::fingerprint::fingerprint(&video, &params);
            (fp, video, params)
        })
        .await
        .map_err(|e| WorkerError::computation(format!("Fingerprinting task failed: {}", e)))?;

        let fingerprint = fingerprint?;
        debug!(
            fingerprint = %fingerprint,
            size = video.len(),
            model_version = %params.model_version,
            "Video fingerprinted"
        );
        Ok((fingerprint, video, params))
    }

    /// Computation run by the coordinator on a miss: store the video, then
    /// hand it to the pipeline.
    fn compute_fn(
        &self,
        fingerprint: VideoFingerprint,
        video: Vec<u8>,
        params: ProcessingParams,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, WorkerResult<Artifact>> + Send + 'static
    {
        let videos = self.videos.clone();
        let pipeline = self.pipeline.clone();
        move || {
            Box::pin(async move {
                let extension = sniff_container(&video);
                let path = videos.save(&fingerprint, &video, extension).await?;
                drop(video);

                let input = VideoInput {
                    fingerprint,
                    path,
                    params,
                };
                pipeline.run(&input).await
            })
        }
    }
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("coordinator", &self.coordinator)
            .field("videos", &self.videos)
            .field("pipeline", &self.pipeline.name())
            .field("max_video_size", &self.max_video_size)
            .finish()
    }
}
