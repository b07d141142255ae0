//! Engine thread: owns the model provider and media fetcher, serving
//! reference-extraction and filter requests from the async front.
//!
//! Inference is serialized by construction — one OS thread, one provider,
//! one request at a time. The async side talks to it over an mpsc request
//! channel with oneshot replies; scan progress streams back through an
//! unbounded channel so the UI never blocks the batch.

use momentka_capture::{Camera, CameraError};
use momentka_core::{
    extract_descriptor, BatchMatcher, CancelFlag, Descriptor, ExtractError, FilterError,
    MediaItem, ModelPaths, ModelProvider, ProviderError, ScanOutcome, ScanProgress,
};
use momentka_core::{ReferenceScan, ScanPhase};
use momentka_store::UrlFetcher;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Camera batches polled per reference scan before giving up.
const SCAN_ROUNDS: usize = 3;
/// Frames per camera batch during a reference scan.
const FRAMES_PER_ROUND: usize = 5;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("model pipeline: {0}")]
    Provider(#[from] ProviderError),
    #[error("reference extraction: {0}")]
    Extract(#[from] ExtractError),
    #[error("{0}")]
    Filter(#[from] FilterError),
    #[error("media fetcher init: {0}")]
    Source(#[from] reqwest::Error),
    #[error("could not read reference image {path}: {source}")]
    ReadReference {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no face detected in any captured frame")]
    NoFaceDetected,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from command handlers to the engine thread.
enum EngineRequest {
    ExtractReference {
        image_path: PathBuf,
        reply: oneshot::Sender<Result<Descriptor, EngineError>>,
    },
    CaptureReference {
        device: String,
        reply: oneshot::Sender<Result<Descriptor, EngineError>>,
    },
    Filter {
        items: Vec<MediaItem>,
        reference: Descriptor,
        threshold: f32,
        cancel: CancelFlag,
        progress: mpsc::UnboundedSender<ScanProgress>,
        reply: oneshot::Sender<Result<ScanOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Extract the reference descriptor from an image file.
    pub async fn extract_reference(&self, image_path: PathBuf) -> Result<Descriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ExtractReference {
                image_path,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Capture camera frames until one shows a face; return its descriptor.
    pub async fn capture_reference(&self, device: String) -> Result<Descriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CaptureReference {
                device,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run the batch filter over an event's media list.
    ///
    /// Progress lands on `progress` after every item; the reply carries the
    /// final outcome (possibly partial when `cancel` fires).
    pub async fn filter(
        &self,
        items: Vec<MediaItem>,
        reference: Descriptor,
        threshold: f32,
        cancel: CancelFlag,
        progress: mpsc::UnboundedSender<ScanProgress>,
    ) -> Result<ScanOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Filter {
                items,
                reference,
                threshold,
                cancel,
                progress,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Model loading stays lazy — the provider loads on the first request that
/// needs it, so commands that never touch inference pay nothing.
pub fn spawn_engine(model_dir: &Path, fetch_timeout: Duration) -> EngineHandle {
    let paths = ModelPaths::in_dir(model_dir);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("momentka-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut provider = ModelProvider::new(paths);
            let mut fetcher: Option<UrlFetcher> = None;

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::ExtractReference { image_path, reply } => {
                        let result = run_extract_reference(&mut provider, &image_path);
                        let _ = reply.send(result);
                    }
                    EngineRequest::CaptureReference { device, reply } => {
                        let result = run_capture_reference(&mut provider, &device);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Filter {
                        items,
                        reference,
                        threshold,
                        cancel,
                        progress,
                        reply,
                    } => {
                        let result = run_filter(
                            &mut provider,
                            &mut fetcher,
                            fetch_timeout,
                            &items,
                            &reference,
                            threshold,
                            &cancel,
                            &progress,
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

fn run_extract_reference(
    provider: &mut ModelProvider,
    image_path: &Path,
) -> Result<Descriptor, EngineError> {
    let bytes = std::fs::read(image_path).map_err(|source| EngineError::ReadReference {
        path: image_path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %image_path.display(), bytes = bytes.len(), "reference image read");
    Ok(extract_descriptor(provider, &bytes)?)
}

/// Poll camera frames through a [`ReferenceScan`] until a face turns up.
fn run_capture_reference(
    provider: &mut ModelProvider,
    device: &str,
) -> Result<Descriptor, EngineError> {
    let camera = Camera::open(device)?;
    tracing::info!(
        device,
        width = camera.width,
        height = camera.height,
        "camera opened for reference scan"
    );

    let mut scan = ReferenceScan::new();
    for round in 0..SCAN_ROUNDS {
        let (frames, dark_skipped) = camera.capture_frames(FRAMES_PER_ROUND)?;
        tracing::debug!(round, captured = frames.len(), dark_skipped, "scan frames");

        for frame in &frames {
            if scan.poll(provider, &frame.image)? == ScanPhase::FaceFound {
                break;
            }
        }
        if scan.phase() == ScanPhase::FaceFound {
            break;
        }
    }

    scan.take_descriptor().ok_or(EngineError::NoFaceDetected)
}

#[allow(clippy::too_many_arguments)]
fn run_filter(
    provider: &mut ModelProvider,
    fetcher: &mut Option<UrlFetcher>,
    fetch_timeout: Duration,
    items: &[MediaItem],
    reference: &Descriptor,
    threshold: f32,
    cancel: &CancelFlag,
    progress: &mpsc::UnboundedSender<ScanProgress>,
) -> Result<ScanOutcome, EngineError> {
    let source = match fetcher {
        Some(f) => f,
        None => fetcher.insert(UrlFetcher::with_timeout(fetch_timeout)?),
    };

    let matcher = BatchMatcher::with_threshold(threshold);
    let outcome = matcher.run(provider, source, items, reference, cancel, |p| {
        let _ = progress.send(p);
    })?;
    Ok(outcome)
}
