//! Model lifecycle: lazy, once-per-process loading of the detection and
//! descriptor models behind an explicit state machine.
//!
//! State machine: `Unloaded → Loading → Ready | Failed`. Callers only ever go
//! through [`FacePipeline::ensure_ready`]; a `Failed` provider retries the
//! load on the next call. Serialization of inference comes from `&mut self` —
//! the owner (one engine thread) runs one detection at a time.

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::DetectedFace;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the face detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_500m.onnx";
/// File name of the descriptor model inside the model directory.
pub const EMBEDDER_MODEL_FILE: &str = "mobilefacenet.onnx";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Locations of the two model files.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub embedder: PathBuf,
}

impl ModelPaths {
    /// Standard layout: both models directly inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            embedder: dir.join(EMBEDDER_MODEL_FILE),
        }
    }

    /// Model files that are not present on disk yet.
    pub fn missing(&self) -> Vec<&Path> {
        [self.detector.as_path(), self.embedder.as_path()]
            .into_iter()
            .filter(|p| !p.exists())
            .collect()
    }

    pub fn all_present(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Capability to turn a decoded photo into detected faces with descriptors.
///
/// The seam between the batch scanner / reference extraction and the ONNX
/// stack; tests substitute a stub pipeline.
pub trait FacePipeline {
    /// Make sure the models are loaded. Idempotent; cheap once `Ready`.
    fn ensure_ready(&mut self) -> Result<(), ProviderError>;

    /// Detect all faces above the confidence threshold, most prominent first,
    /// each carrying its bounding box, landmarks, and descriptor.
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError>;
}

/// Both model sessions, loaded and ready for inference.
pub struct LoadedModels {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl LoadedModels {
    fn load(paths: &ModelPaths) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(&paths.detector)?;
        tracing::info!(path = %paths.detector.display(), "face detector loaded");

        let embedder = FaceEmbedder::load(&paths.embedder)?;
        tracing::info!(path = %paths.embedder.display(), "descriptor model loaded");

        Ok(Self { detector, embedder })
    }

    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        let boxes = self.detector.detect(image)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let Some(landmarks) = bbox.landmarks else {
                tracing::debug!("detection without landmarks, skipping");
                continue;
            };
            let descriptor = self.embedder.extract(image, &landmarks)?;
            faces.push(DetectedFace { bbox, descriptor });
        }

        Ok(faces)
    }
}

enum ProviderState {
    Unloaded,
    Loading,
    Ready(Box<LoadedModels>),
    Failed(String),
}

impl ProviderState {
    fn label(&self) -> &'static str {
        match self {
            ProviderState::Unloaded => "unloaded",
            ProviderState::Loading => "loading",
            ProviderState::Ready(_) => "ready",
            ProviderState::Failed(_) => "failed",
        }
    }
}

/// Owns the model lifecycle. Models are loaded on first use and reused for
/// the rest of the process; a load failure is remembered and retried on the
/// next attempt.
pub struct ModelProvider {
    paths: ModelPaths,
    state: ProviderState,
}

impl ModelProvider {
    pub fn new(paths: ModelPaths) -> Self {
        Self {
            paths,
            state: ProviderState::Unloaded,
        }
    }

    /// Current lifecycle state, for status output.
    pub fn state_label(&self) -> &'static str {
        self.state.label()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ProviderState::Ready(_))
    }

    fn ready_models(&mut self) -> Result<&mut LoadedModels, ProviderError> {
        if !self.is_ready() {
            if let ProviderState::Failed(last) = &self.state {
                tracing::info!(last_error = %last, "retrying model load after earlier failure");
            }
            self.state = ProviderState::Loading;
            match LoadedModels::load(&self.paths) {
                Ok(models) => {
                    self.state = ProviderState::Ready(Box::new(models));
                    tracing::info!("model provider ready");
                }
                Err(err) => {
                    tracing::error!(error = %err, "model load failed");
                    self.state = ProviderState::Failed(err.to_string());
                    return Err(err);
                }
            }
        }

        match &mut self.state {
            ProviderState::Ready(models) => Ok(models),
            _ => unreachable!("state is Ready after a successful load"),
        }
    }
}

impl FacePipeline for ModelProvider {
    fn ensure_ready(&mut self) -> Result<(), ProviderError> {
        self.ready_models().map(|_| ())
    }

    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        self.ready_models()?.detect_faces(image)
    }
}
