//! momentka-core — Face detection, descriptors, and the batch match filter.
//!
//! Uses an SCRFD-style detector for faces and landmarks and a MobileFaceNet
//! descriptor model for 128-d embeddings, both running via ONNX Runtime for
//! CPU inference. The batch matcher scans an event's media list against one
//! reference descriptor.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod extractor;
pub mod matcher;
pub mod provider;
pub mod types;

pub use extractor::{extract_descriptor, ExtractError, ReferenceScan, ScanPhase};
pub use matcher::{
    BatchMatcher, CancelFlag, FetchError, FilterError, MediaSource, MATCH_DISTANCE_THRESHOLD,
};
pub use provider::{FacePipeline, ModelPaths, ModelProvider, ProviderError};
pub use types::{
    BoundingBox, Descriptor, DetectedFace, MediaItem, MediaKind, ScanOutcome, ScanProgress,
    DESCRIPTOR_DIM,
};
