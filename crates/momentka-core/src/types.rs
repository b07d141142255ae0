use serde::{Deserialize, Serialize};

/// Length of a face descriptor vector.
pub const DESCRIPTOR_DIM: usize = 128;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face descriptor — a 128-dimensional embedding of one detected face.
///
/// Produced only by the model pipeline and held for the duration of a single
/// filter run; descriptors are never written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Symmetric, non-negative, zero for identical descriptors.
    /// Lower = more similar.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A detected face: where it sits in the photo plus its descriptor.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
}

/// Media kind, inferred from the URL shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

/// One media entry of an event: its URL and the inferred kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    pub kind: MediaKind,
}

/// Path segment that marks a URL as a video asset.
///
/// The blob store writes videos under a `video/` directory, so their URLs
/// carry this marker. An external convention: the scanner only reads it.
pub const VIDEO_URL_SEGMENT: &str = "/video/";

impl MediaItem {
    /// Build an item from a URL, inferring the kind from its path.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let kind = if url.contains(VIDEO_URL_SEGMENT) {
            MediaKind::Video
        } else {
            MediaKind::Image
        };
        Self { url, kind }
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

/// Progress of a batch scan after one item was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    /// Items processed so far (1-based once the first item completes).
    pub processed: usize,
    /// Total items in the scan.
    pub total: usize,
}

impl ScanProgress {
    /// Completion as a percentage in [0, 100]; exactly 100 after the last item.
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            100.0
        } else {
            (self.processed as f32 / self.total as f32) * 100.0
        }
    }
}

/// Result of one batch scan: the matched subset plus scan bookkeeping.
///
/// Ephemeral — recomputed on every filter run, owned by the invocation that
/// produced it.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Matched items, in the same relative order as the input list.
    pub matched: Vec<MediaItem>,
    /// Items processed (equals the input length unless cancelled).
    pub items_scanned: usize,
    /// Videos skipped without classification.
    pub videos_skipped: usize,
    /// Images that failed to fetch, decode, or run through detection.
    pub failed_items: usize,
    /// True when the scan stopped early via the cancel flag.
    pub cancelled: bool,
}

impl ScanOutcome {
    pub fn matched_count(&self) -> usize {
        self.matched.len()
    }

    /// Number of images actually attempted (scanned items minus skipped videos).
    pub fn images_attempted(&self) -> usize {
        self.items_scanned - self.videos_skipped
    }

    /// True when every attempted image failed — zero matches in that case is
    /// indistinguishable from "nobody's face matched" unless the caller warns.
    pub fn all_items_failed(&self) -> bool {
        self.images_attempted() > 0 && self.failed_items == self.images_attempted()
    }
}
