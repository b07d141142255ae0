//! Reference descriptor extraction.
//!
//! Turns one reference image — an uploaded photo or a live camera frame —
//! into exactly one descriptor for the batch scan to compare against.

use crate::provider::{FacePipeline, ProviderError};
use crate::types::Descriptor;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("could not decode reference image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face found in the reference image — choose a photo with a clear face")]
    NoFaceFound,
    #[error("model pipeline: {0}")]
    Model(#[from] ProviderError),
}

/// Extract the descriptor of the most prominent face in a reference image.
///
/// The image is decoded fully before detection. No retry on failure; the
/// caller decides whether to let the user pick another image.
pub fn extract_descriptor<P: FacePipeline + ?Sized>(
    pipeline: &mut P,
    image_bytes: &[u8],
) -> Result<Descriptor, ExtractError> {
    let image = image::load_from_memory(image_bytes)?.to_rgb8();
    extract_from_image(pipeline, &image)
}

/// Same as [`extract_descriptor`] for an already-decoded image.
pub fn extract_from_image<P: FacePipeline + ?Sized>(
    pipeline: &mut P,
    image: &RgbImage,
) -> Result<Descriptor, ExtractError> {
    pipeline.ensure_ready()?;

    let faces = pipeline.detect_faces(image)?;
    tracing::debug!(faces = faces.len(), "reference image scanned");

    faces
        .into_iter()
        .next()
        .map(|face| face.descriptor)
        .ok_or(ExtractError::NoFaceFound)
}

/// Phase of a live-camera reference scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Still running detection on incoming frames.
    WaitingForFace,
    /// A face was found; its descriptor is waiting to be taken.
    FaceFound,
    /// The descriptor was handed out; the scan is finished.
    Done,
}

/// Cooperative polling state machine for camera capture:
/// `WaitingForFace → FaceFound → Done`.
///
/// Driven once per captured frame. Detection runs only while waiting; after
/// the first success the phase is terminal and later polls never touch the
/// pipeline again, no matter how many frames keep arriving.
pub struct ReferenceScan {
    phase: ScanPhase,
    descriptor: Option<Descriptor>,
}

impl ReferenceScan {
    pub fn new() -> Self {
        Self {
            phase: ScanPhase::WaitingForFace,
            descriptor: None,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Feed one frame. Returns the phase after this poll.
    pub fn poll<P: FacePipeline + ?Sized>(
        &mut self,
        pipeline: &mut P,
        frame: &RgbImage,
    ) -> Result<ScanPhase, ProviderError> {
        if self.phase != ScanPhase::WaitingForFace {
            // Terminal guard: a later frame can never restart the scan.
            return Ok(self.phase);
        }

        let faces = pipeline.detect_faces(frame)?;
        if let Some(face) = faces.into_iter().next() {
            tracing::debug!(confidence = face.bbox.confidence, "reference face found");
            self.descriptor = Some(face.descriptor);
            self.phase = ScanPhase::FaceFound;
        }

        Ok(self.phase)
    }

    /// Take the found descriptor, moving `FaceFound → Done`.
    ///
    /// Returns `None` while still waiting, and forever after the descriptor
    /// was already taken.
    pub fn take_descriptor(&mut self) -> Option<Descriptor> {
        if self.phase == ScanPhase::FaceFound {
            self.phase = ScanPhase::Done;
            self.descriptor.take()
        } else {
            None
        }
    }
}

impl Default for ReferenceScan {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::types::{BoundingBox, DetectedFace};
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Scripted pipeline: pops one canned response per detection call.
    struct StubPipeline {
        ready: Result<(), ()>,
        responses: VecDeque<Vec<DetectedFace>>,
        detect_calls: usize,
    }

    impl StubPipeline {
        fn with_responses(responses: Vec<Vec<DetectedFace>>) -> Self {
            Self {
                ready: Ok(()),
                responses: responses.into(),
                detect_calls: 0,
            }
        }

        fn failing_load() -> Self {
            Self {
                ready: Err(()),
                responses: VecDeque::new(),
                detect_calls: 0,
            }
        }
    }

    impl FacePipeline for StubPipeline {
        fn ensure_ready(&mut self) -> Result<(), ProviderError> {
            self.ready.map_err(|_| {
                ProviderError::Detector(DetectorError::ModelNotFound("stub".into()))
            })
        }

        fn detect_faces(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
            self.detect_calls += 1;
            Ok(self.responses.pop_front().unwrap_or_default())
        }
    }

    fn face_with(values: Vec<f32>) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 50.0,
                height: 50.0,
                confidence: 0.9,
                landmarks: None,
            },
            descriptor: Descriptor::new(values),
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = image::DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_extract_returns_most_prominent_descriptor() {
        let mut pipeline = StubPipeline::with_responses(vec![vec![
            face_with(vec![1.0, 0.0]),
            face_with(vec![0.0, 1.0]),
        ]]);
        let descriptor = extract_descriptor(&mut pipeline, &png_bytes(8, 8)).unwrap();
        assert_eq!(descriptor, Descriptor::new(vec![1.0, 0.0]));
    }

    #[test]
    fn test_extract_no_face_found() {
        let mut pipeline = StubPipeline::with_responses(vec![vec![]]);
        let err = extract_descriptor(&mut pipeline, &png_bytes(8, 8)).unwrap_err();
        assert!(matches!(err, ExtractError::NoFaceFound));
    }

    #[test]
    fn test_extract_bad_image_bytes() {
        let mut pipeline = StubPipeline::with_responses(vec![]);
        let err = extract_descriptor(&mut pipeline, b"not an image").unwrap_err();
        assert!(matches!(err, ExtractError::Decode(_)));
        assert_eq!(pipeline.detect_calls, 0, "detection must not run on decode failure");
    }

    #[test]
    fn test_extract_model_load_failure() {
        let mut pipeline = StubPipeline::failing_load();
        let err = extract_descriptor(&mut pipeline, &png_bytes(8, 8)).unwrap_err();
        assert!(matches!(err, ExtractError::Model(_)));
    }

    #[test]
    fn test_reference_scan_waits_then_finds() {
        let mut pipeline = StubPipeline::with_responses(vec![
            vec![],
            vec![],
            vec![face_with(vec![0.5, 0.5])],
        ]);
        let frame = RgbImage::new(4, 4);
        let mut scan = ReferenceScan::new();

        assert_eq!(scan.poll(&mut pipeline, &frame).unwrap(), ScanPhase::WaitingForFace);
        assert_eq!(scan.poll(&mut pipeline, &frame).unwrap(), ScanPhase::WaitingForFace);
        assert_eq!(scan.poll(&mut pipeline, &frame).unwrap(), ScanPhase::FaceFound);

        let descriptor = scan.take_descriptor().expect("descriptor available");
        assert_eq!(descriptor, Descriptor::new(vec![0.5, 0.5]));
        assert_eq!(scan.phase(), ScanPhase::Done);
    }

    #[test]
    fn test_reference_scan_terminal_guard() {
        let mut pipeline = StubPipeline::with_responses(vec![
            vec![face_with(vec![1.0])],
            // would be returned if detection ran again
            vec![face_with(vec![2.0])],
        ]);
        let frame = RgbImage::new(4, 4);
        let mut scan = ReferenceScan::new();

        assert_eq!(scan.poll(&mut pipeline, &frame).unwrap(), ScanPhase::FaceFound);

        // Later frames keep arriving; none of them reaches the pipeline.
        assert_eq!(scan.poll(&mut pipeline, &frame).unwrap(), ScanPhase::FaceFound);
        assert_eq!(scan.take_descriptor(), Some(Descriptor::new(vec![1.0])));
        assert_eq!(scan.poll(&mut pipeline, &frame).unwrap(), ScanPhase::Done);
        assert_eq!(pipeline.detect_calls, 1, "detection ran exactly once");

        // The descriptor is handed out exactly once.
        assert_eq!(scan.take_descriptor(), None);
    }
}
