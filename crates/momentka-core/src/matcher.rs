//! The batch match filter.
//!
//! Scans every media item of an event in order, compares each photo's faces
//! against one reference descriptor, and collects the matching subset. Videos
//! are skipped, per-item failures are logged and counted but never abort the
//! scan, and progress advances after every item.

use crate::provider::{FacePipeline, ProviderError};
use crate::types::{Descriptor, MediaItem, ScanOutcome, ScanProgress};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Maximum descriptor distance at which two faces count as the same person.
///
/// Euclidean, lower = more similar. This constant directly sets the
/// false-positive/false-negative trade-off of the whole filter; 0.6 is the
/// established operating point for 128-d descriptors.
pub const MATCH_DISTANCE_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("failed to load detection models: {0}")]
    ModelLoad(#[from] ProviderError),
}

/// Error fetching one media asset. Only ever logged; a fetch failure counts
/// the item as a no-match and the scan moves on.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct FetchError(String);

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Supplies the raw bytes behind a media URL.
///
/// The seam between the scan loop and actual I/O — the store crate implements
/// it over http(s) and the filesystem, tests substitute canned bytes.
pub trait MediaSource {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Shared cancellation flag, checked before each item of a scan.
///
/// Tripping it makes the scan return early with the matches found so far;
/// it never interrupts an item that is already running inference.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why one item was counted as failed instead of classified.
#[derive(Error, Debug)]
enum ItemFailure {
    #[error("fetch: {0}")]
    Fetch(FetchError),
    #[error("decode: {0}")]
    Decode(image::ImageError),
    #[error("detection: {0}")]
    Detection(ProviderError),
}

/// Sequential face-match scan over an event's media list.
pub struct BatchMatcher {
    threshold: f32,
}

impl Default for BatchMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchMatcher {
    pub fn new() -> Self {
        Self {
            threshold: MATCH_DISTANCE_THRESHOLD,
        }
    }

    /// A matcher with a non-default distance threshold.
    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Run the scan.
    ///
    /// Items are processed strictly in input order, one at a time — the
    /// inference backend is not safe to invoke concurrently and progress
    /// assumes ordered completion. `on_progress` fires after every item with
    /// monotonically non-decreasing values, reaching 100% on the last item.
    /// Matched items keep their relative input order.
    ///
    /// Fails only when the models cannot be loaded, before any progress is
    /// reported. Everything after that always produces an outcome: videos are
    /// skipped, broken items are counted as no-match, and a tripped cancel
    /// flag returns the partial outcome with `cancelled` set.
    pub fn run<P, S>(
        &self,
        pipeline: &mut P,
        source: &mut S,
        items: &[MediaItem],
        reference: &Descriptor,
        cancel: &CancelFlag,
        mut on_progress: impl FnMut(ScanProgress),
    ) -> Result<ScanOutcome, FilterError>
    where
        P: FacePipeline + ?Sized,
        S: MediaSource + ?Sized,
    {
        pipeline.ensure_ready()?;

        let total = items.len();
        let mut outcome = ScanOutcome::default();

        tracing::info!(total, threshold = self.threshold, "batch scan started");

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    processed = outcome.items_scanned,
                    matched = outcome.matched_count(),
                    "scan cancelled, returning partial outcome"
                );
                outcome.cancelled = true;
                return Ok(outcome);
            }

            if item.is_video() {
                outcome.videos_skipped += 1;
                tracing::debug!(url = %item.url, "skipping video");
            } else {
                match self.classify(pipeline, source, item, reference) {
                    Ok(true) => outcome.matched.push(item.clone()),
                    Ok(false) => {}
                    Err(failure) => {
                        outcome.failed_items += 1;
                        tracing::warn!(
                            url = %item.url,
                            error = %failure,
                            "item failed, counting as no-match"
                        );
                    }
                }
            }

            outcome.items_scanned = index + 1;
            on_progress(ScanProgress {
                processed: index + 1,
                total,
            });
        }

        tracing::info!(
            matched = outcome.matched_count(),
            failed = outcome.failed_items,
            videos_skipped = outcome.videos_skipped,
            "batch scan complete"
        );

        Ok(outcome)
    }

    /// Fetch, decode, and classify one photo.
    ///
    /// A photo matches when **any** of its detected faces sits below the
    /// distance threshold — one familiar face among strangers is enough.
    fn classify<P, S>(
        &self,
        pipeline: &mut P,
        source: &mut S,
        item: &MediaItem,
        reference: &Descriptor,
    ) -> Result<bool, ItemFailure>
    where
        P: FacePipeline + ?Sized,
        S: MediaSource + ?Sized,
    {
        let bytes = source.fetch(&item.url).map_err(ItemFailure::Fetch)?;
        let image = image::load_from_memory(&bytes)
            .map_err(ItemFailure::Decode)?
            .to_rgb8();

        let faces = pipeline
            .detect_faces(&image)
            .map_err(ItemFailure::Detection)?;

        let best = faces
            .iter()
            .map(|face| face.descriptor.distance(reference))
            .fold(f32::INFINITY, f32::min);

        tracing::debug!(
            url = %item.url,
            faces = faces.len(),
            best_distance = best,
            "photo classified"
        );

        Ok(best < self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::types::{BoundingBox, DetectedFace, MediaKind};
    use image::RgbImage;
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Pipeline returning scripted face lists, one per detection call.
    struct StubPipeline {
        ready: bool,
        responses: VecDeque<Vec<DetectedFace>>,
        detect_calls: usize,
    }

    impl StubPipeline {
        fn with_responses(responses: Vec<Vec<DetectedFace>>) -> Self {
            Self {
                ready: true,
                responses: responses.into(),
                detect_calls: 0,
            }
        }

        fn failing_load() -> Self {
            Self {
                ready: false,
                responses: VecDeque::new(),
                detect_calls: 0,
            }
        }
    }

    impl FacePipeline for StubPipeline {
        fn ensure_ready(&mut self) -> Result<(), ProviderError> {
            if self.ready {
                Ok(())
            } else {
                Err(ProviderError::Detector(DetectorError::ModelNotFound(
                    "stub".into(),
                )))
            }
        }

        fn detect_faces(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
            self.detect_calls += 1;
            Ok(self.responses.pop_front().unwrap_or_default())
        }
    }

    /// Source with per-URL canned bytes; unknown URLs fail to fetch.
    struct StubSource {
        bytes: HashMap<String, Vec<u8>>,
    }

    impl StubSource {
        fn serving(urls: &[&str]) -> Self {
            let png = png_bytes();
            Self {
                bytes: urls.iter().map(|u| (u.to_string(), png.clone())).collect(),
            }
        }

        fn empty() -> Self {
            Self {
                bytes: HashMap::new(),
            }
        }
    }

    impl MediaSource for StubSource {
        fn fetch(&mut self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.bytes
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::new(format!("no bytes for {url}")))
        }
    }

    fn png_bytes() -> Vec<u8> {
        let image = image::DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn face_with(values: Vec<f32>) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 40.0,
                height: 40.0,
                confidence: 0.9,
                landmarks: None,
            },
            descriptor: Descriptor::new(values),
        }
    }

    fn items(urls: &[&str]) -> Vec<MediaItem> {
        urls.iter().map(|u| MediaItem::from_url(*u)).collect()
    }

    #[test]
    fn test_scenario_one_match_one_stranger_one_video() {
        // [imgA (reference face), imgB (no face), video1, imgC (other face)]
        let reference = Descriptor::new(vec![1.0, 0.0]);
        let list = items(&[
            "https://host/image/a.jpg",
            "https://host/image/b.jpg",
            "https://host/video/c.mp4",
            "https://host/image/d.jpg",
        ]);
        let mut source = StubSource::serving(&[
            "https://host/image/a.jpg",
            "https://host/image/b.jpg",
            "https://host/image/d.jpg",
        ]);
        // Detection runs for the three images only, in order.
        let mut pipeline = StubPipeline::with_responses(vec![
            vec![face_with(vec![1.0, 0.1])], // distance 0.1 — match
            vec![],
            vec![face_with(vec![0.0, 1.0])], // distance ~1.41 — stranger
        ]);

        let mut percents = Vec::new();
        let outcome = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |p| percents.push(p.percent()),
            )
            .unwrap();

        assert_eq!(outcome.matched_count(), 1);
        assert_eq!(outcome.matched[0].url, "https://host/image/a.jpg");
        assert_eq!(outcome.videos_skipped, 1);
        assert_eq!(outcome.failed_items, 0);
        assert!(!outcome.cancelled);
        assert_eq!(percents, vec![25.0, 50.0, 75.0, 100.0]);
        assert_eq!(pipeline.detect_calls, 3, "videos never reach detection");
    }

    #[test]
    fn test_matches_preserve_input_order() {
        let reference = Descriptor::new(vec![0.0]);
        let list = items(&[
            "https://host/image/1.jpg",
            "https://host/image/2.jpg",
            "https://host/image/3.jpg",
        ]);
        let mut source =
            StubSource::serving(&["https://host/image/1.jpg", "https://host/image/2.jpg", "https://host/image/3.jpg"]);
        let mut pipeline = StubPipeline::with_responses(vec![
            vec![face_with(vec![0.1])],
            vec![face_with(vec![5.0])],
            vec![face_with(vec![0.2])],
        ]);

        let outcome = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap();

        let urls: Vec<&str> = outcome.matched.iter().map(|m| m.url.as_str()).collect();
        assert_eq!(urls, vec!["https://host/image/1.jpg", "https://host/image/3.jpg"]);
    }

    #[test]
    fn test_any_face_below_threshold_matches_photo() {
        // The photo holds a crowd; one face close to the reference is enough.
        let reference = Descriptor::new(vec![1.0, 0.0]);
        let list = items(&["https://host/image/group.jpg"]);
        let mut source = StubSource::serving(&["https://host/image/group.jpg"]);
        let mut pipeline = StubPipeline::with_responses(vec![vec![
            face_with(vec![0.0, 1.0]),
            face_with(vec![-1.0, 0.0]),
            face_with(vec![1.0, 0.05]),
        ]]);

        let outcome = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap();

        assert_eq!(outcome.matched_count(), 1);
    }

    #[test]
    fn test_distance_at_threshold_is_not_a_match() {
        let reference = Descriptor::new(vec![0.0]);
        let list = items(&["https://host/image/edge.jpg"]);
        let mut source = StubSource::serving(&["https://host/image/edge.jpg"]);
        // Distance exactly 0.6: below-threshold means strictly below.
        let mut pipeline = StubPipeline::with_responses(vec![vec![face_with(vec![0.6])]]);

        let outcome = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap();

        assert_eq!(outcome.matched_count(), 0);
    }

    #[test]
    fn test_videos_never_match_regardless_of_descriptor() {
        let reference = Descriptor::new(vec![0.0]);
        let list = items(&["https://host/video/a.mp4", "https://host/video/b.mp4"]);
        let mut source = StubSource::empty();
        let mut pipeline = StubPipeline::with_responses(vec![]);

        let outcome = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap();

        assert!(outcome.matched.is_empty());
        assert_eq!(outcome.videos_skipped, 2);
        assert_eq!(outcome.items_scanned, 2);
        assert_eq!(pipeline.detect_calls, 0);
    }

    #[test]
    fn test_model_load_failure_reports_no_progress() {
        let reference = Descriptor::new(vec![0.0]);
        let list = items(&["https://host/image/a.jpg"]);
        let mut source = StubSource::serving(&["https://host/image/a.jpg"]);
        let mut pipeline = StubPipeline::failing_load();

        let mut progress_events = 0usize;
        let err = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |_| progress_events += 1,
            )
            .unwrap_err();

        assert!(matches!(err, FilterError::ModelLoad(_)));
        assert_eq!(progress_events, 0);
    }

    #[test]
    fn test_empty_list_completes_immediately() {
        let reference = Descriptor::new(vec![0.0]);
        let mut source = StubSource::empty();
        let mut pipeline = StubPipeline::with_responses(vec![]);

        let mut progress_events = 0usize;
        let outcome = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &[],
                &reference,
                &CancelFlag::new(),
                |_| progress_events += 1,
            )
            .unwrap();

        assert!(outcome.matched.is_empty());
        assert_eq!(outcome.items_scanned, 0);
        assert_eq!(progress_events, 0);
    }

    #[test]
    fn test_progress_is_monotonic_and_ends_at_100() {
        let reference = Descriptor::new(vec![0.0]);
        let urls = [
            "https://host/image/1.jpg",
            "https://host/video/2.mp4",
            "https://host/image/3.jpg",
            "https://host/image/4.jpg",
            "https://host/image/5.jpg",
        ];
        let list = items(&urls);
        let mut source = StubSource::serving(&urls);
        let mut pipeline = StubPipeline::with_responses(vec![vec![], vec![], vec![], vec![]]);

        let mut percents = Vec::new();
        BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |p| percents.push(p.percent()),
            )
            .unwrap();

        assert_eq!(percents.len(), list.len());
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*percents.last().unwrap(), 100.0);
    }

    #[test]
    fn test_bad_item_does_not_abort_batch() {
        let reference = Descriptor::new(vec![0.0]);
        let list = items(&[
            "https://host/image/gone.jpg", // fetch fails
            "https://host/image/ok.jpg",
        ]);
        let mut source = StubSource::serving(&["https://host/image/ok.jpg"]);
        let mut pipeline = StubPipeline::with_responses(vec![vec![face_with(vec![0.1])]]);

        let outcome = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap();

        assert_eq!(outcome.failed_items, 1);
        assert_eq!(outcome.matched_count(), 1);
        assert_eq!(outcome.matched[0].url, "https://host/image/ok.jpg");
        assert_eq!(outcome.items_scanned, 2);
    }

    #[test]
    fn test_corrupt_bytes_count_as_failure() {
        let reference = Descriptor::new(vec![0.0]);
        let list = items(&["https://host/image/corrupt.jpg"]);
        let mut source = StubSource::empty();
        source
            .bytes
            .insert("https://host/image/corrupt.jpg".into(), b"not an image".to_vec());
        let mut pipeline = StubPipeline::with_responses(vec![]);

        let outcome = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap();

        assert_eq!(outcome.failed_items, 1);
        assert_eq!(pipeline.detect_calls, 0, "corrupt bytes never reach detection");
    }

    #[test]
    fn test_every_item_failing_sets_aggregate_flag() {
        let reference = Descriptor::new(vec![0.0]);
        let list = items(&["https://host/image/a.jpg", "https://host/image/b.jpg"]);
        let mut source = StubSource::empty();
        let mut pipeline = StubPipeline::with_responses(vec![]);

        let outcome = BatchMatcher::new()
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap();

        assert!(outcome.all_items_failed());
        assert_eq!(outcome.matched_count(), 0);
    }

    #[test]
    fn test_cancel_returns_partial_outcome() {
        let reference = Descriptor::new(vec![0.0]);
        let urls = [
            "https://host/image/1.jpg",
            "https://host/image/2.jpg",
            "https://host/image/3.jpg",
        ];
        let list = items(&urls);
        let mut source = StubSource::serving(&urls);
        let mut pipeline = StubPipeline::with_responses(vec![
            vec![face_with(vec![0.1])],
            vec![face_with(vec![0.1])],
            vec![face_with(vec![0.1])],
        ]);

        let cancel = CancelFlag::new();
        let trip_after = cancel.clone();
        let mut seen = 0usize;
        let outcome = BatchMatcher::new()
            .run(&mut pipeline, &mut source, &list, &reference, &cancel, |_| {
                seen += 1;
                if seen == 2 {
                    trip_after.cancel();
                }
            })
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.items_scanned, 2);
        assert_eq!(outcome.matched_count(), 2, "matches so far are kept");
        assert_eq!(pipeline.detect_calls, 2, "no detection after the flag trips");
    }

    #[test]
    fn test_custom_threshold() {
        let reference = Descriptor::new(vec![0.0]);
        let list = items(&["https://host/image/near.jpg"]);
        let mut source = StubSource::serving(&["https://host/image/near.jpg"]);
        // Distance 0.8: stranger at the default threshold, match at 0.9.
        let mut pipeline = StubPipeline::with_responses(vec![vec![face_with(vec![0.8])]]);

        let outcome = BatchMatcher::with_threshold(0.9)
            .run(
                &mut pipeline,
                &mut source,
                &list,
                &reference,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap();

        assert_eq!(outcome.matched_count(), 1);
    }

    #[test]
    fn test_same_inputs_same_matches() {
        let reference = Descriptor::new(vec![1.0, 0.0]);
        let urls = ["https://host/image/a.jpg", "https://host/image/b.jpg"];
        let list = items(&urls);

        let run = || {
            let mut source = StubSource::serving(&urls);
            let mut pipeline = StubPipeline::with_responses(vec![
                vec![face_with(vec![1.0, 0.1])],
                vec![face_with(vec![0.0, 1.0])],
            ]);
            BatchMatcher::new()
                .run(
                    &mut pipeline,
                    &mut source,
                    &list,
                    &reference,
                    &CancelFlag::new(),
                    |_| {},
                )
                .unwrap()
        };

        let first = run();
        let second = run();
        assert_eq!(first.matched, second.matched);
        assert_eq!(first.matched_count(), 1);
    }

    #[test]
    fn test_video_kind_inferred_from_url() {
        let item = MediaItem::from_url("https://host/blobs/video/clip.mp4");
        assert_eq!(item.kind, MediaKind::Video);
    }
}
