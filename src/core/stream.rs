//! One reviewable video stream: decode cursor, offset, and annotation stores.

use std::path::{Path, PathBuf};

use super::annotations::{AnnotationSource, AnnotationStore, BoundingBox};
use super::render::FrameBuffer;
use super::source::{SourceError, SourceOpener, VideoSource};

/// Stream errors
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Stream unavailable ({path}): {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: SourceError,
    },
}

/// Frame kept from the most recent successful decode
#[derive(Debug, Clone)]
struct CachedFrame {
    local_index: u64,
    buffer: FrameBuffer,
}

/// A named video stream aligned to the global timeline by `offset`.
///
/// The decode cursor is owned here and released when the handle drops.
pub struct StreamHandle {
    name: String,
    offset: i64,
    frame_count: u64,
    source: Box<dyn VideoSource>,
    /// Local index the next `advance_decode` will produce; `None` once a
    /// failed seek or decode leaves the backend position unknown
    cursor: Option<u64>,
    ground_truth: AnnotationStore,
    detector: AnnotationStore,
    selected: AnnotationSource,
    last_frame: Option<CachedFrame>,
    decode_count: u64,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("frame_count", &self.frame_count)
            .field("cursor", &self.cursor)
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    /// Open `video` and load both annotation files (missing files are empty).
    pub fn open(
        name: impl Into<String>,
        video: &Path,
        ground_truth: &Path,
        detector: &Path,
        offset: i64,
        opener: &dyn SourceOpener,
    ) -> Result<Self, StreamError> {
        let source = opener.open(video).map_err(|source| StreamError::Unavailable {
            path: video.to_path_buf(),
            source,
        })?;
        Ok(Self::with_source(
            name,
            source,
            AnnotationStore::load(ground_truth),
            AnnotationStore::load(detector),
            offset,
        ))
    }

    /// Wrap an already-open source.
    pub fn with_source(
        name: impl Into<String>,
        source: Box<dyn VideoSource>,
        ground_truth: AnnotationStore,
        detector: AnnotationStore,
        offset: i64,
    ) -> Self {
        let frame_count = source.frame_count();
        Self {
            name: name.into(),
            offset,
            frame_count,
            source,
            cursor: Some(0),
            ground_truth,
            detector,
            selected: AnnotationSource::GroundTruth,
            last_frame: None,
            decode_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Local frame for `global`, or `None` when this stream has no frame there.
    pub fn local_index(&self, global: i64) -> Option<u64> {
        let local = global.checked_sub(self.offset)?;
        (local >= 0 && (local as u64) < self.frame_count).then_some(local as u64)
    }

    /// Last global index this stream covers (may be negative for empty streams).
    /// Saturates instead of overflowing for extreme offsets.
    pub fn last_global_index(&self) -> i64 {
        let last_local = i64::try_from(self.frame_count).unwrap_or(i64::MAX) - 1;
        last_local.saturating_add(self.offset)
    }

    /// Move the decode cursor to `local_index`, clamped into the stream.
    ///
    /// The cached frame is dropped; the next `advance_decode` produces fresh
    /// pixels at the new position. A seek onto the current cursor skips the
    /// backend seek. Returns false when the cursor could not be positioned,
    /// in which case nothing should be decoded for this instant.
    pub fn seek_local(&mut self, local_index: i64) -> bool {
        self.last_frame = None;
        if self.frame_count == 0 {
            return false;
        }
        let last = i64::try_from(self.frame_count).unwrap_or(i64::MAX) - 1;
        let target = local_index.clamp(0, last) as u64;
        if self.cursor == Some(target) {
            return true;
        }
        log::debug!("{}: seek {:?} -> {}", self.name, self.cursor, target);
        match self.source.seek(target) {
            Ok(()) => {
                self.cursor = Some(target);
                true
            }
            Err(e) => {
                log::warn!("{}: seek to {target} failed: {e}", self.name);
                self.cursor = None;
                false
            }
        }
    }

    /// Decode exactly one frame at the cursor and advance it.
    /// End of stream and decode errors both yield `None`, as does an
    /// unknown cursor (no decode is issued until a seek repositions it).
    pub fn advance_decode(&mut self) -> Option<&FrameBuffer> {
        let Some(local_index) = self.cursor else {
            log::debug!("{}: cursor unknown, decode skipped", self.name);
            self.last_frame = None;
            return None;
        };
        self.decode_count += 1;
        match self.source.decode_next() {
            Ok(Some(buffer)) => {
                self.cursor = Some(local_index + 1);
                self.last_frame = Some(CachedFrame { local_index, buffer });
            }
            Ok(None) => {
                log::debug!("{}: decode exhausted at {local_index}", self.name);
                self.last_frame = None;
            }
            Err(e) => {
                log::warn!("{}: decode failed at {local_index}: {e}", self.name);
                // Backends differ in whether the damaged frame was consumed
                self.cursor = None;
                self.last_frame = None;
            }
        }
        self.last_frame()
    }

    /// Frame from the most recent successful decode, if still valid.
    pub fn last_frame(&self) -> Option<&FrameBuffer> {
        self.last_frame.as_ref().map(|c| &c.buffer)
    }

    /// Local index of the cached frame.
    pub fn last_frame_index(&self) -> Option<u64> {
        self.last_frame.as_ref().map(|c| c.local_index)
    }

    /// Drop the cached frame (out-of-range instants).
    pub fn clear_last_frame(&mut self) {
        self.last_frame = None;
    }

    pub fn select_annotation_source(&mut self, which: AnnotationSource) {
        self.selected = which;
    }

    pub fn annotation_source(&self) -> AnnotationSource {
        self.selected
    }

    pub fn store(&self, which: AnnotationSource) -> &AnnotationStore {
        match which {
            AnnotationSource::GroundTruth => &self.ground_truth,
            AnnotationSource::Detector => &self.detector,
        }
    }

    /// Boxes for `local_index` from the selected store.
    pub fn boxes(&self, local_index: u64) -> &[BoundingBox] {
        self.store(self.selected).lookup(local_index)
    }

    /// Number of decode calls issued so far.
    pub fn decode_count(&self) -> u64 {
        self.decode_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::StubVideoSource;

    fn stream(frames: u64, offset: i64) -> StreamHandle {
        StreamHandle::with_source(
            "cam",
            Box::new(StubVideoSource::new(8, 8, frames)),
            AnnotationStore::from_records(["3,1,0,0,2,2"]),
            AnnotationStore::from_records(["3,9,1,1,2,2", "3,8,4,4,2,2"]),
            offset,
        )
    }

    fn decoded_index(s: &mut StreamHandle) -> Option<u64> {
        s.advance_decode().map(StubVideoSource::frame_index_of)
    }

    #[test]
    fn test_local_index_applies_offset() {
        let s = stream(100, 5);
        assert_eq!(s.local_index(10), Some(5));
        assert_eq!(s.local_index(4), None);
        assert_eq!(s.local_index(105), None);
        assert_eq!(s.local_index(104), Some(99));
        assert_eq!(s.last_global_index(), 104);

        let s = stream(100, -3);
        assert_eq!(s.local_index(10), Some(13));
        assert_eq!(s.local_index(-3), Some(0));
    }

    #[test]
    fn test_seek_then_decode() {
        let mut s = stream(50, 0);
        s.seek_local(20);
        assert!(s.last_frame().is_none());
        assert_eq!(decoded_index(&mut s), Some(20));
        assert_eq!(s.last_frame_index(), Some(20));
        assert_eq!(decoded_index(&mut s), Some(21));
    }

    #[test]
    fn test_seek_clamps() {
        let mut s = stream(10, 0);
        s.seek_local(500);
        assert_eq!(decoded_index(&mut s), Some(9));
        s.seek_local(-7);
        assert_eq!(decoded_index(&mut s), Some(0));
    }

    #[test]
    fn test_decode_past_end_is_absent() {
        let mut s = stream(2, 0);
        assert!(s.advance_decode().is_some());
        assert!(s.advance_decode().is_some());
        assert!(s.advance_decode().is_none());
        assert!(s.last_frame().is_none());
        assert_eq!(s.decode_count(), 3);
    }

    #[test]
    fn test_corrupt_frame_is_absent_and_skipped() {
        let mut s = StreamHandle::with_source(
            "cam",
            Box::new(StubVideoSource::new(4, 4, 5).with_corrupt_frame(1)),
            AnnotationStore::empty(),
            AnnotationStore::empty(),
            0,
        );
        assert_eq!(decoded_index(&mut s), Some(0));
        assert_eq!(decoded_index(&mut s), None);
        assert!(s.seek_local(2));
        assert_eq!(decoded_index(&mut s), Some(2));
    }

    #[test]
    fn test_stalled_decode_forces_reseek() {
        let mut s = StreamHandle::with_source(
            "cam",
            Box::new(StubVideoSource::new(4, 4, 20).with_stalled_frame(10)),
            AnnotationStore::empty(),
            AnnotationStore::empty(),
            0,
        );
        assert!(s.seek_local(10));
        assert_eq!(decoded_index(&mut s), None);

        // The backend is still parked on 10; moving on to 11 must reposition it
        assert!(s.seek_local(11));
        assert_eq!(decoded_index(&mut s), Some(11));
        assert_eq!(s.last_frame_index(), Some(11));
        assert_eq!(decoded_index(&mut s), Some(12));
    }

    #[test]
    fn test_failed_seek_decodes_nothing() {
        let mut s = StreamHandle::with_source(
            "cam",
            Box::new(StubVideoSource::new(4, 4, 100).with_failing_seek()),
            AnnotationStore::empty(),
            AnnotationStore::empty(),
            0,
        );
        assert!(!s.seek_local(50));
        let count = s.decode_count();
        assert!(s.advance_decode().is_none());
        assert!(s.last_frame().is_none());
        assert_eq!(s.decode_count(), count);
    }

    #[test]
    fn test_last_global_index_saturates() {
        let s = stream(100, i64::MAX);
        assert_eq!(s.last_global_index(), i64::MAX);
        assert_eq!(s.local_index(i64::MAX), Some(0));
        assert_eq!(s.local_index(0), None);
        assert_eq!(stream(0, i64::MIN).last_global_index(), i64::MIN);
    }

    #[test]
    fn test_select_annotation_source() {
        let mut s = stream(10, 0);
        assert_eq!(s.annotation_source(), AnnotationSource::GroundTruth);
        assert_eq!(s.boxes(3).len(), 1);

        s.select_annotation_source(AnnotationSource::Detector);
        let ids: Vec<i64> = s.boxes(3).iter().map(|b| b.object_id).collect();
        assert_eq!(ids, vec![9, 8]);
        assert!(s.boxes(4).is_empty());
    }

    #[test]
    fn test_select_source_keeps_decoded_pixels() {
        let mut s = stream(10, 0);
        s.advance_decode();
        let before = s.last_frame().cloned();
        let count = s.decode_count();
        s.select_annotation_source(AnnotationSource::Detector);
        assert_eq!(s.last_frame().cloned(), before);
        assert_eq!(s.decode_count(), count);
    }

    #[test]
    fn test_open_unavailable() {
        let opener = |_: &Path| -> Result<Box<dyn VideoSource>, SourceError> {
            Err(SourceError::Unsupported)
        };
        let err = StreamHandle::open(
            "cam",
            Path::new("cam/vdo.avi"),
            Path::new("cam/gt/gt.txt"),
            Path::new("cam/det/det.txt"),
            0,
            &opener,
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::Unavailable { .. }));
    }
}
