//! Global timeline: one frame cursor shared by every stream.
//!
//! Each stream sees `local = global - offset`. Streams never diverge; an
//! advance moves all of them together.

use serde::{Deserialize, Serialize};

use super::annotations::AnnotationSource;
use super::render::{FrameCompositor, RenderedFrame};
use super::stream::StreamHandle;

/// Whether an update decodes new pixels or re-renders the cached ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateMode {
    /// Seek every stream to its local index and decode one frame
    Advance,
    /// Re-render the last decoded frames; never decodes. Boxes follow the
    /// requested index, so a Redraw at a moved index shows stale pixels.
    Redraw,
}

/// One stream's output for the current instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream: String,
    /// Local index shown, `None` when the stream has no frame at this instant
    pub local_index: Option<u64>,
    pub raster: RenderedFrame,
}

/// Synchronizes N streams against a single global frame index.
#[derive(Debug)]
pub struct Timeline {
    streams: Vec<StreamHandle>,
    global_index: i64,
    source: AnnotationSource,
    overlay_visible: bool,
}

impl Timeline {
    pub fn new(streams: Vec<StreamHandle>) -> Self {
        Self {
            streams,
            global_index: 0,
            source: AnnotationSource::GroundTruth,
            overlay_visible: true,
        }
    }

    pub fn streams(&self) -> &[StreamHandle] {
        &self.streams
    }

    pub fn stream(&self, name: &str) -> Option<&StreamHandle> {
        self.streams.iter().find(|s| s.name() == name)
    }

    pub fn global_index(&self) -> i64 {
        self.global_index
    }

    /// Highest global index any stream covers; 0 when no stream has frames.
    /// Only used for scrubber range and tick wrap-around.
    pub fn max_global_index(&self) -> i64 {
        self.streams
            .iter()
            .filter(|s| s.frame_count() > 0)
            .map(StreamHandle::last_global_index)
            .max()
            .unwrap_or(0)
            .max(0)
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    pub fn annotation_source(&self) -> AnnotationSource {
        self.source
    }

    pub fn set_overlay_visible(&mut self, visible: bool) {
        self.overlay_visible = visible;
    }

    /// Point every stream at the requested annotation store.
    pub fn set_annotation_source(&mut self, which: AnnotationSource) {
        self.source = which;
        for stream in &mut self.streams {
            stream.select_annotation_source(which);
        }
    }

    /// Move to `global_index` and render every stream.
    ///
    /// Out-of-range streams render blank without decoding. In `Advance`
    /// mode in-range streams seek directly to their local frame and decode
    /// it, so cost does not depend on seek distance.
    pub fn set_global_index(
        &mut self,
        global_index: i64,
        mode: UpdateMode,
        compositor: &FrameCompositor,
    ) -> Vec<StreamFrame> {
        self.global_index = global_index;
        let overlay = self.overlay_visible;

        self.streams
            .iter_mut()
            .map(|stream| {
                let local = stream.local_index(global_index);
                if mode == UpdateMode::Advance {
                    match local {
                        Some(local) => {
                            if stream.seek_local(local as i64) {
                                stream.advance_decode();
                            }
                        }
                        None => stream.clear_last_frame(),
                    }
                }

                let stream: &StreamHandle = stream;
                let frame = local.and_then(|_| stream.last_frame());
                let boxes = local.map(|l| stream.boxes(l)).unwrap_or(&[]);
                StreamFrame {
                    stream: stream.name().to_string(),
                    local_index: local,
                    raster: compositor.render(frame, boxes, overlay),
                }
            })
            .collect()
    }

    /// Advance one frame, wrapping to 0 when the next index falls outside
    /// `0..=max_global_index()`.
    pub fn tick(&mut self, compositor: &FrameCompositor) -> Vec<StreamFrame> {
        let max = self.max_global_index();
        let next = match self.global_index.checked_add(1) {
            Some(next) if (0..=max).contains(&next) => next,
            _ => 0,
        };
        self.set_global_index(next, UpdateMode::Advance, compositor)
    }
}
