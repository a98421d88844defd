//! Review session: the operations a UI calls into.
//!
//! A session is built from a folder of stream subdirectories and owns the
//! timeline, the playback controller, and the compositor. Every operation
//! returns a `FrameUpdate` listing a raster (or "unchanged") per stream;
//! the session never holds a reference to any display surface.
//!
//! Folder layout:
//! ```text
//! Scene/
//! ├── offsets.txt        (optional: "<stream> <offset>" per line)
//! ├── c001/
//! │   ├── vdo.avi
//! │   ├── gt/gt.txt      (optional)
//! │   └── det/det.txt    (optional)
//! └── c002/
//!     └── vdo.avi
//! ```

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use super::annotations::AnnotationSource;
use super::config::ReviewSettings;
use super::playback::{PlaybackController, PlaybackError, PlaybackState};
use super::render::FrameCompositor;
use super::source::SourceOpener;
use super::stream::{StreamError, StreamHandle};
use super::timeline::{StreamFrame, Timeline, UpdateMode};

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No valid streams found in {0}")]
    NoValidStreams(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Who moved the global index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateOrigin {
    /// A user seek or overlay change; the UI initiated it
    User,
    /// A playback tick; the UI should move its scrubber without seeking
    Playback,
}

/// Per-stream result of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Rendered(StreamFrame),
    Unchanged { stream: String },
}

impl StreamUpdate {
    pub fn stream(&self) -> &str {
        match self {
            StreamUpdate::Rendered(frame) => &frame.stream,
            StreamUpdate::Unchanged { stream } => stream,
        }
    }

    pub fn frame(&self) -> Option<&StreamFrame> {
        match self {
            StreamUpdate::Rendered(frame) => Some(frame),
            StreamUpdate::Unchanged { .. } => None,
        }
    }
}

/// Result of every session operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameUpdate {
    pub global_index: i64,
    pub origin: UpdateOrigin,
    pub streams: Vec<StreamUpdate>,
}

impl FrameUpdate {
    pub fn rendered(&self) -> impl Iterator<Item = &StreamFrame> {
        self.streams.iter().filter_map(StreamUpdate::frame)
    }

    pub fn is_unchanged(&self) -> bool {
        self.rendered().next().is_none()
    }
}

/// A stream subdirectory whose video could not be opened
#[derive(Debug)]
pub struct SkippedStream {
    pub name: String,
    pub error: StreamError,
}

pub struct ReviewSession {
    folder: Option<PathBuf>,
    timeline: Timeline,
    playback: PlaybackController,
    compositor: FrameCompositor,
    skipped: Vec<SkippedStream>,
}

impl ReviewSession {
    /// Open every stream subdirectory of `folder`.
    ///
    /// Streams whose video fails to open are skipped and reported through
    /// `skipped()`; the session fails only when none open.
    pub fn open(
        folder: &Path,
        settings: &ReviewSettings,
        opener: &dyn SourceOpener,
    ) -> Result<Self, SessionError> {
        if !folder.is_dir() {
            return Err(SessionError::NotADirectory(folder.display().to_string()));
        }

        let offsets = load_offsets(&folder.join(&settings.offsets_file_name));

        let mut names: Vec<String> = std::fs::read_dir(folder)?
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();

        let mut streams = Vec::new();
        let mut skipped = Vec::new();
        for name in names {
            let dir = folder.join(&name);
            let video = dir.join(&settings.video_file_name);
            if !video.is_file() {
                continue;
            }
            let offset = offsets.get(&name).copied().unwrap_or(0);
            match StreamHandle::open(
                name.clone(),
                &video,
                &dir.join(&settings.ground_truth_path),
                &dir.join(&settings.detector_path),
                offset,
                opener,
            ) {
                Ok(stream) => {
                    log::info!(
                        "Opened stream {name}: {} frames, offset {offset}",
                        stream.frame_count()
                    );
                    streams.push(stream);
                }
                Err(error) => {
                    log::warn!("Skipping stream {name}: {error}");
                    skipped.push(SkippedStream { name, error });
                }
            }
        }

        if streams.is_empty() {
            return Err(SessionError::NoValidStreams(folder.display().to_string()));
        }

        let mut session = Self::from_streams(streams, settings)?;
        session.folder = Some(folder.to_path_buf());
        session.skipped = skipped;
        log::info!(
            "Session ready: {} streams, global range 0..={}",
            session.timeline.streams().len(),
            session.timeline.max_global_index()
        );
        Ok(session)
    }

    /// Build a session from already-open streams.
    pub fn from_streams(
        streams: Vec<StreamHandle>,
        settings: &ReviewSettings,
    ) -> Result<Self, SessionError> {
        if streams.is_empty() {
            return Err(SessionError::NoValidStreams("<memory>".into()));
        }
        Ok(Self {
            folder: None,
            timeline: Timeline::new(streams),
            playback: PlaybackController::new(settings.tick_interval()),
            compositor: FrameCompositor::new(
                settings.output_width,
                settings.output_height,
                settings.overlay.clone(),
            ),
            skipped: Vec::new(),
        })
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    pub fn streams(&self) -> &[StreamHandle] {
        self.timeline.streams()
    }

    pub fn stream(&self, name: &str) -> Option<&StreamHandle> {
        self.timeline.stream(name)
    }

    pub fn skipped(&self) -> &[SkippedStream] {
        &self.skipped
    }

    pub fn global_index(&self) -> i64 {
        self.timeline.global_index()
    }

    /// Scrubber range
    pub fn frame_range(&self) -> RangeInclusive<i64> {
        0..=self.timeline.max_global_index()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn overlay_visible(&self) -> bool {
        self.timeline.overlay_visible()
    }

    pub fn annotation_source(&self) -> AnnotationSource {
        self.timeline.annotation_source()
    }

    /// User seek: clamp into the frame range and decode fresh frames.
    pub fn seek(&mut self, index: i64) -> FrameUpdate {
        let index = index.clamp(0, self.timeline.max_global_index());
        self.set_global_index(index, UpdateMode::Advance)
    }

    /// Move to `index` without clamping.
    pub fn set_global_index(&mut self, index: i64, mode: UpdateMode) -> FrameUpdate {
        let frames = self.timeline.set_global_index(index, mode, &self.compositor);
        self.rendered(UpdateOrigin::User, frames)
    }

    /// Redraw the current instant from cached frames.
    pub fn redraw(&mut self) -> FrameUpdate {
        self.set_global_index(self.timeline.global_index(), UpdateMode::Redraw)
    }

    /// Advance one frame. Does nothing while stopped.
    pub fn tick(&mut self) -> FrameUpdate {
        if !self.playback.is_playing() {
            return self.unchanged(UpdateOrigin::Playback);
        }
        let frames = self.timeline.tick(&self.compositor);
        self.rendered(UpdateOrigin::Playback, frames)
    }

    /// Tick if one is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<FrameUpdate> {
        self.playback.poll(now).then(|| self.tick())
    }

    pub fn play(&mut self) -> Result<FrameUpdate, PlaybackError> {
        self.playback.play(Instant::now())?;
        log::debug!("Playback started at {}", self.timeline.global_index());
        Ok(self.unchanged(UpdateOrigin::User))
    }

    pub fn pause(&mut self) -> Result<FrameUpdate, PlaybackError> {
        self.playback.pause()?;
        log::debug!("Playback paused at {}", self.timeline.global_index());
        Ok(self.unchanged(UpdateOrigin::User))
    }

    /// Play when stopped, pause when playing.
    pub fn toggle_play_pause(&mut self) -> PlaybackState {
        let result = if self.playback.is_playing() {
            self.playback.pause()
        } else {
            self.playback.play(Instant::now())
        };
        debug_assert!(result.is_ok());
        self.playback.state()
    }

    /// Show or hide boxes; re-renders cached frames without decoding.
    pub fn set_overlay_visible(&mut self, visible: bool) -> FrameUpdate {
        if visible == self.timeline.overlay_visible() {
            return self.unchanged(UpdateOrigin::User);
        }
        self.timeline.set_overlay_visible(visible);
        self.redraw()
    }

    /// Switch every stream to `which`; re-renders cached frames without decoding.
    pub fn set_annotation_source(&mut self, which: AnnotationSource) -> FrameUpdate {
        if which == self.timeline.annotation_source() {
            return self.unchanged(UpdateOrigin::User);
        }
        self.timeline.set_annotation_source(which);
        self.redraw()
    }

    fn rendered(&self, origin: UpdateOrigin, frames: Vec<StreamFrame>) -> FrameUpdate {
        FrameUpdate {
            global_index: self.timeline.global_index(),
            origin,
            streams: frames.into_iter().map(StreamUpdate::Rendered).collect(),
        }
    }

    fn unchanged(&self, origin: UpdateOrigin) -> FrameUpdate {
        FrameUpdate {
            global_index: self.timeline.global_index(),
            origin,
            streams: self
                .timeline
                .streams()
                .iter()
                .map(|s| StreamUpdate::Unchanged { stream: s.name().to_string() })
                .collect(),
        }
    }
}

/// Parse `offsets.txt`: `<stream> <offset>` per line, whitespace separated.
/// Unparseable lines are skipped; a missing file means all offsets are 0.
pub fn parse_offsets(text: &str) -> HashMap<String, i64> {
    let mut offsets = HashMap::new();
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        match value.parse::<i64>() {
            Ok(offset) => {
                offsets.insert(name.to_string(), offset);
            }
            Err(_) => log::debug!("Skipping offset line: {line}"),
        }
    }
    offsets
}

fn load_offsets(path: &Path) -> HashMap<String, i64> {
    if !path.is_file() {
        return HashMap::new();
    }
    match std::fs::read_to_string(path) {
        Ok(text) => parse_offsets(&text),
        Err(e) => {
            log::warn!("Cannot read offsets {}: {e}", path.display());
            HashMap::new()
        }
    }
}
