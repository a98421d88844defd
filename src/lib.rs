//! Synchronized review of time-offset camera streams with annotation overlays.
//!
//! The engine maps one global frame index onto every stream, decodes only
//! when the index moves, and composites ground-truth or detector boxes onto
//! fixed-size RGBA rasters. Display is left to the caller.

pub mod core;

pub use crate::core::annotations::{AnnotationSource, AnnotationStore, BoundingBox};
pub use crate::core::config::{OverlayStyle, ReviewSettings, SettingsError};
pub use crate::core::playback::{PlaybackController, PlaybackError, PlaybackState};
pub use crate::core::render::{FrameBuffer, FrameCompositor, RenderedFrame};
pub use crate::core::session::{
    FrameUpdate, ReviewSession, SessionError, SkippedStream, StreamUpdate, UpdateOrigin,
};
pub use crate::core::source::{
    default_opener, SourceError, SourceOpener, StubVideoSource, VideoSource,
};
pub use crate::core::stream::{StreamError, StreamHandle};
pub use crate::core::timeline::{StreamFrame, Timeline, UpdateMode};
