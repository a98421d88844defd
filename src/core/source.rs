//! Video source abstraction: frame-indexed decode with direct seeking.
//! Trait-based so the synchronizer never depends on a codec library.

use std::path::Path;

use super::render::FrameBuffer;

/// Video source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Cannot open {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),
    #[error("No video stream in {0}")]
    NoVideoStream(String),
    #[error("Corrupt frame at index {0}")]
    Corrupt(u64),
    #[error("Seek to frame {0} failed")]
    Seek(u64),
    #[error("Video decoding not available in this build")]
    Unsupported,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decodable video with a single exclusively-owned decode cursor.
pub trait VideoSource: Send {
    /// Total number of decodable frames
    fn frame_count(&self) -> u64;

    /// Native frame size (width, height)
    fn dimensions(&self) -> (u32, u32);

    /// Reposition the cursor so the next decode yields frame `index`.
    fn seek(&mut self, index: u64) -> Result<(), SourceError>;

    /// Decode the frame under the cursor and advance it by one.
    /// `Ok(None)` means the end of the stream was reached.
    fn decode_next(&mut self) -> Result<Option<FrameBuffer>, SourceError>;
}

/// Opens video files as sources.
pub trait SourceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, SourceError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&Path) -> Result<Box<dyn VideoSource>, SourceError>,
{
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, SourceError> {
        self(path)
    }
}

// =============================================================================
// Synthetic source
// =============================================================================

/// Synthetic source producing a deterministic pattern per frame index.
/// Pixel (0, 0) stores the low bytes of the frame index so tests can tell
/// which frame was decoded.
pub struct StubVideoSource {
    width: u32,
    height: u32,
    total: u64,
    cursor: u64,
    corrupt: Vec<u64>,
    stalled: Vec<u64>,
    seek_fails: bool,
}

impl StubVideoSource {
    pub fn new(width: u32, height: u32, frames: u64) -> Self {
        Self {
            width,
            height,
            total: frames,
            cursor: 0,
            corrupt: Vec::new(),
            stalled: Vec::new(),
            seek_fails: false,
        }
    }

    /// Make decoding `index` fail as if the bitstream were damaged.
    pub fn with_corrupt_frame(mut self, index: u64) -> Self {
        self.corrupt.push(index);
        self
    }

    /// Make decoding `index` fail without consuming it, the way a rejected
    /// packet leaves a real decoder where it was.
    pub fn with_stalled_frame(mut self, index: u64) -> Self {
        self.stalled.push(index);
        self
    }

    /// Make every seek fail.
    pub fn with_failing_seek(mut self) -> Self {
        self.seek_fails = true;
        self
    }

    /// Frame index encoded into a stub frame, if it came from this source.
    pub fn frame_index_of(frame: &FrameBuffer) -> u64 {
        let [b, g, r, _] = frame.pixel(0, 0);
        (r as u64) << 16 | (g as u64) << 8 | b as u64
    }

    fn render(&self, index: u64) -> FrameBuffer {
        let mut frame = FrameBuffer::new(self.width, self.height);
        let shade = (index % 200) as u8 + 30;
        for y in 0..self.height {
            for x in 0..self.width {
                let fx = (x * 255 / self.width.max(1)) as u8;
                let fy = (y * 255 / self.height.max(1)) as u8;
                frame.set_pixel(x, y, [shade, fx, fy, 255]);
            }
        }
        let tag = [index as u8, (index >> 8) as u8, (index >> 16) as u8, 255];
        frame.set_pixel(0, 0, tag);
        frame
    }
}

impl VideoSource for StubVideoSource {
    fn frame_count(&self) -> u64 {
        self.total
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn seek(&mut self, index: u64) -> Result<(), SourceError> {
        if self.seek_fails {
            return Err(SourceError::Seek(index));
        }
        self.cursor = index;
        Ok(())
    }

    fn decode_next(&mut self) -> Result<Option<FrameBuffer>, SourceError> {
        if self.cursor >= self.total {
            return Ok(None);
        }
        let index = self.cursor;
        if self.stalled.contains(&index) {
            return Err(SourceError::Corrupt(index));
        }
        self.cursor += 1;
        if self.corrupt.contains(&index) {
            return Err(SourceError::Corrupt(index));
        }
        Ok(Some(self.render(index)))
    }
}

/// Opener used when the crate is built without a decoding backend.
pub struct UnsupportedOpener;

impl SourceOpener for UnsupportedOpener {
    fn open(&self, _path: &Path) -> Result<Box<dyn VideoSource>, SourceError> {
        Err(SourceError::Unsupported)
    }
}

/// FFmpeg-based video source.
/// Decodes to BGRA and seeks by frame index.
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_source {
    use super::*;
    use ffmpeg_next as ffmpeg;
    use ffmpeg::format;
    use ffmpeg::media::Type;
    use ffmpeg::software::scaling;
    use ffmpeg::util::frame::video::Video as FfmpegFrame;

    /// Wrapper to make scaling::Context Send-safe.
    /// SwsContext is safe to use from one thread at a time (our usage pattern).
    struct SendScaler(scaling::Context);
    // SAFETY: the scaler is owned by one source and only touched through &mut self.
    unsafe impl Send for SendScaler {}

    impl std::ops::Deref for SendScaler {
        type Target = scaling::Context;
        fn deref(&self) -> &Self::Target { &self.0 }
    }
    impl std::ops::DerefMut for SendScaler {
        fn deref_mut(&mut self) -> &mut Self::Target { &mut self.0 }
    }

    fn ffmpeg_err(context: &str, e: ffmpeg::Error) -> SourceError {
        SourceError::Ffmpeg(format!("{context}: {e}"))
    }

    pub struct FfmpegVideoSource {
        input_ctx: format::context::Input,
        video_stream_index: usize,
        decoder: ffmpeg::codec::decoder::Video,
        scaler: SendScaler,
        width: u32,
        height: u32,
        total: u64,
        fps: f64,
        time_base: f64,
        eof_sent: bool,
        /// After a seek, frames before this index are decoded and dropped
        skip_until: Option<u64>,
    }

    impl FfmpegVideoSource {
        pub fn open(path: &Path) -> Result<Self, SourceError> {
            ffmpeg::init().map_err(|e| ffmpeg_err("FFmpeg init", e))?;

            let input_ctx = format::input(&path).map_err(|e| SourceError::Open {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

            let stream = input_ctx
                .streams()
                .best(Type::Video)
                .ok_or_else(|| SourceError::NoVideoStream(path.display().to_string()))?;
            let video_stream_index = stream.index();

            let time_base = stream.time_base();
            let time_base_f64 = time_base.0 as f64 / time_base.1 as f64;

            let fps = stream.avg_frame_rate();
            let fps_f64 = if fps.1 != 0 && fps.0 != 0 { fps.0 as f64 / fps.1 as f64 } else { 30.0 };

            let declared_frames = stream.frames();

            let decoder_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| ffmpeg_err("Decoder context", e))?;
            let decoder = decoder_ctx
                .decoder()
                .video()
                .map_err(|e| ffmpeg_err("Open decoder", e))?;

            let width = decoder.width();
            let height = decoder.height();

            let scaler = scaling::Context::get(
                decoder.format(),
                width,
                height,
                ffmpeg::format::Pixel::BGRA,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| ffmpeg_err("Scaler init", e))?;

            // Containers such as AVI usually declare the count; otherwise estimate it.
            let total = if declared_frames > 0 {
                declared_frames as u64
            } else {
                let dur = input_ctx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
                (dur * fps_f64).max(0.0) as u64
            };

            Ok(Self {
                input_ctx,
                video_stream_index,
                decoder,
                scaler: SendScaler(scaler),
                width,
                height,
                total,
                fps: fps_f64,
                time_base: time_base_f64,
                eof_sent: false,
                skip_until: None,
            })
        }

        fn frame_index(&self, frame: &FfmpegFrame) -> Option<u64> {
            let pts = frame.timestamp()?;
            let index = (pts as f64 * self.time_base * self.fps).round();
            (index >= 0.0).then_some(index as u64)
        }

        fn decode_raw(&mut self) -> Result<Option<FfmpegFrame>, SourceError> {
            let mut decoded = FfmpegFrame::empty();
            loop {
                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    return Ok(Some(decoded));
                }
                if self.eof_sent {
                    return Ok(None);
                }

                let mut fed = false;
                for (stream, packet) in self.input_ctx.packets() {
                    if stream.index() != self.video_stream_index {
                        continue;
                    }
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| ffmpeg_err("Send packet", e))?;
                    fed = true;
                    break;
                }

                if !fed {
                    // Out of packets: drain what the decoder still holds
                    self.decoder.send_eof().ok();
                    self.eof_sent = true;
                }
            }
        }

        fn to_frame_buffer(&mut self, decoded: &FfmpegFrame) -> Result<FrameBuffer, SourceError> {
            let mut bgra_frame = FfmpegFrame::empty();
            self.scaler
                .run(decoded, &mut bgra_frame)
                .map_err(|e| ffmpeg_err("Scale frame", e))?;

            let stride = self.width * 4;
            let data_size = (stride * self.height) as usize;
            let src_data = bgra_frame.data(0);

            // Handle potential stride mismatch
            let src_stride = bgra_frame.stride(0) as u32;
            let data = if src_stride == stride {
                src_data[..data_size].to_vec()
            } else {
                let mut buf = vec![0u8; data_size];
                for y in 0..self.height {
                    let src_offset = (y * src_stride) as usize;
                    let dst_offset = (y * stride) as usize;
                    let row_bytes = stride as usize;
                    buf[dst_offset..dst_offset + row_bytes]
                        .copy_from_slice(&src_data[src_offset..src_offset + row_bytes]);
                }
                buf
            };

            Ok(FrameBuffer {
                data,
                width: self.width,
                height: self.height,
                stride,
            })
        }
    }

    impl VideoSource for FfmpegVideoSource {
        fn frame_count(&self) -> u64 {
            self.total
        }

        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn seek(&mut self, index: u64) -> Result<(), SourceError> {
            // Container seek works in AV_TIME_BASE units and lands on the
            // keyframe at or before the target.
            let seconds = index as f64 / self.fps;
            let timestamp = (seconds * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
            self.input_ctx
                .seek(timestamp, ..timestamp)
                .map_err(|e| ffmpeg_err("Seek", e))?;
            self.decoder.flush();
            self.eof_sent = false;
            self.skip_until = Some(index);
            Ok(())
        }

        fn decode_next(&mut self) -> Result<Option<FrameBuffer>, SourceError> {
            loop {
                let Some(decoded) = self.decode_raw()? else {
                    return Ok(None);
                };
                if let Some(target) = self.skip_until {
                    match self.frame_index(&decoded) {
                        Some(index) if index < target => continue,
                        _ => self.skip_until = None,
                    }
                }
                return self.to_frame_buffer(&decoded).map(Some);
            }
        }
    }

    /// Opens files with FFmpeg.
    pub struct FfmpegOpener;

    impl SourceOpener for FfmpegOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, SourceError> {
            Ok(Box::new(FfmpegVideoSource::open(path)?))
        }
    }
}

/// Opener for the best backend compiled into this build.
pub fn default_opener() -> Box<dyn SourceOpener> {
    #[cfg(feature = "ffmpeg")]
    let opener: Box<dyn SourceOpener> = Box::new(ffmpeg_source::FfmpegOpener);
    #[cfg(not(feature = "ffmpeg"))]
    let opener: Box<dyn SourceOpener> = {
        log::warn!("Built without the `ffmpeg` feature; video files cannot be decoded");
        Box::new(UnsupportedOpener)
    };
    opener
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_decodes_sequentially() {
        let mut src = StubVideoSource::new(8, 6, 3);
        assert_eq!(src.frame_count(), 3);
        assert_eq!(src.dimensions(), (8, 6));

        for expected in 0..3 {
            let frame = src.decode_next().unwrap().unwrap();
            assert_eq!(StubVideoSource::frame_index_of(&frame), expected);
        }
        assert!(src.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_stub_seek_repositions_cursor() {
        let mut src = StubVideoSource::new(4, 4, 500);
        src.seek(300).unwrap();
        let frame = src.decode_next().unwrap().unwrap();
        assert_eq!(StubVideoSource::frame_index_of(&frame), 300);
    }

    #[test]
    fn test_stub_corrupt_frame_errors_then_continues() {
        let mut src = StubVideoSource::new(4, 4, 3).with_corrupt_frame(1);
        assert!(src.decode_next().unwrap().is_some());
        assert!(matches!(src.decode_next(), Err(SourceError::Corrupt(1))));
        let frame = src.decode_next().unwrap().unwrap();
        assert_eq!(StubVideoSource::frame_index_of(&frame), 2);
    }

    #[test]
    fn test_closure_opener() {
        let opener = |_: &Path| -> Result<Box<dyn VideoSource>, SourceError> {
            Ok(Box::new(StubVideoSource::new(2, 2, 7)))
        };
        let src = opener.open(Path::new("cam/vdo.avi")).unwrap();
        assert_eq!(src.frame_count(), 7);
    }

    #[test]
    fn test_unsupported_opener() {
        assert!(matches!(
            UnsupportedOpener.open(Path::new("x.avi")),
            Err(SourceError::Unsupported)
        ));
    }
}
