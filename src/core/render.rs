//! Frame compositor: annotation overlay, area-averaged downscale, and the
//! BGRA → RGBA conversion expected by display surfaces.
//!
//! Composition order:
//! 1. Decoded source frame (never mutated; overlays go on a copy)
//! 2. Box outlines and object id labels, in annotation file order
//! 3. Area-averaged resample to the fixed output size
//! 4. Channel swizzle to RGBA
//!
//! Software rendering only (CPU pixel ops).

use std::borrow::Cow;

use font8x8::{UnicodeFonts, BASIC_FONTS};
use serde::Serialize;

use super::annotations::BoundingBox;
use super::config::OverlayStyle;

// =============================================================================
// Frame buffer
// =============================================================================

/// BGRA pixel buffer, as produced by the decode layer
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row (typically width * 4 for BGRA)
    pub stride: u32,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width * 4;
        Self {
            data: vec![0u8; (stride * height) as usize],
            width,
            height,
            stride,
        }
    }

    /// Create a frame filled with a solid BGRA color
    pub fn solid(width: u32, height: u32, b: u8, g: u8, r: u8, a: u8) -> Self {
        let stride = width * 4;
        let mut data = vec![0u8; (stride * height) as usize];
        for pixel in data.chunks_exact_mut(4) {
            pixel[0] = b;
            pixel[1] = g;
            pixel[2] = r;
            pixel[3] = a;
        }
        Self { data, width, height, stride }
    }

    /// Get pixel at (x, y) as [B, G, R, A]
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y * self.stride + x * 4) as usize;
        if x < self.width && offset + 3 < self.data.len() {
            [self.data[offset], self.data[offset + 1], self.data[offset + 2], self.data[offset + 3]]
        } else {
            [0, 0, 0, 0]
        }
    }

    /// Set pixel at (x, y) from [B, G, R, A]; out-of-bounds writes are dropped
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: [u8; 4]) {
        let offset = (y * self.stride + x * 4) as usize;
        if x < self.width && offset + 3 < self.data.len() {
            self.data[offset..offset + 4].copy_from_slice(&pixel);
        }
    }

    /// Signed-coordinate variant of `set_pixel` for shapes that cross the edge
    #[inline]
    fn put(&mut self, x: i64, y: i64, pixel: [u8; 4]) {
        if x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64 {
            self.set_pixel(x as u32, y as u32, pixel);
        }
    }

    /// Area-averaging resample to `out_w` x `out_h`.
    ///
    /// Each output pixel is the mean of the source pixels its footprint
    /// covers. When upscaling the footprint is a single source pixel.
    pub fn resize_area(&self, out_w: u32, out_h: u32) -> FrameBuffer {
        if out_w == self.width && out_h == self.height {
            return self.clone();
        }
        let mut output = FrameBuffer::new(out_w, out_h);
        if self.width == 0 || self.height == 0 || out_w == 0 || out_h == 0 {
            return output;
        }

        let cols = footprints(self.width, out_w);
        let rows = footprints(self.height, out_h);

        for (oy, &(y0, y1)) in rows.iter().enumerate() {
            for (ox, &(x0, x1)) in cols.iter().enumerate() {
                let mut sum = [0u32; 4];
                for sy in y0..y1 {
                    for sx in x0..x1 {
                        let p = self.pixel(sx, sy);
                        for c in 0..4 {
                            sum[c] += p[c] as u32;
                        }
                    }
                }
                let n = (x1 - x0) * (y1 - y0);
                let avg = sum.map(|s| ((s + n / 2) / n) as u8);
                output.set_pixel(ox as u32, oy as u32, avg);
            }
        }
        output
    }

    /// Convert BGRA pixel data to RGBA
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut rgba = Vec::with_capacity((self.width * self.height * 4) as usize);
        for y in 0..self.height {
            let row = (y * self.stride) as usize;
            for src in self.data[row..row + (self.width * 4) as usize].chunks_exact(4) {
                rgba.extend_from_slice(&[src[2], src[1], src[0], src[3]]);
            }
        }
        rgba
    }
}

/// Half-open source span `[start, end)` for every output index.
fn footprints(src_len: u32, out_len: u32) -> Vec<(u32, u32)> {
    (0..out_len)
        .map(|o| {
            let start = (o as u64 * src_len as u64 / out_len as u64) as u32;
            let end = ((o as u64 + 1) * src_len as u64).div_ceil(out_len as u64) as u32;
            let start = start.min(src_len - 1);
            (start, end.clamp(start + 1, src_len))
        })
        .collect()
}

// =============================================================================
// Rendered output
// =============================================================================

/// RGBA raster ready for a display surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA (width * height * 4 bytes)
    #[serde(skip)]
    pub rgba: Vec<u8>,
    /// True when no decoded pixels were available
    pub blank: bool,
}

impl RenderedFrame {
    /// Opaque black raster
    pub fn blank(width: u32, height: u32) -> Self {
        let mut rgba = vec![0u8; (width * height * 4) as usize];
        for pixel in rgba.chunks_exact_mut(4) {
            pixel[3] = 255;
        }
        Self { width, height, rgba, blank: true }
    }

    /// Get pixel at (x, y) as [R, G, B, A]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * self.width + x) * 4) as usize;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.rgba[offset..offset + 4]);
        px
    }
}

// =============================================================================
// Compositor
// =============================================================================

/// Turns decoded frames plus boxes into fixed-size display rasters.
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    output_width: u32,
    output_height: u32,
    style: OverlayStyle,
}

impl FrameCompositor {
    pub fn new(output_width: u32, output_height: u32, style: OverlayStyle) -> Self {
        Self {
            output_width: output_width.max(1),
            output_height: output_height.max(1),
            style,
        }
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.output_width, self.output_height)
    }

    /// Render one stream's raster. `None` yields a blank raster.
    /// `source` is only read; annotation drawing happens on a copy.
    pub fn render(
        &self,
        source: Option<&FrameBuffer>,
        boxes: &[BoundingBox],
        overlay_enabled: bool,
    ) -> RenderedFrame {
        let Some(source) = source else {
            return RenderedFrame::blank(self.output_width, self.output_height);
        };

        // Only copy the source if there is something to draw on it
        let annotated = if overlay_enabled && !boxes.is_empty() {
            let mut frame = source.clone();
            for bbox in boxes {
                self.draw_box(&mut frame, bbox);
            }
            Cow::Owned(frame)
        } else {
            Cow::Borrowed(source)
        };

        let scaled = annotated.resize_area(self.output_width, self.output_height);
        RenderedFrame {
            width: scaled.width,
            height: scaled.height,
            rgba: scaled.to_rgba(),
            blank: false,
        }
    }

    fn color(&self) -> [u8; 4] {
        let [r, g, b] = self.style.color;
        [b, g, r, 255]
    }

    /// Outline from (left, top) to (left + width, top + height), id label above.
    /// Coordinates saturate and the outline is clipped to the frame, so
    /// absurd boxes cost no more than one that covers the frame.
    fn draw_box(&self, frame: &mut FrameBuffer, bbox: &BoundingBox) {
        let color = self.color();
        // `as` saturates and maps NaN to 0
        let x0 = bbox.left as i64;
        let y0 = bbox.top as i64;
        let x1 = x0.saturating_add(bbox.width as i64);
        let y1 = y0.saturating_add(bbox.height as i64);

        // Thickness grows inward and outward around the nominal edge
        let t = self.style.thickness.max(1) as i64;
        let lo = -(t - 1) / 2;
        let hi = t / 2;
        let (w, h) = (frame.width as i64, frame.height as i64);
        let xs = x0.saturating_add(lo).max(-t)..=x1.saturating_add(hi).min(w + t);
        let ys = y0.saturating_add(lo).max(-t)..=y1.saturating_add(hi).min(h + t);
        for d in lo..=hi {
            for x in xs.clone() {
                frame.put(x, y0.saturating_add(d), color);
                frame.put(x, y1.saturating_add(d), color);
            }
            for y in ys.clone() {
                frame.put(x0.saturating_add(d), y, color);
                frame.put(x1.saturating_add(d), y, color);
            }
        }

        let scale = self.style.label_scale.max(1) as i64;
        let label_y = y0
            .saturating_sub(self.style.label_gap as i64)
            .saturating_sub(8 * scale);
        draw_text(frame, x0, label_y, &bbox.object_id.to_string(), color, scale);
    }
}

/// Draw `text` with 8x8 bitmap glyphs, top-left anchored at (x, y).
fn draw_text(frame: &mut FrameBuffer, x: i64, y: i64, text: &str, color: [u8; 4], scale: i64) {
    if y >= frame.height as i64 || y.saturating_add(8 * scale) <= 0 {
        return;
    }
    let mut cursor_x = x;
    for ch in text.chars() {
        if cursor_x >= frame.width as i64 {
            break;
        }
        if let Some(glyph) = BASIC_FONTS.get(ch) {
            for (row_idx, row) in glyph.iter().enumerate() {
                for col_idx in 0..8i64 {
                    if (row >> col_idx) & 1 == 0 {
                        continue;
                    }
                    let px = cursor_x.saturating_add(col_idx * scale);
                    let py = y + row_idx as i64 * scale;
                    for sy in 0..scale {
                        for sx in 0..scale {
                            frame.put(px.saturating_add(sx), py + sy, color);
                        }
                    }
                }
            }
        }
        cursor_x = cursor_x.saturating_add(8 * scale);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn compositor(w: u32, h: u32) -> FrameCompositor {
        FrameCompositor::new(w, h, OverlayStyle::default())
    }

    #[test]
    fn test_frame_buffer_solid() {
        let fb = FrameBuffer::solid(4, 4, 100, 150, 200, 255);
        assert_eq!(fb.pixel(2, 2), [100, 150, 200, 255]);
    }

    #[test]
    fn test_frame_buffer_set_get() {
        let mut fb = FrameBuffer::new(10, 10);
        fb.set_pixel(5, 5, [10, 20, 30, 255]);
        assert_eq!(fb.pixel(5, 5), [10, 20, 30, 255]);
        assert_eq!(fb.pixel(0, 0), [0, 0, 0, 0]);
        // Out of bounds is ignored, not wrapped into the next row
        fb.set_pixel(10, 0, [1, 1, 1, 1]);
        assert_eq!(fb.pixel(0, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn test_resize_area_averages_blocks() {
        let mut fb = FrameBuffer::solid(4, 2, 0, 0, 0, 255);
        // Left 2x2 block: two white, two black pixels
        fb.set_pixel(0, 0, [255, 255, 255, 255]);
        fb.set_pixel(1, 1, [255, 255, 255, 255]);
        let out = fb.resize_area(2, 1);
        assert_eq!(out.pixel(0, 0), [128, 128, 128, 255]);
        assert_eq!(out.pixel(1, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn test_resize_area_uneven_ratio_covers_source() {
        let fb = FrameBuffer::solid(7, 5, 10, 20, 30, 255);
        let out = fb.resize_area(3, 2);
        assert_eq!((out.width, out.height), (3, 2));
        assert_eq!(out.pixel(2, 1), [10, 20, 30, 255]);
    }

    #[test]
    fn test_resize_area_upscale() {
        let mut fb = FrameBuffer::new(2, 1);
        fb.set_pixel(0, 0, [1, 2, 3, 255]);
        fb.set_pixel(1, 0, [4, 5, 6, 255]);
        let out = fb.resize_area(4, 2);
        assert_eq!(out.pixel(1, 1), [1, 2, 3, 255]);
        assert_eq!(out.pixel(2, 0), [4, 5, 6, 255]);
    }

    #[test]
    fn test_to_rgba_swaps_channels() {
        let fb = FrameBuffer::solid(1, 1, 1, 2, 3, 4);
        assert_eq!(fb.to_rgba(), vec![3, 2, 1, 4]);
    }

    #[test]
    fn test_absent_frame_is_blank() {
        let out = compositor(6, 4).render(None, &[], true);
        assert!(out.blank);
        assert_eq!((out.width, out.height), (6, 4));
        assert!(out.rgba.chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    fn test_overlay_draws_on_copy() {
        let source = FrameBuffer::solid(40, 40, 0, 0, 0, 255);
        let before = source.clone();
        let boxes = [BoundingBox::new(1, 10.0, 20.0, 10.0, 10.0)];
        let out = compositor(40, 40).render(Some(&source), &boxes, true);

        assert_eq!(source, before);
        // Outline corner is green in RGBA
        assert_eq!(out.pixel(10, 20), [0, 255, 0, 255]);
        assert_eq!(out.pixel(20, 30), [0, 255, 0, 255]);
        // Interior untouched
        assert_eq!(out.pixel(15, 25), [0, 0, 0, 255]);
    }

    #[test]
    fn test_overlay_disabled_skips_boxes() {
        let source = FrameBuffer::solid(20, 20, 0, 0, 0, 255);
        let boxes = [BoundingBox::new(1, 2.0, 12.0, 5.0, 5.0)];
        let out = compositor(20, 20).render(Some(&source), &boxes, false);
        assert!(out.rgba.chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    fn test_label_drawn_above_box() {
        let source = FrameBuffer::solid(60, 60, 0, 0, 0, 255);
        let boxes = [BoundingBox::new(1, 10.0, 30.0, 20.0, 20.0)];
        let out = compositor(60, 60).render(Some(&source), &boxes, true);
        // Label band spans rows [30 - 5 - 8, 30 - 5)
        let lit = (17..25)
            .flat_map(|y| (10..18).map(move |x| (x, y)))
            .filter(|&(x, y)| out.pixel(x, y) == [0, 255, 0, 255])
            .count();
        assert!(lit > 0, "Label glyph should be drawn above the box");
    }

    #[test]
    fn test_box_partially_outside_frame() {
        let source = FrameBuffer::solid(10, 10, 0, 0, 0, 255);
        let boxes = [BoundingBox::new(3, -5.0, -5.0, 100.0, 100.0)];
        let out = compositor(10, 10).render(Some(&source), &boxes, true);
        assert!(!out.blank);
    }

    #[test]
    fn test_huge_box_is_clipped() {
        let source = FrameBuffer::solid(32, 32, 0, 0, 0, 255);
        let boxes = [BoundingBox::new(1, 0.0, 0.0, 3e9, 5.0)];
        let started = std::time::Instant::now();
        let out = compositor(32, 32).render(Some(&source), &boxes, true);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        // Top edge runs across the whole frame
        assert_eq!(out.pixel(31, 0), [0, 255, 0, 255]);
        assert_eq!(out.pixel(0, 5), [0, 255, 0, 255]);
    }

    #[test]
    fn test_extreme_box_values_do_not_panic() {
        let source = FrameBuffer::solid(32, 32, 0, 0, 0, 255);
        let c = compositor(32, 32);
        for bbox in [
            BoundingBox::new(1, 10.0, 10.0, 1e300, 5.0),
            BoundingBox::new(2, f64::INFINITY, 3.0, 4.0, 4.0),
            BoundingBox::new(3, f64::NAN, f64::NAN, f64::NAN, f64::NAN),
            BoundingBox::new(i64::MAX, -1e300, f64::NEG_INFINITY, f64::INFINITY, 1e300),
        ] {
            let out = c.render(Some(&source), &[bbox], true);
            assert_eq!(out.rgba.len(), 32 * 32 * 4);
        }
    }

    #[test]
    fn test_output_size_independent_of_source() {
        let c = compositor(36, 36);
        let small = c.render(Some(&FrameBuffer::solid(20, 10, 0, 0, 0, 255)), &[], true);
        let large = c.render(Some(&FrameBuffer::solid(192, 108, 0, 0, 0, 255)), &[], true);
        assert_eq!((small.width, small.height), (36, 36));
        assert_eq!((large.width, large.height), (36, 36));
        assert_eq!(large.rgba.len(), 36 * 36 * 4);
    }
}
