use std::io::Cursor;
use std::path::Path;

use common::Rgb;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, ImageFormat, ImageResult, RgbImage};

use crate::render::{Rect, Surface};

/// An in-memory RGB raster backed by an [`RgbImage`].
#[derive(Debug, Clone)]
pub struct Framebuffer {
    image: RgbImage,
}

fn to_pixel(color: Rgb) -> image::Rgb<u8> {
    image::Rgb([color.r, color.g, color.b])
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        self.image
            .get_pixel_checked(x, y)
            .map(|&image::Rgb([r, g, b])| Rgb::new(r, g, b))
    }

    /// Pixel span `[start, end)` covered by `[from, from + len)` on an axis
    /// of `limit` pixels.
    fn span(from: f64, len: f64, limit: u32) -> (u32, u32) {
        let clamp = |v: f64| v.round().clamp(0.0, limit as f64) as u32;
        (clamp(from), clamp(from + len))
    }

    fn fill_span(&mut self, (x0, x1): (u32, u32), (y0, y1): (u32, u32), color: Rgb) {
        let px = to_pixel(color);
        for y in y0..y1 {
            for x in x0..x1 {
                self.image.put_pixel(x, y, px);
            }
        }
    }

    /// Encode the current frame as PNG.
    pub fn to_png(&self) -> ImageResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        PngEncoder::new(&mut out).write_image(
            self.image.as_raw(),
            self.image.width(),
            self.image.height(),
            image::ColorType::Rgb8,
        )?;
        Ok(out.into_inner())
    }

    pub fn write_png(&self, path: impl AsRef<Path>) -> ImageResult<()> {
        self.image.save_with_format(path, ImageFormat::Png)
    }
}

impl Surface for Framebuffer {
    fn width(&self) -> f64 {
        self.image.width() as f64
    }

    fn height(&self) -> f64 {
        self.image.height() as f64
    }

    fn clear(&mut self, color: Rgb) {
        let px = to_pixel(color);
        self.image.pixels_mut().for_each(|p| *p = px);
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgb) {
        if !(rect.x.is_finite() && rect.y.is_finite() && rect.w > 0.0 && rect.h > 0.0) {
            return;
        }
        let xs = Self::span(rect.x, rect.w, self.image.width());
        let ys = Self::span(rect.y, rect.h, self.image.height());
        self.fill_span(xs, ys, color);
    }

    fn stroke_rect(&mut self, rect: Rect, color: Rgb, line_width: f64) {
        let t = line_width.max(1.0).min(rect.w.min(rect.h) / 2.0).max(1.0);
        self.fill_rect(Rect::new(rect.x, rect.y, rect.w, t), color);
        self.fill_rect(Rect::new(rect.x, rect.y + rect.h - t, rect.w, t), color);
        self.fill_rect(Rect::new(rect.x, rect.y, t, rect.h), color);
        self.fill_rect(Rect::new(rect.x + rect.w - t, rect.y, t, rect.h), color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_clipped_to_the_buffer() {
        let mut fb = Framebuffer::new(4, 3);
        fb.clear(Rgb::WHITE);
        fb.fill_rect(Rect::new(-2.0, 1.0, 4.0, 10.0), Rgb::BLACK);
        assert_eq!(fb.pixel(0, 0), Some(Rgb::WHITE));
        assert_eq!(fb.pixel(0, 1), Some(Rgb::BLACK));
        assert_eq!(fb.pixel(1, 2), Some(Rgb::BLACK));
        assert_eq!(fb.pixel(2, 2), Some(Rgb::WHITE));
        assert_eq!(fb.pixel(4, 0), None);
    }

    #[test]
    fn stroke_leaves_the_inside_alone() {
        let mut fb = Framebuffer::new(6, 6);
        fb.clear(Rgb::WHITE);
        fb.stroke_rect(Rect::new(0.0, 0.0, 6.0, 6.0), Rgb::BLACK, 1.0);
        assert_eq!(fb.pixel(0, 3), Some(Rgb::BLACK));
        assert_eq!(fb.pixel(5, 5), Some(Rgb::BLACK));
        assert_eq!(fb.pixel(3, 3), Some(Rgb::WHITE));
    }

    #[test]
    fn png_snapshot_decodes_to_the_same_pixels() {
        let mut fb = Framebuffer::new(3, 2);
        fb.clear(Rgb::WHITE);
        fb.fill_rect(Rect::new(1.0, 1.0, 1.0, 1.0), Rgb::new(0x24, 0x6d, 0xaa));

        let png = fb.to_png().unwrap();
        assert!(png.starts_with(b"\x89PNG\r\n\x1a\n"));

        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0), &image::Rgb([255, 255, 255]));
        assert_eq!(decoded.get_pixel(1, 1), &image::Rgb([0x24, 0x6d, 0xaa]));
    }
}
