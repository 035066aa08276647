//! Raster primitives used by the renderer and the pyramid builder.

use std::fs;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageError, Rgba, RgbaImage};

use crate::settings::TileFormat;

/// A fully transparent square image.
pub fn empty(size: u32) -> RgbaImage {
    RgbaImage::new(size, size)
}

/// Resets every pixel to transparent, keeping the allocation.
pub fn clear(img: &mut RgbaImage) {
    for p in img.pixels_mut() {
        *p = Rgba([0, 0, 0, 0]);
    }
}

#[inline]
fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, brightness: f32) {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let sc = (src[c] as f32 * brightness).min(255.0);
        let dc = dst[c] as f32;
        let v = (sc * sa + dc * da * (1.0 - sa)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round() as u8;
}

/// Source-over composite of `src` at `(x, y)` with its colour scaled by
/// `brightness`. Pixels falling outside `dest` are clipped.
pub fn draw_with_brightness(dest: &mut RgbaImage, src: &RgbaImage, x: i64, y: i64, brightness: f32) {
    let (dw, dh) = (dest.width() as i64, dest.height() as i64);
    for (sx, sy, p) in src.enumerate_pixels() {
        let tx = x + sx as i64;
        let ty = y + sy as i64;
        if tx < 0 || ty < 0 || tx >= dw || ty >= dh {
            continue;
        }
        blend(dest.get_pixel_mut(tx as u32, ty as u32), *p, brightness);
    }
}

/// Draws `src` resized to `width` x `height` with its top-left at `(x, y)`.
pub fn draw_scaled(dest: &mut RgbaImage, src: &RgbaImage, x: i64, y: i64, width: u32, height: u32) {
    if width == 0 || height == 0 {
        return;
    }
    if src.dimensions() == (width, height) {
        draw_with_brightness(dest, src, x, y, 1.0);
        return;
    }
    let scaled = imageops::resize(src, width, height, FilterType::Triangle);
    draw_with_brightness(dest, &scaled, x, y, 1.0);
}

pub fn load(path: &Path) -> Result<RgbaImage, ImageError> {
    Ok(image::open(path)?.to_rgba8())
}

/// Encodes in `format`. `quality` only affects jpeg; webp is written lossless.
pub fn encode(img: &RgbaImage, format: TileFormat, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    let (w, h) = img.dimensions();
    match format {
        TileFormat::Png => {
            PngEncoder::new(&mut buf).write_image(img.as_raw(), w, h, ExtendedColorType::Rgba8)?;
        }
        TileFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
                .write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)?;
        }
        TileFormat::Webp => {
            WebPEncoder::new_lossless(&mut buf).write_image(
                img.as_raw(),
                w,
                h,
                ExtendedColorType::Rgba8,
            )?;
        }
    }
    Ok(buf)
}

/// Encodes and writes `img`, creating parent directories.
pub fn save(img: &RgbaImage, path: &Path, format: TileFormat, quality: u8) -> Result<(), ImageError> {
    let bytes = encode(img, format, quality)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_scales_and_clips() {
        let mut dest = empty(4);
        let src = RgbaImage::from_pixel(2, 2, Rgba([100, 200, 50, 255]));
        draw_with_brightness(&mut dest, &src, 3, 3, 1.5);
        assert_eq!(dest.get_pixel(3, 3), &Rgba([150, 255, 75, 255]));
        assert_eq!(dest.get_pixel(2, 2)[3], 0);
        draw_with_brightness(&mut dest, &src, -1, -1, 1.0);
        assert_eq!(dest.get_pixel(0, 0), &Rgba([100, 200, 50, 255]));
    }

    #[test]
    fn translucent_over_opaque() {
        let mut dest = RgbaImage::from_pixel(1, 1, Rgba([200, 200, 200, 255]));
        let shade = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        draw_with_brightness(&mut dest, &shade, 0, 0, 1.0);
        let p = dest.get_pixel(0, 0);
        assert_eq!(p[3], 255);
        assert!(p[0] > 95 && p[0] < 105);
    }

    #[test]
    fn scaled_solid_fills_quadrant() {
        let mut dest = empty(8);
        let src = RgbaImage::from_pixel(8, 8, Rgba([9, 8, 7, 255]));
        draw_scaled(&mut dest, &src, 4, 0, 4, 4);
        assert_eq!(dest.get_pixel(5, 1), &Rgba([9, 8, 7, 255]));
        assert_eq!(dest.get_pixel(1, 1)[3], 0);
        assert_eq!(dest.get_pixel(5, 5)[3], 0);
    }

    #[test]
    fn save_and_load_each_format() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbaImage::from_pixel(16, 16, Rgba([40, 80, 120, 255]));
        for format in [TileFormat::Png, TileFormat::Jpeg, TileFormat::Webp] {
            let path = dir.path().join("a").join(format!("t.{}", format.extension()));
            save(&img, &path, format, 90).unwrap();
            let back = load(&path).unwrap();
            assert_eq!(back.dimensions(), (16, 16));
            if format != TileFormat::Jpeg {
                assert_eq!(back, img);
            }
        }
    }

    #[test]
    fn png_encoding_is_deterministic() {
        let img = RgbaImage::from_fn(8, 8, |x, y| Rgba([x as u8 * 10, y as u8 * 10, 0, 255]));
        assert_eq!(
            encode(&img, TileFormat::Png, 0).unwrap(),
            encode(&img, TileFormat::Png, 0).unwrap()
        );
    }
}
