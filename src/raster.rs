use std::fmt;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageEncoder, RgbaImage};

use crate::coord::BBox;
use crate::error::{Result, TileError};

const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Output format named the way map renderers do: `png`, `png8`, `png32`,
/// `jpeg`, `jpeg80`, `jpg`, `webp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Png,
    Jpeg { quality: u8 },
    Webp,
}

impl FromStr for RasterFormat {
    type Err = TileError;

    fn from_str(name: &str) -> Result<Self> {
        let lower = name.trim().to_ascii_lowercase();
        // Options after ':' (e.g. "png:z=9") are accepted and ignored.
        let base = lower.split(':').next().unwrap_or_default();
        if base.starts_with("png") {
            return Ok(RasterFormat::Png);
        }
        if base == "webp" {
            return Ok(RasterFormat::Webp);
        }
        for prefix in ["jpeg", "jpg"] {
            if let Some(rest) = base.strip_prefix(prefix) {
                if rest.is_empty() {
                    return Ok(RasterFormat::Jpeg {
                        quality: DEFAULT_JPEG_QUALITY,
                    });
                }
                return match rest.parse::<u8>() {
                    Ok(quality) if (1..=100).contains(&quality) => Ok(RasterFormat::Jpeg { quality }),
                    _ => Err(TileError::UnsupportedFormat(name.to_string())),
                };
            }
        }
        Err(TileError::UnsupportedFormat(name.to_string()))
    }
}

impl fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterFormat::Png => write!(f, "png"),
            RasterFormat::Jpeg { quality } => write!(f, "jpeg{quality}"),
            RasterFormat::Webp => write!(f, "webp"),
        }
    }
}

impl RasterFormat {
    pub fn encode(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer: Vec<u8> = Vec::new();
        match self {
            RasterFormat::Png => {
                let rgba = image.to_rgba8();
                PngEncoder::new(&mut buffer).write_image(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    image::ExtendedColorType::Rgba8,
                )?;
            }
            RasterFormat::Jpeg { quality } => {
                // JPEG has no alpha channel.
                let rgb = image.to_rgb8();
                JpegEncoder::new_with_quality(&mut buffer, *quality).write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    image::ExtendedColorType::Rgb8,
                )?;
            }
            RasterFormat::Webp => {
                let rgba = image.to_rgba8();
                WebPEncoder::new_lossless(&mut buffer).write_image(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    image::ExtendedColorType::Rgba8,
                )?;
            }
        }
        Ok(buffer)
    }
}

pub fn encode_image(image: &DynamicImage, format: &str) -> Result<Vec<u8>> {
    format.parse::<RasterFormat>()?.encode(image)
}

/// Resamples the part of a georeferenced `image` covering `tile` into a
/// square of `size` pixels. Areas outside the source stay transparent.
pub fn resample_to_tile(image: &DynamicImage, source: &BBox, tile: &BBox, size: u32) -> Option<RgbaImage> {
    let overlap = source.intersection(tile)?;
    let (img_w, img_h) = (f64::from(image.width()), f64::from(image.height()));
    let src_x = |x: f64| ((x - source.min_x) / source.width() * img_w).clamp(0.0, img_w);
    let src_y = |y: f64| ((source.max_y - y) / source.height() * img_h).clamp(0.0, img_h);
    let x0 = src_x(overlap.min_x).floor() as u32;
    let x1 = src_x(overlap.max_x).ceil() as u32;
    let y0 = src_y(overlap.max_y).floor() as u32;
    let y1 = src_y(overlap.min_y).ceil() as u32;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let side = f64::from(size);
    let dst_x = |x: f64| ((x - tile.min_x) / tile.width() * side).round() as i64;
    let dst_y = |y: f64| ((tile.max_y - y) / tile.height() * side).round() as i64;
    let left = dst_x(overlap.min_x);
    let top = dst_y(overlap.max_y);
    let width = (dst_x(overlap.max_x) - left).max(1) as u32;
    let height = (dst_y(overlap.min_y) - top).max(1) as u32;

    let window = image
        .crop_imm(x0, y0, x1 - x0, y1 - y0)
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgba8();
    let mut canvas = RgbaImage::new(size, size);
    imageops::overlay(&mut canvas, &window, left, top);
    Some(canvas)
}
