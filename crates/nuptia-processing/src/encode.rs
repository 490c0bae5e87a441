//! Still-image encoding for sampled frames and compressed uploads.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, RgbaImage};

use nuptia_core::FrameFormat;

use crate::error::FrameError;

/// Encode a tightly packed RGBA buffer.
///
/// `quality` (1-100) applies to JPEG only; PNG and WebP output is lossless.
pub fn encode_rgba(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: FrameFormat,
    quality: u8,
) -> Result<Vec<u8>, FrameError> {
    let buffer = RgbaImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
        FrameError::Decode(format!(
            "pixel buffer of {} bytes does not match {}x{}",
            pixels.len(),
            width,
            height
        ))
    })?;
    encode_image(&DynamicImage::ImageRgba8(buffer), format, quality)
}

pub fn encode_image(
    img: &DynamicImage,
    format: FrameFormat,
    quality: u8,
) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    match format {
        FrameFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(
                &mut out,
                quality.clamp(1, 100),
            ))?;
        }
        FrameFormat::Png => {
            img.write_with_encoder(PngEncoder::new(&mut out))?;
        }
        FrameFormat::WebP => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut out))?;
        }
    }
    Ok(out)
}

/// `data:` URL for previewing encoded bytes without a round trip to storage.
pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}
