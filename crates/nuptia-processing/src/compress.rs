//! Optional size reduction of images before they are uploaded.

use bytes::Bytes;
use image::imageops::FilterType;
use image::GenericImageView;

use nuptia_core::constants::DEFAULT_FRAME_QUALITY;
use nuptia_core::{FileKind, FrameFormat, UploadFile};

use crate::encode::encode_image;
use crate::error::FrameError;
use crate::sampler::fit_within;

#[derive(Debug, Clone, Copy)]
pub struct ImageCompressor {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
}

impl Default for ImageCompressor {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            quality: DEFAULT_FRAME_QUALITY,
        }
    }
}

impl ImageCompressor {
    /// Downscale into the box and re-encode in the same format.
    ///
    /// Files that are not still images in a format we can re-encode come back
    /// unchanged, as does any image whose re-encoding is not smaller.
    pub fn compress(&self, file: &UploadFile) -> Result<UploadFile, FrameError> {
        if file.kind != FileKind::Image {
            return Ok(file.clone());
        }
        let Ok(format) = file.content_type.parse::<FrameFormat>() else {
            return Ok(file.clone());
        };

        let img = image::load_from_memory(&file.data)?;
        let (width, height) = img.dimensions();
        let (target_width, target_height) =
            fit_within(width, height, Some(self.max_width), Some(self.max_height));

        let img = if (target_width, target_height) != (width, height) {
            img.resize_exact(target_width, target_height, FilterType::Lanczos3)
        } else {
            img
        };

        let encoded = encode_image(&img, format, self.quality)?;
        if encoded.len() >= file.data.len() {
            tracing::debug!(
                file_name = %file.file_name,
                original = file.data.len(),
                compressed = encoded.len(),
                "Compression did not reduce size, keeping original"
            );
            return Ok(file.clone());
        }

        tracing::info!(
            file_name = %file.file_name,
            original = file.data.len(),
            compressed = encoded.len(),
            width = target_width,
            height = target_height,
            "Image compressed"
        );

        Ok(UploadFile {
            data: Bytes::from(encoded),
            ..file.clone()
        })
    }
}
