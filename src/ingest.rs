//! pixvault - Ingest Pipeline
//!
//! Turns image bytes into a `Photo`: dimensions and a square JPEG thumbnail.

use std::io::Cursor;
use std::path::Path;

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};

use crate::error::{VaultError, VaultResult};
use crate::store::Photo;

/// Decodes uploads and renders thumbnails
#[derive(Debug, Clone, Copy)]
pub struct Ingestor {
    /// Thumbnail edge (square)
    thumb_size: u32,
}

impl Ingestor {
    pub fn new(thumb_size: u32) -> Self {
        Self {
            thumb_size: thumb_size.max(1),
        }
    }

    /// Build a photo from encoded image bytes; the original bytes are kept
    pub fn ingest(&self, name: &str, image_data: Vec<u8>) -> VaultResult<Photo> {
        let img = image::load_from_memory(&image_data)?;
        let (width, height) = img.dimensions();
        let thumbnail = self.thumbnail(&img)?;

        log::debug!("Ingested {} ({}x{})", name, width, height);
        Ok(Photo::new(name, width, height, image_data, thumbnail))
    }

    /// Read and ingest a file, named after its file name
    pub fn ingest_file(&self, path: &Path) -> VaultResult<Photo> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                VaultError::ImageError(format!("no usable file name: {}", path.display()))
            })?;

        self.ingest(name, data)
    }

    /// Center-cropped square thumbnail, JPEG encoded
    fn thumbnail(&self, img: &DynamicImage) -> VaultResult<Vec<u8>> {
        let (width, height) = img.dimensions();

        let (crop_x, crop_y, side) = if width > height {
            ((width - height) / 2, 0, height)
        } else {
            (0, (height - width) / 2, width)
        };

        let thumb = img
            .crop_imm(crop_x, crop_y, side, side)
            .resize_exact(self.thumb_size, self.thumb_size, FilterType::Lanczos3);

        // JPEG has no alpha channel
        let thumb = DynamicImage::ImageRgb8(thumb.to_rgb8());

        let mut output = Vec::new();
        thumb.write_to(&mut Cursor::new(&mut output), ImageFormat::Jpeg)?;
        Ok(output)
    }
}
