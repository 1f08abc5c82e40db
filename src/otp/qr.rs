//! QR image decoding
//!
//! The decoder is a narrow collaborator: it turns an image path into the raw
//! payload bytes of the first QR code found, and nothing else.

use image::GrayImage;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum QrError {
    #[error("No QR code found in image")]
    NotFound,
    #[error("Failed to read image {path}: {message}")]
    Unreadable { path: String, message: String },
    #[error("QR code is damaged: {0}")]
    Damaged(String),
}

/// Decodes a QR image into its raw payload
pub trait QrDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Vec<u8>, QrError>;
}

/// Decoder for image files (PNG, JPEG, ...) on disk
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageQrDecoder;

impl ImageQrDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode the first readable QR code in an already-loaded image
    pub fn decode_image(&self, image: &GrayImage) -> Result<Vec<u8>, QrError> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            image.width() as usize,
            image.height() as usize,
            |x, y| image.get_pixel(x as u32, y as u32).0[0],
        );

        let grids = prepared.detect_grids();
        debug!("Detected {} QR grid(s)", grids.len());

        let mut last_error = None;
        for grid in grids {
            let mut payload = Vec::new();
            match grid.decode_to(&mut payload) {
                Ok(_) => return Ok(payload),
                Err(e) => {
                    warn!("Skipping unreadable QR grid: {}", e);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(last_error.map_or(QrError::NotFound, QrError::Damaged))
    }
}

impl QrDecoder for ImageQrDecoder {
    fn decode(&self, path: &Path) -> Result<Vec<u8>, QrError> {
        debug!("Decoding QR image {}", path.display());
        let image = image::open(path)
            .map_err(|e| QrError::Unreadable {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .to_luma8();

        self.decode_image(&image)
    }
}
