//! One-time password derivation
//!
//! A profile's QR image carries an `otpauth://` URI. On every connect attempt
//! we decode the image, pull the base32 `secret` out of the URI and compute
//! the current RFC 6238 code from it. Nothing here is cached or persisted.

pub mod qr;
pub mod secret;
pub mod totp;

pub use qr::{ImageQrDecoder, QrDecoder, QrError};
pub use secret::extract_secret;
pub use totp::{Clock, FixedClock, OneTimePassword, SystemClock};

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OtpError {
    #[error("QR code could not be decoded: {0}")]
    QrDecode(#[from] QrError),
    #[error("Secret key not found in QR code")]
    SecretNotFound,
    #[error("Invalid base32 secret")]
    InvalidSecret,
}

/// Decode the QR image at `path` and return the TOTP seed it carries
pub fn secret_from_qr(decoder: &dyn QrDecoder, path: &Path) -> Result<String, OtpError> {
    let payload = decoder.decode(path)?;
    extract_secret(&payload)
}
