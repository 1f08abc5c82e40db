//! `otpauth://` payload parsing

use super::OtpError;
use tracing::debug;
use url::Url;

/// Extract the `secret` query parameter from a decoded QR payload
///
/// Payloads that are not URIs, or URIs without a non-empty `secret`,
/// yield [`OtpError::SecretNotFound`].
pub fn extract_secret(payload: &[u8]) -> Result<String, OtpError> {
    let text = String::from_utf8_lossy(payload);
    let url = Url::parse(text.trim()).map_err(|e| {
        debug!("QR payload is not a URI: {}", e);
        OtpError::SecretNotFound
    })?;

    url.query_pairs()
        .find(|(key, _)| key == "secret")
        .map(|(_, value)| value.into_owned())
        .filter(|secret| !secret.is_empty())
        .ok_or(OtpError::SecretNotFound)
}
