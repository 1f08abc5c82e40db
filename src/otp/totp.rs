//! RFC 6238 TOTP (HMAC-SHA1, 30-second step, 6 digits)

use super::OtpError;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const TIME_STEP_SECS: u64 = 30;
pub const DIGITS: u32 = 6;

/// Wall-clock source, injectable so codes are reproducible in tests
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn unix_time(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn unix_time(&self) -> u64 {
        self.0
    }
}

/// A generated code. Its `Debug` output is redacted so it cannot end up in
/// logs by accident; use [`OneTimePassword::expose`] to get the digits.
#[derive(Clone, PartialEq, Eq)]
pub struct OneTimePassword(String);

impl OneTimePassword {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OneTimePassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OneTimePassword(******)")
    }
}

/// Generate the code for the clock's current time step
pub fn generate(secret_b32: &str, clock: &dyn Clock) -> Result<OneTimePassword, OtpError> {
    generate_at(secret_b32, clock.unix_time())
}

/// Generate the code for an explicit Unix timestamp
pub fn generate_at(secret_b32: &str, unix_seconds: u64) -> Result<OneTimePassword, OtpError> {
    let key = decode_secret(secret_b32)?;
    let counter = unix_seconds / TIME_STEP_SECS;
    Ok(OneTimePassword(hotp(&key, counter, DIGITS)))
}

fn hotp(key: &[u8], counter: u64, digits: u32) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation (RFC 4226 §5.3)
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    let code = binary % 10u32.pow(digits);
    format!("{:0>width$}", code, width = digits as usize)
}

/// Decode a base32 seed, tolerating spaces, dashes, lowercase and missing padding
fn decode_secret(secret_b32: &str) -> Result<Vec<u8>, OtpError> {
    let cleaned: String = secret_b32
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .trim_end_matches('=')
        .to_uppercase();

    if cleaned.is_empty() {
        return Err(OtpError::InvalidSecret);
    }

    base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &cleaned)
        .filter(|key| !key.is_empty())
        .ok_or(OtpError::InvalidSecret)
}
