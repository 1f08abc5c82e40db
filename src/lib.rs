//! totp-vpn - OpenVPN profiles with TOTP challenge-response
//!
//! Brings an OpenVPN tunnel up and down for a stored profile. The profile
//! holds static credentials plus a QR image of the TOTP enrolment; on
//! connect the QR seed is decoded, a one-time password is computed, and the
//! client's `CHALLENGE:` prompt is answered with it.
//!
//! # Architecture
//!
//! - `config`: Configuration file handling (TOML)
//! - `profile`: Profile catalog (JSON)
//! - `otp`: QR decoding, seed extraction and TOTP generation
//! - `platform`: Interface probe and process checks
//! - `tunnel`: Credential staging, client driver, orchestration and polling
//! - `notify`: Result reports and desktop notifications
//!
//! # Usage
//!
//! ```bash
//! totp-vpn profile add --name work --username alice --qr qr.png --ovpn work.ovpn
//! totp-vpn connect work
//! totp-vpn disconnect
//! ```

pub mod config;
pub mod notify;
pub mod otp;
pub mod platform;
pub mod profile;
pub mod tunnel;

pub use config::Config;
pub use notify::Report;
pub use profile::{NewProfile, Profile, ProfileStore};
pub use tunnel::{ConnectionState, StatusPoller, TunnelError, TunnelManager};
