//! Tunnel orchestration
//!
//! Brings a single OpenVPN tunnel up and down by driving the external client
//! binary, answering its `CHALLENGE:` prompt with a fresh TOTP code, and
//! reconciling what we believe against what the interface table shows.
//!
//! # Lifecycle
//!
//! - `connect`: QR → secret → OTP → staged credentials → driver → settle
//! - `disconnect`: handle file → privileged kill → settle → remove handle
//! - `refresh`: probe the tunnel interface and publish the result
//!
//! At most one connect or disconnect runs at a time; a second caller gets
//! [`TunnelError::Busy`].

pub mod driver;
pub mod handle;
pub mod manager;
pub mod poller;
pub mod staging;

pub use handle::{HandleError, TunnelHandle};
pub use manager::{TunnelManager, TunnelSettings, TunnelStatus};
pub use poller::StatusPoller;
pub use staging::{ClientLaunch, StagedCredentials, StagingError};

use crate::otp::OtpError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Perceived tunnel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Connecting or Disconnecting: an operation owns the state
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    pub(crate) fn from_presence(present: bool) -> Self {
        if present {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    NotConnected,
}

/// Broad failure classes, used to pick how a failure is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The profile needs fixing (QR image, secret); retrying will not help
    Configuration,
    /// A process could not be started or reported failure
    ProcessSpawn,
    /// The command succeeded but the interface disagrees; retry is allowed
    ReconciliationMismatch,
    /// Our belief and the handle file disagree
    StateDrift,
    /// Another operation is in flight
    Busy,
}

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Another connect or disconnect is already in progress")]
    Busy,

    #[error("Failed to generate OTP: {0}")]
    Otp(#[from] OtpError),

    #[error("Failed to stage credentials: {0}")]
    Staging(#[from] StagingError),

    #[error("Failed to start {program}: {message}")]
    ProcessSpawn { program: String, message: String },

    #[error("VPN connection error: {stderr}")]
    ClientFailed { code: Option<i32>, stderr: String },

    #[error("VPN disconnect error: {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("{}", mismatch_message(*expected))]
    ReconciliationMismatch { expected: ConnectionState },

    #[error("PID file not found: {}", path.display())]
    StateDrift { path: PathBuf },

    #[error("Handle file error: {0}")]
    Handle(#[from] HandleError),

    #[error("A VPN client is already running (pid {pid})")]
    TunnelActive { pid: u32 },
}

fn mismatch_message(expected: ConnectionState) -> &'static str {
    match expected {
        ConnectionState::Disconnected | ConnectionState::Disconnecting => {
            "VPN failed to disconnect"
        }
        ConnectionState::Connected | ConnectionState::Connecting => {
            "VPN connection failed to establish"
        }
    }
}

impl TunnelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy => ErrorKind::Busy,
            Self::Otp(_) => ErrorKind::Configuration,
            Self::Staging(_)
            | Self::ProcessSpawn { .. }
            | Self::ClientFailed { .. }
            | Self::CommandFailed { .. } => ErrorKind::ProcessSpawn,
            Self::ReconciliationMismatch { .. } => ErrorKind::ReconciliationMismatch,
            Self::StateDrift { .. } | Self::Handle(_) | Self::TunnelActive { .. } => {
                ErrorKind::StateDrift
            }
        }
    }

    /// Whether simply trying again later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ReconciliationMismatch | ErrorKind::Busy
        )
    }
}

/// Captured stderr, or a placeholder when the process printed nothing
pub(crate) fn stderr_or_unknown(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr).trim().to_string();
    if text.is_empty() {
        "Unknown error occurred.".to_string()
    } else {
        text
    }
}
