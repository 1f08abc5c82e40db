//! User-facing results of connect and disconnect
//!
//! Each operation ends in a [`Report`]: a short title plus a message. The
//! CLI prints it and, when enabled, raises a desktop notification too.

use crate::tunnel::{ConnectOutcome, DisconnectOutcome, ErrorKind, TunnelError};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub title: String,
    pub message: String,
    pub is_error: bool,
}

impl Report {
    pub fn info(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
            is_error: true,
        }
    }

    pub fn for_connect(result: &Result<ConnectOutcome, TunnelError>) -> Self {
        match result {
            Ok(ConnectOutcome::Connected) => {
                Self::info("Connected", "VPN connection established successfully.")
            }
            Ok(ConnectOutcome::AlreadyConnected) => {
                Self::info("Already Connected", "VPN is already connected.")
            }
            Err(e @ TunnelError::ReconciliationMismatch { .. }) => {
                Self::failure("Connection Failed", e)
            }
            Err(e @ TunnelError::ClientFailed { .. }) => Self::failure("Connection Error", e),
            Err(e) => Self::failure(error_title(e), e),
        }
    }

    pub fn for_disconnect(result: &Result<DisconnectOutcome, TunnelError>) -> Self {
        match result {
            Ok(DisconnectOutcome::Disconnected) => {
                Self::info("Disconnected", "VPN disconnected successfully.")
            }
            Ok(DisconnectOutcome::NotConnected) => {
                Self::info("Not Connected", "VPN is not connected.")
            }
            Err(e @ TunnelError::ReconciliationMismatch { .. }) => {
                Self::failure("Disconnect Failed", e)
            }
            Err(
                e @ (TunnelError::CommandFailed { .. }
                | TunnelError::StateDrift { .. }
                | TunnelError::Handle(_)),
            ) => Self::failure("Disconnect Error", e),
            Err(e) => Self::failure(error_title(e), e),
        }
    }

    /// Error report for `e`, pointing out when another attempt may succeed
    fn failure(title: &str, e: &TunnelError) -> Self {
        if e.is_retryable() {
            Self::error(title, format!("{}. {}", e, RETRY_HINT))
        } else {
            Self::error(title, e.to_string())
        }
    }
}

const RETRY_HINT: &str = "Please try again.";

fn error_title(e: &TunnelError) -> &'static str {
    match e.kind() {
        ErrorKind::Busy => "Busy",
        _ => "Error",
    }
}

/// Print a report, and raise a desktop notification when `desktop` is set
pub fn show(report: &Report, desktop: bool) {
    if report.is_error {
        eprintln!("{}: {}", report.title, report.message);
    } else {
        println!("{}: {}", report.title, report.message);
    }

    if desktop && !notify_desktop(report) {
        // Already printed; keep a trace in the log as well
        if report.is_error {
            error!("{}: {}", report.title, report.message);
        } else {
            info!("{}: {}", report.title, report.message);
        }
    }
}

#[cfg(not(windows))]
fn notify_desktop(report: &Report) -> bool {
    let result = notify_rust::Notification::new()
        .appname("totp-vpn")
        .summary(&report.title)
        .body(&report.message)
        .show();

    match result {
        Ok(_) => true,
        Err(e) => {
            debug!("Desktop notification unavailable: {}", e);
            false
        }
    }
}

#[cfg(windows)]
fn notify_desktop(_report: &Report) -> bool {
    debug!("Desktop notifications are not supported on this platform");
    false
}
