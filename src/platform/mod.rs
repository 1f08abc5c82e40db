//! Platform-specific ground-truth checks
//!
//! The tunnel is considered up when its network interface exists in the OS
//! interface table. Nothing here is cached: every call re-queries the OS,
//! because the VPN client can exit without our involvement.

#[cfg(unix)]
pub mod unix;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Failed to query network interfaces: {0}")]
    InterfaceQueryError(String),
    #[error("Unsupported platform")]
    UnsupportedPlatform,
}

/// Platform-agnostic tunnel interface probe
pub trait InterfaceProbe: Send + Sync {
    /// Name of the interface being probed (e.g. `tun0`)
    fn interface(&self) -> &str;

    /// Whether the interface currently exists
    fn is_present(&self) -> Result<bool, PlatformError>;
}

/// Get the interface probe for the current platform
pub fn get_interface_probe(
    interface: &str,
) -> Result<Box<dyn InterfaceProbe>, PlatformError> {
    #[cfg(unix)]
    {
        Ok(Box::new(unix::UnixInterfaceProbe::new(interface)))
    }

    #[cfg(not(unix))]
    {
        let _ = interface;
        Err(PlatformError::UnsupportedPlatform)
    }
}

/// Whether a process with this pid still exists
///
/// A process owned by another user (e.g. a client started through the
/// elevation wrapper) counts as alive.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unix::is_process_alive(pid)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
