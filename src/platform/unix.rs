//! Unix interface and process checks via libc (getifaddrs, kill(0))

use super::{InterfaceProbe, PlatformError};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::debug;

pub struct UnixInterfaceProbe {
    interface: String,
}

impl UnixInterfaceProbe {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
        }
    }
}

impl InterfaceProbe for UnixInterfaceProbe {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn is_present(&self) -> Result<bool, PlatformError> {
        let addrs = nix::ifaddrs::getifaddrs()
            .map_err(|e| PlatformError::InterfaceQueryError(e.to_string()))?;

        let present = addrs
            .into_iter()
            .any(|ifaddr| ifaddr.interface_name == self.interface);
        debug!("Interface {} present: {}", self.interface, present);
        Ok(present)
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_is_present() {
        // Every Unix host has a loopback interface, named lo or lo0
        let present = ["lo", "lo0"]
            .iter()
            .any(|name| UnixInterfaceProbe::new(name).is_present().unwrap());
        assert!(present);
    }

    #[test]
    fn test_missing_interface_is_absent() {
        let probe = UnixInterfaceProbe::new("totpvpn-none9");
        assert!(!probe.is_present().unwrap());
    }

    #[test]
    fn test_invalid_pids_are_not_alive() {
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(u32::MAX));
    }
}
