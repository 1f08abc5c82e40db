//! Shared fixtures for the tunnel lifecycle tests
//!
//! The VPN client is replaced by small shell scripts, the interface table by
//! a marker file (or a pid), and the QR image by a fixed payload.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use totp_vpn::Profile;
use totp_vpn::otp::{FixedClock, QrDecoder, QrError};
use totp_vpn::platform::{self, InterfaceProbe, PlatformError};
use totp_vpn::tunnel::{ClientLaunch, TunnelManager, TunnelSettings};

pub const OTPAUTH_URI: &str = "otpauth://totp/ACME:alice?secret=JBSWY3DPEHPK3PXP&issuer=ACME";

/// TOTP of `JBSWY3DPEHPK3PXP` at t=59
pub const EXPECTED_OTP: &str = "996554";

pub struct StaticQrDecoder(pub Vec<u8>);

impl QrDecoder for StaticQrDecoder {
    fn decode(&self, _path: &Path) -> Result<Vec<u8>, QrError> {
        Ok(self.0.clone())
    }
}

/// Tunnel is up while the marker file exists
pub struct FileProbe(pub PathBuf);

impl InterfaceProbe for FileProbe {
    fn interface(&self) -> &str {
        "tun-test"
    }

    fn is_present(&self) -> Result<bool, PlatformError> {
        Ok(self.0.exists())
    }
}

/// Tunnel is up while the process is alive
pub struct PidProbe(pub u32);

impl InterfaceProbe for PidProbe {
    fn interface(&self) -> &str {
        "tun-test"
    }

    fn is_present(&self) -> Result<bool, PlatformError> {
        Ok(platform::is_process_alive(self.0))
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub staging: PathBuf,
    pub pid_file: PathBuf,
    pub marker: PathBuf,
    pub elevation_log: PathBuf,
    /// Shell run by the elevation wrapper before the command itself
    pub elevation_prelude: String,
    pub settle: Duration,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir(&staging).unwrap();

        Self {
            pid_file: dir.path().join("vpn_manager.pid"),
            marker: dir.path().join("tun.up"),
            elevation_log: dir.path().join("elevated.log"),
            staging,
            dir,
            elevation_prelude: String::new(),
            settle: Duration::from_secs(5),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Fake VPN client; `body` runs after the arguments are parsed into
    /// `$pid_file`, `$config` and `$auth`
    pub fn write_client(&self, body: &str) -> PathBuf {
        let script = format!(
            r#"#!/bin/sh
while [ $# -gt 0 ]; do
    case "$1" in
        --writepid) pid_file="$2"; shift 2 ;;
        --config) config="$2"; shift 2 ;;
        --auth-user-pass) auth="$2"; shift 2 ;;
        *) shift ;;
    esac
done
{}
"#,
            body
        );
        self.write_executable("fake-openvpn", &script)
    }

    /// Elevation wrapper that logs its arguments and runs the command
    pub fn write_elevation(&self) -> PathBuf {
        let script = format!(
            r#"#!/bin/sh
echo "$*" >> '{}'
{}
if [ "$1" = kill ]; then
    shift
    kill "$@"
    exit $?
fi
exec "$@"
"#,
            self.elevation_log.display(),
            self.elevation_prelude
        );
        self.write_executable("fake-pkexec", &script)
    }

    fn write_executable(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub fn settings(&self, client: &Path) -> TunnelSettings {
        TunnelSettings {
            launch: ClientLaunch {
                binary: client.to_string_lossy().into_owned(),
                elevation: vec![self.write_elevation().to_string_lossy().into_owned()],
                extra_args: Vec::new(),
                pid_file: self.pid_file.clone(),
            },
            staging_dir: Some(self.staging.clone()),
            connect_settle: self.settle,
            disconnect_settle: self.settle,
            settle_probe: Duration::from_millis(20),
        }
    }

    pub fn manager(&self, client: &Path, probe: Box<dyn InterfaceProbe>) -> TunnelManager {
        TunnelManager::new(
            self.settings(client),
            probe,
            Box::new(StaticQrDecoder(OTPAUTH_URI.as_bytes().to_vec())),
            Box::new(FixedClock(59)),
        )
    }

    pub fn file_probe(&self) -> Box<dyn InterfaceProbe> {
        Box::new(FileProbe(self.marker.clone()))
    }

    pub fn profile(&self) -> Profile {
        Profile {
            id: 1,
            name: "work".to_string(),
            username: "alice".to_string(),
            password: "p1".to_string(),
            qr_code_path: self.path("qr.png"),
            ovpn_config_path: self.path("work.ovpn"),
        }
    }

    /// Files left in the staging directory
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(&self.staging).unwrap().count()
    }

    pub fn elevated_calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.elevation_log)
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn kill_calls(&self) -> Vec<String> {
        self.elevated_calls()
            .into_iter()
            .filter(|call| call.starts_with("kill "))
            .collect()
    }
}
