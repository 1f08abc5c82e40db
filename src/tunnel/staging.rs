//! Transient credential files handed to the VPN client
//!
//! Two files are staged right before the client is spawned:
//!
//! - the auth file (`username\npassword\n`, mode 0600) for `--auth-user-pass`
//! - the driver script (mode 0700), a `/bin/sh` launcher that execs the
//!   client under the elevation wrapper with `--writepid` pointing at the
//!   handle file
//!
//! The one-time password is not written to either file; it is sent over the
//! client's stdin when it asks for it. Both files are removed by
//! [`StagedCredentials::cleanup`], or on drop if cleanup is never reached.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempPath};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Failed to write {what}: {source}")]
    WriteError {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("Failed to remove staged files: {0}")]
    CleanupError(#[source] io::Error),
}

/// How the VPN client is invoked
#[derive(Debug, Clone)]
pub struct ClientLaunch {
    pub binary: String,
    pub elevation: Vec<String>,
    pub extra_args: Vec<String>,
    pub pid_file: PathBuf,
}

impl ClientLaunch {
    /// Full argv: elevation wrapper, client, then the client arguments
    pub fn argv(&self, vpn_config: &Path, auth_file: &Path) -> Vec<String> {
        let mut argv = self.elevation.clone();
        argv.push(self.binary.clone());
        argv.push("--writepid".to_string());
        argv.push(self.pid_file.to_string_lossy().into_owned());
        argv.push("--config".to_string());
        argv.push(vpn_config.to_string_lossy().into_owned());
        argv.push("--auth-user-pass".to_string());
        argv.push(auth_file.to_string_lossy().into_owned());
        argv.extend(self.extra_args.iter().cloned());
        argv
    }
}

/// Staged auth file and driver script; both removed on cleanup or drop
#[derive(Debug)]
pub struct StagedCredentials {
    auth_file: TempPath,
    driver_script: TempPath,
}

impl StagedCredentials {
    pub fn auth_file(&self) -> &Path {
        &self.auth_file
    }

    pub fn driver_script(&self) -> &Path {
        &self.driver_script
    }

    /// Remove both files, reporting the first failure
    ///
    /// Both removals are attempted even if the first one fails.
    pub fn cleanup(self) -> Result<(), StagingError> {
        let auth = self.auth_file.close();
        let script = self.driver_script.close();
        auth.and(script).map_err(StagingError::CleanupError)?;
        debug!("Staged credentials removed");
        Ok(())
    }
}

/// Write the auth file and driver script into `dir`
pub fn stage(
    dir: &Path,
    launch: &ClientLaunch,
    username: &str,
    password: &str,
    vpn_config: &Path,
) -> Result<StagedCredentials, StagingError> {
    let auth_file = write_private(
        dir,
        "totp-vpn-auth-",
        "",
        format!("{}\n{}\n", username, password).as_bytes(),
        0o600,
    )
    .map_err(|source| StagingError::WriteError {
        what: "auth file",
        source,
    })?;

    let script = render_driver_script(&launch.argv(vpn_config, &auth_file));
    // auth_file is dropped (and removed) if this fails
    let driver_script = write_private(dir, "totp-vpn-driver-", ".sh", script.as_bytes(), 0o700)
        .map_err(|source| StagingError::WriteError {
            what: "driver script",
            source,
        })?;

    debug!(
        "Staged auth file {} and driver {}",
        auth_file.display(),
        driver_script.display()
    );

    Ok(StagedCredentials {
        auth_file,
        driver_script,
    })
}

fn write_private(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    content: &[u8],
    mode: u32,
) -> io::Result<TempPath> {
    let mut file = Builder::new().prefix(prefix).suffix(suffix).tempfile_in(dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    set_mode(file.path(), mode)?;
    // Closes the descriptor; the path stays owned by the guard
    Ok(file.into_temp_path())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn render_driver_script(argv: &[String]) -> String {
    let command = argv
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");

    format!("#!/bin/sh\n# Launches the VPN client; removed once it exits.\nexec {}\n", command)
}

fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_launch() -> ClientLaunch {
        ClientLaunch {
            binary: "openvpn".to_string(),
            elevation: vec!["pkexec".to_string()],
            extra_args: vec!["--verb".to_string(), "3".to_string()],
            pid_file: PathBuf::from("/tmp/vpn_manager.pid"),
        }
    }

    #[test]
    fn test_argv() {
        let argv = test_launch().argv(Path::new("/etc/work.ovpn"), Path::new("/tmp/auth"));
        assert_eq!(
            argv,
            vec![
                "pkexec",
                "openvpn",
                "--writepid",
                "/tmp/vpn_manager.pid",
                "--config",
                "/etc/work.ovpn",
                "--auth-user-pass",
                "/tmp/auth",
                "--verb",
                "3",
            ]
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf ~)"), "'$(rm -rf ~)'");
    }

    #[test]
    fn test_stage_writes_files() {
        let temp_dir = TempDir::new().unwrap();
        let staged = stage(
            temp_dir.path(),
            &test_launch(),
            "alice",
            "p1",
            Path::new("/etc/work.ovpn"),
        )
        .unwrap();

        let auth = std::fs::read_to_string(staged.auth_file()).unwrap();
        let mut lines = auth.lines();
        assert_eq!(lines.next(), Some("alice"));
        assert_eq!(lines.next(), Some("p1"));
        assert_eq!(lines.next(), None);
        assert_eq!(auth, "alice\np1\n");

        let script = std::fs::read_to_string(staged.driver_script()).unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("exec 'pkexec' 'openvpn' '--writepid' '/tmp/vpn_manager.pid'"));
        assert!(script.contains(&format!(
            "'--auth-user-pass' '{}'",
            staged.auth_file().display()
        )));
    }

    #[cfg(unix)]
    #[test]
    fn test_stage_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let staged = stage(
            temp_dir.path(),
            &test_launch(),
            "alice",
            "p1",
            Path::new("/etc/work.ovpn"),
        )
        .unwrap();

        let auth_mode = std::fs::metadata(staged.auth_file()).unwrap().permissions().mode();
        let script_mode = std::fs::metadata(staged.driver_script())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(auth_mode & 0o777, 0o600);
        assert_eq!(script_mode & 0o777, 0o700);
    }

    #[test]
    fn test_cleanup_removes_files() {
        let temp_dir = TempDir::new().unwrap();
        let staged = stage(
            temp_dir.path(),
            &test_launch(),
            "alice",
            "p1",
            Path::new("/etc/work.ovpn"),
        )
        .unwrap();
        let auth = staged.auth_file().to_path_buf();
        let script = staged.driver_script().to_path_buf();

        staged.cleanup().unwrap();

        assert!(!auth.exists());
        assert!(!script.exists());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_removes_files() {
        let temp_dir = TempDir::new().unwrap();
        let (auth, script) = {
            let staged = stage(
                temp_dir.path(),
                &test_launch(),
                "alice",
                "p1",
                Path::new("/etc/work.ovpn"),
            )
            .unwrap();
            (
                staged.auth_file().to_path_buf(),
                staged.driver_script().to_path_buf(),
            )
        };

        assert!(!auth.exists());
        assert!(!script.exists());
    }

    #[test]
    fn test_cleanup_reports_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let staged = stage(
            temp_dir.path(),
            &test_launch(),
            "alice",
            "p1",
            Path::new("/etc/work.ovpn"),
        )
        .unwrap();
        let script = staged.driver_script().to_path_buf();
        std::fs::remove_file(staged.auth_file()).unwrap();

        let result = staged.cleanup();

        assert!(matches!(result, Err(StagingError::CleanupError(_))));
        assert!(!script.exists());
    }

    #[test]
    fn test_stage_into_missing_dir_fails() {
        let result = stage(
            Path::new("/nonexistent/staging"),
            &test_launch(),
            "alice",
            "p1",
            Path::new("/etc/work.ovpn"),
        );
        assert!(matches!(
            result,
            Err(StagingError::WriteError {
                what: "auth file",
                ..
            })
        ));
    }
}
