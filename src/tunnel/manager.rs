//! Tunnel manager: the connect/disconnect orchestrator and state reconciler
//!
//! The manager owns the perceived [`ConnectionState`] and publishes it on a
//! watch channel. Ground truth always comes from the injected
//! [`InterfaceProbe`]; the published state is only ever a copy of what the
//! probe last said, except while a connect or disconnect is in flight.

use super::driver;
use super::handle::{HandleError, TunnelHandle};
use super::staging::{self, ClientLaunch};
use super::{ConnectOutcome, ConnectionState, DisconnectOutcome, TunnelError, stderr_or_unknown};
use crate::config::Config;
use crate::otp::{self, Clock, ImageQrDecoder, QrDecoder, SystemClock, totp};
use crate::platform::{self, InterfaceProbe, PlatformError};
use crate::profile::Profile;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything the manager needs to know besides its collaborators
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub launch: ClientLaunch,
    /// Where credentials are staged; system temp dir when `None`
    pub staging_dir: Option<PathBuf>,
    pub connect_settle: Duration,
    pub disconnect_settle: Duration,
    pub settle_probe: Duration,
}

impl TunnelSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            launch: ClientLaunch {
                binary: config.client.binary.clone(),
                elevation: config.client.elevation.clone(),
                extra_args: config.client.extra_args.clone(),
                pid_file: config.tunnel.pid_file.clone(),
            },
            staging_dir: config.tunnel.staging_dir.clone(),
            connect_settle: config.timing.connect_settle(),
            disconnect_settle: config.timing.disconnect_settle(),
            settle_probe: config.timing.settle_probe(),
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Snapshot for `status` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStatus {
    pub state: ConnectionState,
    pub interface: String,
    pub handle_pid: Option<u32>,
    pub client_alive: bool,
}

pub struct TunnelManager {
    settings: TunnelSettings,
    probe: Box<dyn InterfaceProbe>,
    decoder: Box<dyn QrDecoder>,
    clock: Box<dyn Clock>,
    handle: TunnelHandle,
    state: watch::Sender<ConnectionState>,
    /// Held for the whole of a connect or disconnect
    operation: Mutex<()>,
}

impl TunnelManager {
    pub fn new(
        settings: TunnelSettings,
        probe: Box<dyn InterfaceProbe>,
        decoder: Box<dyn QrDecoder>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let handle = TunnelHandle::new(settings.launch.pid_file.clone());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let manager = Self {
            settings,
            probe,
            decoder,
            clock,
            handle,
            state,
            operation: Mutex::new(()),
        };
        manager.publish(manager.observe());
        manager
    }

    /// Manager with the OS interface probe, image decoder and system clock
    pub fn from_config(config: &Config) -> Result<Self, PlatformError> {
        let probe = platform::get_interface_probe(&config.tunnel.interface)?;
        Ok(Self::new(
            TunnelSettings::from_config(config),
            probe,
            Box::new(ImageQrDecoder::new()),
            Box::new(SystemClock),
        ))
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Last published state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn interface(&self) -> &str {
        self.probe.interface()
    }

    /// Re-probe the interface and publish the result
    ///
    /// A transitional state is left alone; the operation that set it
    /// publishes the final state itself.
    pub fn refresh(&self) -> ConnectionState {
        let observed = self.observe();
        self.state.send_if_modified(|current| {
            if current.is_transitional() || *current == observed {
                return false;
            }
            debug!("State {} -> {}", current, observed);
            *current = observed;
            true
        });
        self.state()
    }

    pub fn status(&self) -> TunnelStatus {
        let state = self.refresh();
        let handle_pid = match self.handle.read_pid() {
            Ok(pid) => pid,
            Err(e) => {
                warn!("{}", e);
                None
            }
        };

        TunnelStatus {
            state,
            interface: self.interface().to_string(),
            handle_pid,
            client_alive: handle_pid.is_some_and(platform::is_process_alive),
        }
    }

    /// Bring the tunnel up for `profile`
    pub async fn connect(&self, profile: &Profile) -> Result<ConnectOutcome, TunnelError> {
        let _guard = self.operation.try_lock().map_err(|_| TunnelError::Busy)?;

        if self.observe() == ConnectionState::Connected {
            info!("VPN is already connected");
            self.publish(ConnectionState::Connected);
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        self.reclaim_handle().await?;

        info!("Connecting profile '{}'", profile.name);
        let secret = otp::secret_from_qr(self.decoder.as_ref(), &profile.qr_code_path)?;
        let code = totp::generate(&secret, self.clock.as_ref())?;

        let staged = staging::stage(
            &self.settings.staging_dir(),
            &self.settings.launch,
            &profile.username,
            &profile.password,
            &profile.ovpn_config_path,
        )?;

        self.publish(ConnectionState::Connecting);

        let exit = driver::run_driver(staged.driver_script(), &code).await;

        // The driver has exited by now, so nothing reads these any more
        if let Err(e) = staged.cleanup() {
            warn!("{}", e);
        }

        let result = match exit {
            Ok(exit) if exit.success() => {
                if self
                    .settle(ConnectionState::Connected, self.settings.connect_settle)
                    .await
                {
                    info!("VPN connected on {}", self.interface());
                    Ok(ConnectOutcome::Connected)
                } else {
                    warn!(
                        "{} did not appear within {:?}",
                        self.interface(),
                        self.settings.connect_settle
                    );
                    Err(TunnelError::ReconciliationMismatch {
                        expected: ConnectionState::Connected,
                    })
                }
            }
            Ok(exit) => {
                warn!("VPN client exited with {:?}", exit.code);
                self.discard_dead_handle().await;
                Err(TunnelError::ClientFailed {
                    code: exit.code,
                    stderr: stderr_or_unknown(exit.stderr.as_bytes()),
                })
            }
            Err(e) => Err(e),
        };

        self.publish(self.observe());
        result
    }

    /// Tear the tunnel down
    pub async fn disconnect(&self) -> Result<DisconnectOutcome, TunnelError> {
        let _guard = self.operation.try_lock().map_err(|_| TunnelError::Busy)?;

        if self.observe() == ConnectionState::Disconnected {
            info!("VPN is not connected");
            self.publish(ConnectionState::Disconnected);
            return Ok(DisconnectOutcome::NotConnected);
        }

        let pid = match self.handle.read_pid() {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                warn!(
                    "{} is up but {} is missing",
                    self.interface(),
                    self.handle.path().display()
                );
                self.publish(self.observe());
                return Err(TunnelError::StateDrift {
                    path: self.handle.path().to_path_buf(),
                });
            }
            Err(e) => {
                if matches!(e, HandleError::InvalidPid { .. }) {
                    self.discard_handle().await;
                }
                self.publish(self.observe());
                return Err(e.into());
            }
        };

        self.publish(ConnectionState::Disconnecting);
        info!("Stopping VPN client (pid {})", pid);

        let result = match self.terminate(pid).await {
            Ok(()) => {
                if self
                    .settle(ConnectionState::Disconnected, self.settings.disconnect_settle)
                    .await
                {
                    self.discard_handle().await;
                    info!("VPN disconnected");
                    Ok(DisconnectOutcome::Disconnected)
                } else {
                    warn!(
                        "{} still present after {:?}",
                        self.interface(),
                        self.settings.disconnect_settle
                    );
                    Err(TunnelError::ReconciliationMismatch {
                        expected: ConnectionState::Disconnected,
                    })
                }
            }
            Err(e) => {
                self.discard_handle().await;
                Err(e)
            }
        };

        self.publish(self.observe());
        result
    }

    /// Ground truth; probe failures count as "no tunnel"
    fn observe(&self) -> ConnectionState {
        match self.probe.is_present() {
            Ok(present) => ConnectionState::from_presence(present),
            Err(e) => {
                warn!("Interface probe failed: {}", e);
                ConnectionState::Disconnected
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("State {} -> {}", current, state);
            *current = state;
            true
        });
    }

    /// Probe until the interface reaches `target` or `window` runs out
    async fn settle(&self, target: ConnectionState, window: Duration) -> bool {
        // Too large to represent means no deadline at all
        let deadline = Instant::now().checked_add(window);
        loop {
            if self.observe() == target {
                return true;
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.settings.settle_probe.min(deadline - now)
                }
                None => self.settings.settle_probe,
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Clear a handle left behind by a client that is gone
    async fn reclaim_handle(&self) -> Result<(), TunnelError> {
        match self.handle.read_pid() {
            Ok(None) => Ok(()),
            Ok(Some(pid)) if platform::is_process_alive(pid) => {
                Err(TunnelError::TunnelActive { pid })
            }
            Ok(Some(pid)) => {
                info!("Removing stale handle of exited client (pid {})", pid);
                self.discard_handle().await;
                Ok(())
            }
            Err(HandleError::InvalidPid { content, .. }) => {
                warn!("Removing unreadable handle file ({:?})", content);
                self.discard_handle().await;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_dead_handle(&self) {
        match self.handle.read_pid() {
            Ok(Some(pid)) if !platform::is_process_alive(pid) => self.discard_handle().await,
            Err(HandleError::InvalidPid { .. }) => self.discard_handle().await,
            _ => {}
        }
    }

    async fn discard_handle(&self) {
        let path = self.handle.path();
        match self.handle.remove() {
            Ok(removed) => {
                if removed {
                    debug!("Removed {}", path.display());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                debug!("Removing {} with elevation", path.display());
                let output = self
                    .elevated("rm")
                    .arg("-f")
                    .arg(path)
                    .stdin(Stdio::null())
                    .output()
                    .await;
                match output {
                    Ok(output) if output.status.success() => {}
                    Ok(output) => warn!(
                        "Failed to remove {}: {}",
                        path.display(),
                        stderr_or_unknown(&output.stderr)
                    ),
                    Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
                }
            }
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    async fn terminate(&self, pid: u32) -> Result<(), TunnelError> {
        let program = self
            .settings
            .launch
            .elevation
            .first()
            .cloned()
            .unwrap_or_else(|| "kill".to_string());

        let output = self
            .elevated("kill")
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TunnelError::ProcessSpawn {
                program,
                message: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TunnelError::CommandFailed {
                command: format!("kill {}", pid),
                stderr: stderr_or_unknown(&output.stderr),
            })
        }
    }

    /// `program` under the configured elevation wrapper
    fn elevated(&self, program: &str) -> Command {
        match self.settings.launch.elevation.split_first() {
            Some((wrapper, args)) => {
                let mut command = Command::new(wrapper);
                command.args(args).arg(program);
                command
            }
            None => Command::new(program),
        }
    }
}
