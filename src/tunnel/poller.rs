//! Periodic ground-truth refresh
//!
//! Catches tunnels that drop (or appear) without going through the manager,
//! e.g. when the client dies or is started by hand.

use super::TunnelManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

pub struct StatusPoller {
    manager: Arc<TunnelManager>,
    period: Duration,
}

impl StatusPoller {
    pub fn new(manager: Arc<TunnelManager>, period: Duration) -> Self {
        Self { manager, period }
    }

    /// Refresh every period until `shutdown` becomes true or its sender drops
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!("Status poller started ({:?})", self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.manager.refresh();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Status poller stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::{FixedClock, QrDecoder, QrError};
    use crate::platform::{InterfaceProbe, PlatformError};
    use crate::tunnel::{ClientLaunch, ConnectionState, TunnelSettings};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct SwitchProbe(Arc<AtomicBool>);

    impl InterfaceProbe for SwitchProbe {
        fn interface(&self) -> &str {
            "tun9"
        }

        fn is_present(&self) -> Result<bool, PlatformError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    struct NoQr;

    impl QrDecoder for NoQr {
        fn decode(&self, _path: &Path) -> Result<Vec<u8>, QrError> {
            Err(QrError::NotFound)
        }
    }

    fn manager(temp_dir: &TempDir, up: &Arc<AtomicBool>) -> Arc<TunnelManager> {
        let settings = TunnelSettings {
            launch: ClientLaunch {
                binary: "/bin/false".to_string(),
                elevation: Vec::new(),
                extra_args: Vec::new(),
                pid_file: temp_dir.path().join("vpn_manager.pid"),
            },
            staging_dir: Some(temp_dir.path().to_path_buf()),
            connect_settle: Duration::from_millis(50),
            disconnect_settle: Duration::from_millis(50),
            settle_probe: Duration::from_millis(10),
        };
        Arc::new(TunnelManager::new(
            settings,
            Box::new(SwitchProbe(up.clone())),
            Box::new(NoQr),
            Box::new(FixedClock(59)),
        ))
    }

    #[tokio::test]
    async fn test_poller_publishes_drift() {
        let temp_dir = TempDir::new().unwrap();
        let up = Arc::new(AtomicBool::new(false));
        let manager = manager(&temp_dir, &up);
        let mut states = manager.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = StatusPoller::new(manager.clone(), Duration::from_millis(10)).spawn(shutdown_rx);

        up.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), states.changed())
            .await
            .expect("poller did not publish")
            .unwrap();
        assert_eq!(*states.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), poller)
            .await
            .expect("poller did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_poller_stops_when_sender_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let up = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = StatusPoller::new(manager(&temp_dir, &up), Duration::from_secs(60))
            .spawn(shutdown_rx);
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(5), poller)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
