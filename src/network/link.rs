//! Link layer (WiFi association) abstraction and the NetworkManager
//! implementation

use async_trait::async_trait;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{LoggerError, Result};

/// Default sysfs root for interface state
const SYSFS_NET: &str = "/sys/class/net";

/// nmcli exit code for "connection, device or access point does not exist"
const NMCLI_NOT_FOUND: i32 = 10;

/// Seconds nmcli waits for the association to complete
const NMCLI_WAIT_SECS: &str = "30";

/// Link status as reported by the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    NoSsidAvail,
    ScanCompleted,
    Connected,
    ConnectFailed,
    ConnectionLost,
    Disconnected,
}

impl LinkStatus {
    /// Numeric status code for diagnostics
    pub fn code(self) -> u8 {
        match self {
            LinkStatus::Idle => 0,
            LinkStatus::NoSsidAvail => 1,
            LinkStatus::ScanCompleted => 2,
            LinkStatus::Connected => 3,
            LinkStatus::ConnectFailed => 4,
            LinkStatus::ConnectionLost => 5,
            LinkStatus::Disconnected => 6,
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LinkStatus::Idle => "idle",
            LinkStatus::NoSsidAvail => "SSID not found",
            LinkStatus::ScanCompleted => "scan completed",
            LinkStatus::Connected => "connected",
            LinkStatus::ConnectFailed => "connect failed",
            LinkStatus::ConnectionLost => "connection lost",
            LinkStatus::Disconnected => "disconnected",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

/// Trait for the link layer
#[async_trait]
pub trait Link: Send {
    /// Start associating with a network; completion is observed via `status`
    async fn begin(&mut self, ssid: &str, secret: &str) -> Result<()>;

    /// Current link status
    async fn status(&mut self) -> LinkStatus;
}

/// WiFi link managed through NetworkManager's `nmcli`
///
/// `begin` launches `nmcli device wifi connect` in the background; `status`
/// combines the outcome of that command with the interface's operstate.
pub struct NmcliLink {
    interface: String,
    sysfs_root: PathBuf,
    association: Option<Child>,
    was_up: bool,
}

impl fmt::Debug for NmcliLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NmcliLink")
            .field("interface", &self.interface)
            .field("associating", &self.association.is_some())
            .finish_non_exhaustive()
    }
}

impl NmcliLink {
    pub fn new(interface: &str) -> Self {
        Self::with_sysfs_root(interface, SYSFS_NET)
    }

    /// Read interface state from a different sysfs tree
    pub fn with_sysfs_root<P: Into<PathBuf>>(interface: &str, sysfs_root: P) -> Self {
        Self {
            interface: interface.to_string(),
            sysfs_root: sysfs_root.into(),
            association: None,
            was_up: false,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// `nmcli` invocation for an association; with `ask` the secret is read
    /// from stdin so it never appears in the process arguments
    fn association_command(&self, ssid: &str, ask: bool) -> Command {
        let mut command = Command::new("nmcli");
        command.args(["--wait", NMCLI_WAIT_SECS]);
        if ask {
            command.arg("--ask");
        }
        command
            .args(["device", "wifi", "connect", ssid, "ifname", self.interface.as_str()])
            .stdin(if ask { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn operstate(&self) -> Option<String> {
        let path = self.sysfs_root.join(&self.interface).join("operstate");
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    /// Outcome of a finished association attempt, if it failed
    fn association_failure(&mut self) -> Option<LinkStatus> {
        let child = self.association.as_mut()?;

        match child.try_wait() {
            Ok(None) => Some(LinkStatus::Disconnected),
            Ok(Some(status)) => {
                self.association = None;
                match status.code() {
                    Some(0) => None,
                    Some(NMCLI_NOT_FOUND) => Some(LinkStatus::NoSsidAvail),
                    _ => Some(LinkStatus::ConnectFailed),
                }
            }
            Err(e) => {
                debug!("Failed to poll nmcli: {}", e);
                self.association = None;
                Some(LinkStatus::ConnectFailed)
            }
        }
    }
}

#[async_trait]
impl Link for NmcliLink {
    async fn begin(&mut self, ssid: &str, secret: &str) -> Result<()> {
        if let Some(mut previous) = self.association.take() {
            let _ = previous.start_kill();
        }

        let ask = !secret.is_empty();
        let mut child = self
            .association_command(ssid, ask)
            .spawn()
            .map_err(|e| LoggerError::Link(format!("Failed to start nmcli: {}", e)))?;

        if ask {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(format!("{}\n", secret).as_bytes())
                    .await
                    .map_err(|e| LoggerError::Link(format!("Failed to pass secret to nmcli: {}", e)))?;
            }
        }

        self.association = Some(child);
        Ok(())
    }

    async fn status(&mut self) -> LinkStatus {
        match self.operstate().as_deref() {
            Some("up") => {
                self.was_up = true;
                return LinkStatus::Connected;
            }
            None => return LinkStatus::Idle,
            Some(_) => {}
        }

        if let Some(failure) = self.association_failure() {
            return failure;
        }

        if self.was_up {
            LinkStatus::ConnectionLost
        } else {
            LinkStatus::Disconnected
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sysfs_with(interface: &str, operstate: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let iface = dir.path().join(interface);
        fs::create_dir(&iface).unwrap();
        fs::write(iface.join("operstate"), format!("{}\n", operstate)).unwrap();
        dir
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(LinkStatus::Idle.code(), 0);
        assert_eq!(LinkStatus::NoSsidAvail.code(), 1);
        assert_eq!(LinkStatus::Connected.code(), 3);
        assert_eq!(LinkStatus::Disconnected.code(), 6);
        assert_eq!(LinkStatus::ConnectionLost.to_string(), "connection lost (5)");
    }

    #[test]
    fn test_secret_not_in_nmcli_arguments() {
        let link = NmcliLink::new("wlan0");
        let command = link.association_command("field", true);
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"--ask".to_string()));
        assert!(!args.iter().any(|arg| arg == "password"));
        assert_eq!(
            &args[args.len() - 6..],
            &["device", "wifi", "connect", "field", "ifname", "wlan0"]
        );
    }

    #[test]
    fn test_open_network_does_not_ask() {
        let link = NmcliLink::new("wlan0");
        let command = link.association_command("open-net", false);

        assert!(!command.as_std().get_args().any(|arg| arg == "--ask"));
    }

    #[tokio::test]
    async fn test_operstate_up_is_connected() {
        let sysfs = sysfs_with("wlan0", "up");
        let mut link = NmcliLink::with_sysfs_root("wlan0", sysfs.path());

        assert_eq!(link.status().await, LinkStatus::Connected);
    }

    #[tokio::test]
    async fn test_operstate_down_is_disconnected() {
        let sysfs = sysfs_with("wlan0", "down");
        let mut link = NmcliLink::with_sysfs_root("wlan0", sysfs.path());

        assert_eq!(link.status().await, LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_interface_is_idle() {
        let sysfs = sysfs_with("wlan0", "up");
        let mut link = NmcliLink::with_sysfs_root("wlan1", sysfs.path());

        assert_eq!(link.status().await, LinkStatus::Idle);
    }

    #[tokio::test]
    async fn test_drop_after_up_is_connection_lost() {
        let sysfs = sysfs_with("wlan0", "up");
        let mut link = NmcliLink::with_sysfs_root("wlan0", sysfs.path());
        assert_eq!(link.status().await, LinkStatus::Connected);

        fs::write(sysfs.path().join("wlan0").join("operstate"), "dormant\n").unwrap();
        assert_eq!(link.status().await, LinkStatus::ConnectionLost);
    }

    #[tokio::test]
    async fn test_mock_link_connects_after_polls() {
        let mut link = mocks::MockLink::down();
        link.connect_after(2);

        assert_eq!(link.status().await, LinkStatus::Disconnected);
        link.begin("net", "pw").await.unwrap();
        assert_eq!(link.status().await, LinkStatus::Disconnected);
        assert_eq!(link.status().await, LinkStatus::Disconnected);
        assert_eq!(link.status().await, LinkStatus::Connected);
        assert_eq!(link.begin_calls(), 1);
    }
}
