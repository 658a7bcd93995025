//! Host wireless link driven through NetworkManager's `nmcli`

use super::wireless::WirelessLink;
use async_trait::async_trait;
use std::io;
use tokio::process::Command;
use tracing::{debug, warn};

/// NetworkManager device state for an activated connection
const STATE_ACTIVATED: u32 = 100;

/// Wireless station controlled with `nmcli`
pub struct NmcliLink {
    interface: String,
}

impl NmcliLink {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> io::Result<String> {
        let output = Command::new("nmcli").args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("nmcli {} failed: {}", args.join(" "), stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_logged(&self, args: &[&str]) {
        if let Err(e) = self.run(args).await {
            warn!("[WIFI] {}", e);
        }
    }
}

#[async_trait]
impl WirelessLink for NmcliLink {
    async fn associate(&mut self, ssid: &str, passphrase: &str) -> io::Result<()> {
        self.run(&["radio", "wifi", "on"]).await?;
        let mut args = vec!["--wait", "0", "device", "wifi", "connect", ssid];
        if !passphrase.is_empty() {
            args.extend(["password", passphrase]);
        }
        args.extend(["ifname", self.interface.as_str()]);
        self.run(&args).await?;
        Ok(())
    }

    async fn is_associated(&mut self) -> bool {
        match self
            .run(&["-t", "-f", "GENERAL.STATE", "device", "show", self.interface.as_str()])
            .await
        {
            Ok(out) => parse_device_state(&out) == Some(STATE_ACTIVATED),
            Err(e) => {
                debug!("[WIFI] State query failed: {}", e);
                false
            }
        }
    }

    async fn disassociate(&mut self) {
        self.run_logged(&["device", "disconnect", self.interface.as_str()]).await;
    }

    async fn power_down(&mut self) {
        self.run_logged(&["radio", "wifi", "off"]).await;
    }

    async fn rssi(&mut self) -> Option<i32> {
        let out = self
            .run(&[
                "-t",
                "-f",
                "ACTIVE,SIGNAL",
                "device",
                "wifi",
                "list",
                "ifname",
                self.interface.as_str(),
            ])
            .await
            .ok()?;
        parse_active_signal(&out).map(quality_to_dbm)
    }
}

/// Extract the numeric code from `GENERAL.STATE:100 (connected)`
pub fn parse_device_state(output: &str) -> Option<u32> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("GENERAL.STATE:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|code| code.parse().ok())
}

/// Signal quality (0-100) of the active access point in `ACTIVE,SIGNAL` rows
pub fn parse_active_signal(output: &str) -> Option<u8> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(active, _)| *active == "yes")
        .and_then(|(_, signal)| signal.trim().parse().ok())
}

/// NetworkManager's quality scale back to approximate dBm
pub fn quality_to_dbm(quality: u8) -> i32 {
    i32::from(quality.min(100)) / 2 - 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_state() {
        assert_eq!(parse_device_state("GENERAL.STATE:100 (connected)\n"), Some(100));
        assert_eq!(parse_device_state("GENERAL.STATE:30 (disconnected)"), Some(30));
        assert_eq!(parse_device_state("GENERAL.DEVICE:wlan0\n"), None);
        assert_eq!(parse_device_state(""), None);
    }

    #[test]
    fn test_parse_active_signal() {
        let out = "no:40\nyes:72\nno:88\n";
        assert_eq!(parse_active_signal(out), Some(72));
        assert_eq!(parse_active_signal("no:40\n"), None);
    }

    #[test]
    fn test_quality_to_dbm() {
        assert_eq!(quality_to_dbm(100), -50);
        assert_eq!(quality_to_dbm(72), -64);
        assert_eq!(quality_to_dbm(0), -100);
    }
}
