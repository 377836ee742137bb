//! Network link manager
//!
//! Owns the station link state. It never retries on its own: on a drop it
//! clears to `Down` and the scheduler decides when to connect again.

use hal_abstractions::LinkDriver;

use crate::config::LinkCredentials;
use crate::error::{kind_name, SyncError};
use crate::time::{elapsed, Duration, Instant};

/// Station link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Down,
    Connecting,
    Up,
}

/// Address information reported when the link comes up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IpInfo {
    pub address: [u8; 4],
    pub gateway: Option<[u8; 4]>,
}

/// Why the link went down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DownReason {
    /// Established link lost (beacon timeout, cable, lease)
    Lost,
    /// Access point rejected the credentials
    AuthFailed,
    /// No access point with the configured name
    NoAccessPoint,
    /// Attempt abandoned after the connect deadline
    Timeout,
    /// Driver-specific reason code
    Other(u8),
}

/// Station link state machine
#[derive(Debug)]
pub struct NetworkLinkManager {
    state: LinkState,
    ip: Option<IpInfo>,
    attempt_started: Option<Instant>,
}

impl NetworkLinkManager {
    pub const fn new() -> Self {
        Self {
            state: LinkState::Down,
            ip: None,
            attempt_started: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_up(&self) -> bool {
        self.state == LinkState::Up
    }

    pub fn ip_info(&self) -> Option<IpInfo> {
        self.ip
    }

    /// Start joining the configured network
    ///
    /// No-op while already `Connecting` or `Up`. A driver refusal leaves the
    /// link `Down` so the next caller can try again.
    pub fn connect<D: LinkDriver>(
        &mut self,
        driver: &mut D,
        credentials: &LinkCredentials,
        now: Instant,
    ) -> Result<(), SyncError> {
        if self.state != LinkState::Down {
            return Ok(());
        }

        log_info!("Joining network '{}'", credentials.ssid.as_str());
        driver
            .begin_join(credentials.ssid.as_str(), credentials.passphrase.as_str())
            .map_err(|e| {
                log_warn!("Link driver refused join: {}", kind_name(&e));
                SyncError::Transport
            })?;

        self.state = LinkState::Connecting;
        self.attempt_started = Some(now);
        Ok(())
    }

    /// Whether a `Connecting` attempt has outlived `timeout`
    pub fn attempt_expired(&self, now: Instant, timeout: Duration) -> bool {
        match (self.state, self.attempt_started) {
            (LinkState::Connecting, Some(started)) => elapsed(now, started) >= timeout,
            _ => false,
        }
    }

    /// Give up on the current attempt and fall back to `Down`
    pub fn abandon<D: LinkDriver>(&mut self, driver: &mut D) {
        if self.state == LinkState::Connecting {
            log_warn!("Link attempt abandoned");
            driver.leave();
            self.clear();
        }
    }

    /// Hardware reports the link up; returns `true` on a transition
    pub fn on_up(&mut self, ip: IpInfo) -> bool {
        let was_up = self.is_up();
        self.state = LinkState::Up;
        self.ip = Some(ip);
        self.attempt_started = None;
        if !was_up {
            log_info!(
                "Link up: {}.{}.{}.{}",
                ip.address[0],
                ip.address[1],
                ip.address[2],
                ip.address[3]
            );
        }
        !was_up
    }

    /// Hardware reports the link down; returns `true` on a transition
    pub fn on_down(&mut self, reason: DownReason) -> bool {
        if self.state == LinkState::Down {
            return false;
        }
        log_warn!("Link down: {:?}", reason);
        self.clear();
        true
    }

    fn clear(&mut self) {
        self.state = LinkState::Down;
        self.ip = None;
        self.attempt_started = None;
    }
}

impl Default for NetworkLinkManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::at_secs;
    use hal_abstractions::mock::MockLink;

    const IP: IpInfo = IpInfo {
        address: [192, 168, 1, 42],
        gateway: Some([192, 168, 1, 1]),
    };

    fn credentials() -> LinkCredentials {
        LinkCredentials::new("Router-1234", "mypassword")
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut link = NetworkLinkManager::new();
        let mut driver = MockLink::default();

        link.connect(&mut driver, &credentials(), at_secs(0)).unwrap();
        link.connect(&mut driver, &credentials(), at_secs(1)).unwrap();
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(driver.joins, 1);

        link.on_up(IP);
        link.connect(&mut driver, &credentials(), at_secs(2)).unwrap();
        assert_eq!(driver.joins, 1);
        assert_eq!(driver.last_ssid.as_str(), "Router-1234");
    }

    #[test]
    fn test_driver_refusal_leaves_link_down() {
        let mut link = NetworkLinkManager::new();
        let mut driver = MockLink {
            fail_next: true,
            ..Default::default()
        };

        let result = link.connect(&mut driver, &credentials(), at_secs(0));
        assert_eq!(result, Err(SyncError::Transport));
        assert_eq!(link.state(), LinkState::Down);

        link.connect(&mut driver, &credentials(), at_secs(1)).unwrap();
        assert_eq!(link.state(), LinkState::Connecting);
    }

    #[test]
    fn test_down_clears_state() {
        let mut link = NetworkLinkManager::new();
        let mut driver = MockLink::default();
        link.connect(&mut driver, &credentials(), at_secs(0)).unwrap();
        assert!(link.on_up(IP));
        assert_eq!(link.ip_info(), Some(IP));

        assert!(link.on_down(DownReason::Lost));
        assert_eq!(link.state(), LinkState::Down);
        assert_eq!(link.ip_info(), None);
        assert!(!link.on_down(DownReason::Lost));
    }

    #[test]
    fn test_attempt_deadline() {
        let mut link = NetworkLinkManager::new();
        let mut driver = MockLink::default();
        let timeout = Duration::secs(10);
        link.connect(&mut driver, &credentials(), at_secs(0)).unwrap();

        assert!(!link.attempt_expired(at_secs(9), timeout));
        assert!(link.attempt_expired(at_secs(10), timeout));

        link.abandon(&mut driver);
        assert_eq!(link.state(), LinkState::Down);
        assert_eq!(driver.leaves, 1);
        assert!(!link.attempt_expired(at_secs(20), timeout));
    }

    #[test]
    fn test_unsolicited_up_is_accepted() {
        let mut link = NetworkLinkManager::new();
        assert!(link.on_up(IP));
        assert!(link.is_up());
        assert!(!link.on_up(IP));
    }
}
