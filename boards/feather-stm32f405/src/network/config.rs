#![deny(unsafe_code)]
#![deny(warnings)]
//! Board network configuration
//!
//! Engine defaults come from `clock_core::config`. Link credentials and the
//! broker host can be overridden at build time:
//!
//! ```text
//! CLOCK_WIFI_SSID=... CLOCK_WIFI_PASS=... CLOCK_MQTT_HOST=192.168.1.1 cargo build
//! ```

use clock_core::config::{bounded, EngineConfig, LinkCredentials};
use defmt::warn;

use crate::device_id;

/// Network stack configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// MAC address for Ethernet
    pub mac_addr: [u8; 6],
    /// Random seed for network stack
    pub seed: u64,
}

impl NetworkConfig {
    /// Locally administered MAC and stack seed derived from the chip UID
    pub fn from_uid(uid: &[u8; 12]) -> Self {
        let mut mac_addr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x00];
        mac_addr[2..].copy_from_slice(&uid[8..12]);

        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&uid[..8]);
        Self {
            mac_addr,
            seed: u64::from_le_bytes(seed_bytes),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac_addr: [0x02, 0x00, 0x00, 0x12, 0x34, 0x56],
            seed: 0x1234_5678_u64,
        }
    }
}

/// Engine configuration for this board
pub fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();

    config.credentials = LinkCredentials::new(
        option_env!("CLOCK_WIFI_SSID").unwrap_or(""),
        option_env!("CLOCK_WIFI_PASS").unwrap_or(""),
    );

    if let Some(host) = option_env!("CLOCK_MQTT_HOST") {
        match bounded(host) {
            Some(host) => config.broker.host = host,
            None => warn!("CLOCK_MQTT_HOST too long, keeping {}", config.broker.host.as_str()),
        }
    }

    match bounded(device_id::mqtt_client_id().as_str()) {
        Some(id) => config.broker.client_id = id,
        None => warn!("Client ID too long, keeping default"),
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_from_uid_is_locally_administered() {
        let uid = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let config = NetworkConfig::from_uid(&uid);
        assert_eq!(config.mac_addr, [0x02, 0x00, 9, 10, 11, 12]);
        assert_eq!(config.seed, u64::from_le_bytes([1, 2, 3, 4, 5, 6, 7, 8]));
    }
}
