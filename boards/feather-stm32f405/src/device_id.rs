#![deny(unsafe_code)]
#![deny(warnings)]
//! Device identifier utilities for STM32F405
//!
//! The factory-programmed 96-bit unique ID is stable across reboots and
//! unique to each chip. It names the clock on the broker and seeds the
//! Ethernet MAC address.

use heapless::String;

const CLIENT_ID_PREFIX: &str = "desktop-clock-";

/// Maximum length of the client ID string
/// Format: "desktop-clock-" (14 chars) + 24 hex chars = 38 chars total
pub const CLIENT_ID_MAX_LEN: usize = 38;

/// Get the STM32F405 unique device ID as a hex string
pub fn uid_hex() -> &'static str {
    embassy_stm32::uid::uid_hex()
}

/// Raw 12-byte (96-bit) unique device ID
pub fn uid() -> &'static [u8; 12] {
    embassy_stm32::uid::uid()
}

/// Broker client ID in the format `desktop-clock-{24_hex_chars}`
pub fn mqtt_client_id() -> String<CLIENT_ID_MAX_LEN> {
    client_id_from(uid_hex())
}

fn client_id_from(uid_hex: &str) -> String<CLIENT_ID_MAX_LEN> {
    let mut client_id = String::new();
    // Both pushes fit: 14 + 24 bytes is exactly CLIENT_ID_MAX_LEN
    let _ = client_id.push_str(CLIENT_ID_PREFIX);
    let _ = client_id.push_str(uid_hex);
    client_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_format() {
        let id = client_id_from("0123456789abcdef01234567");
        assert_eq!(id.as_str(), "desktop-clock-0123456789abcdef01234567");
        assert_eq!(id.len(), CLIENT_ID_MAX_LEN);
    }
}
