//! Aggregate sync status exposed to the presentation layer
//!
//! Handed out by value. Only the scheduler builds one.

use crate::config::SyncIntervals;
use crate::time::Instant;

/// Read-only snapshot of the engine's connectivity and sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    /// Remote service reported alive by the server status topic
    pub server_online: bool,
    /// Broker session established
    pub session_up: bool,
    /// Network link up
    pub link_up: bool,
    /// Consecutive session failures, capped
    pub failed_attempts: u8,
    /// Effective intervals (already clamped)
    pub intervals: SyncIntervals,
    pub last_data_sync_at: Option<Instant>,
    pub last_clock_sync_at: Option<Instant>,
    pub last_weather_sync_at: Option<Instant>,
}

impl SyncStatus {
    /// Whether the UI should show the device as offline
    pub fn is_degraded(&self) -> bool {
        !self.server_online || !self.session_up
    }
}

/// Interpret a server status payload
///
/// Accepts `online`/`1`/`true` and `offline`/`0`/`false`, ignoring case and
/// surrounding whitespace. Anything else is `None`.
pub fn parse_server_state(payload: &[u8]) -> Option<bool> {
    let text = core::str::from_utf8(payload).ok()?.trim();
    const UP: [&str; 3] = ["online", "1", "true"];
    const DOWN: [&str; 3] = ["offline", "0", "false"];

    if UP.iter().any(|w| text.eq_ignore_ascii_case(w)) {
        Some(true)
    } else if DOWN.iter().any(|w| text.eq_ignore_ascii_case(w)) {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_state() {
        assert_eq!(parse_server_state(b"online"), Some(true));
        assert_eq!(parse_server_state(b" ONLINE\r\n"), Some(true));
        assert_eq!(parse_server_state(b"1"), Some(true));
        assert_eq!(parse_server_state(b"offline"), Some(false));
        assert_eq!(parse_server_state(b"false"), Some(false));
        assert_eq!(parse_server_state(b"maybe"), None);
        assert_eq!(parse_server_state(&[0xff, 0xfe]), None);
    }
}
