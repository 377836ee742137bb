//! Events fed to the scheduler
//!
//! Interrupt handlers and network tasks only build one of these and enqueue
//! it. The control loop drains the queue and hands each event to
//! [`SyncScheduler::handle`](crate::scheduler::SyncScheduler::handle), so no
//! engine logic ever runs in interrupt context.

use heapless::{String, Vec};

use crate::fetch::{FetchErrorCause, FetchKind};
use crate::link::{DownReason, IpInfo};
use crate::reassembly::MAX_TOPIC_LEN;
use crate::session::DisconnectReason;

/// Largest message chunk carried by one event
pub const CHUNK_MAX: usize = 512;
/// Largest fetch response body carried by one event
pub const FETCH_BODY_MAX: usize = 1536;
/// Largest settings blob
pub const SETTINGS_MAX: usize = 256;

/// Something the scheduler must react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Periodic timer tick
    Tick,
    LinkUp(IpInfo),
    LinkDown(DownReason),
    SessionConnected {
        persisted: bool,
    },
    SessionDisconnected(DisconnectReason),
    MessageChunk {
        topic: String<MAX_TOPIC_LEN>,
        payload: Vec<u8, CHUNK_MAX>,
        offset: usize,
        total_len: usize,
    },
    PublishAck(u16),
    FetchComplete {
        kind: FetchKind,
        token: u32,
        status: u16,
        body: Vec<u8, FETCH_BODY_MAX>,
    },
    FetchError {
        kind: FetchKind,
        token: u32,
        cause: FetchErrorCause,
    },
    /// Settings changed locally and must reach the broker
    SettingsChanged(Vec<u8, SETTINGS_MAX>),
}

impl Event {
    /// Build a chunk event, `None` if topic or payload exceed the bounds
    pub fn chunk(topic: &str, payload: &[u8], offset: usize, total_len: usize) -> Option<Self> {
        Some(Event::MessageChunk {
            topic: crate::config::bounded(topic)?,
            payload: Vec::from_slice(payload).ok()?,
            offset,
            total_len,
        })
    }

    /// Build a settings event, `None` if the blob is too large
    pub fn settings(blob: &[u8]) -> Option<Self> {
        Vec::from_slice(blob).ok().map(Event::SettingsChanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_bounds() {
        assert!(Event::chunk("esp_device/control", b"{}", 0, 2).is_some());
        assert!(Event::chunk("esp_device/control", &[0u8; CHUNK_MAX + 1], 0, 600).is_none());

        let long_topic = [b'a'; MAX_TOPIC_LEN + 1];
        let long_topic = core::str::from_utf8(&long_topic).unwrap();
        assert!(Event::chunk(long_topic, b"x", 0, 1).is_none());
    }

    #[test]
    fn test_settings_bounds() {
        assert!(Event::settings(b"{\"brightness\":3}").is_some());
        assert!(Event::settings(&[0u8; SETTINGS_MAX + 1]).is_none());
    }
}
