//! Platform seams for the desktop clock firmware
//!
//! The connectivity engine in `clock-core` never touches a radio, a socket or
//! a broker directly. It drives the traits in this crate, and the board
//! support package implements them.
//!
//! Every operation here is **non-blocking**: it hands a request to the
//! platform and returns immediately. Completion is reported later through the
//! engine's callbacks (link up/down, session connect/disconnect, message
//! chunks, fetch responses).

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// MQTT delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Whether the broker acknowledges a publish at this level
    pub const fn is_acknowledged(self) -> bool {
        !matches!(self, QoS::AtMostOnce)
    }
}

/// Wireless station driver
///
/// `begin_join` starts association with an access point. The platform later
/// reports the outcome as a link-up (with an address) or link-down event.
pub trait LinkDriver {
    type Error: embedded_io::Error;

    /// Start joining the network identified by `ssid`
    fn begin_join(&mut self, ssid: &str, passphrase: &str) -> Result<(), Self::Error>;

    /// Abandon an attempt that never completed
    fn leave(&mut self);
}

/// Publish/subscribe broker transport
///
/// Packet identifiers returned by `subscribe`/`publish` are echoed back in
/// acknowledgment callbacks. Fire-and-forget publishes (QoS 0) return `0`.
pub trait BusTransport {
    type Error: embedded_io::Error;

    /// Start a session with the broker at `host:port`
    fn begin_connect(
        &mut self,
        host: &str,
        port: u16,
        client_id: &str,
        keep_alive_secs: u16,
    ) -> Result<(), Self::Error>;

    /// Request a subscription on an established session
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Self::Error>;

    /// Queue a publish on an established session
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<u16, Self::Error>;

    /// Drop the session (or the pending connect attempt)
    fn disconnect(&mut self);
}

/// One-shot HTTP GET client
///
/// `token` correlates the eventual response or failure with the request.
pub trait HttpTransport {
    type Error: embedded_io::Error;

    /// Start a GET request for `url`
    fn begin_get(&mut self, token: u32, url: &str) -> Result<(), Self::Error>;

    /// Forget an outstanding request; a late response for `token` is dropped
    fn abort(&mut self, token: u32);
}
