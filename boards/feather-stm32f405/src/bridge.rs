#![deny(unsafe_code)]
#![deny(warnings)]
//! Platform drivers handed to the sync engine
//!
//! Each bridge turns a non-blocking driver call into a command for the
//! runner that owns the real socket. Outcomes come back later as engine
//! events, so nothing here awaits.

use clock_core::config::{bounded, FetchEndpoints};
use clock_core::fetch::FetchKind;
use defmt::{debug, info, warn};
use hal_abstractions::{BusTransport, HttpTransport, LinkDriver, QoS};
use heapless::Vec;

use crate::events::{
    http_commands, BusCommand, HttpCommand, LinkCommand, OutgoingPublish, BUS_COMMANDS,
    LINK_COMMANDS,
};

/// Why a bridge refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum BridgeError {
    /// Runner command queue is full
    QueueFull,
    /// Argument does not fit the command's bounded buffer
    TooLarge,
}

impl core::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "Command queue full"),
            Self::TooLarge => write!(f, "Argument too large"),
        }
    }
}

impl core::error::Error for BridgeError {}

impl embedded_io::Error for BridgeError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::QueueFull => embedded_io::ErrorKind::OutOfMemory,
            Self::TooLarge => embedded_io::ErrorKind::InvalidInput,
        }
    }
}

/// Wired W5500 link standing in for the wireless station
///
/// The link comes up through DHCP on its own; a join asks the watcher to
/// report the current address again.
pub struct LinkBridge;

impl LinkDriver for LinkBridge {
    type Error = BridgeError;

    fn begin_join(&mut self, ssid: &str, _passphrase: &str) -> Result<(), Self::Error> {
        if !ssid.is_empty() {
            debug!("Station credentials for '{}' unused on wired link", ssid);
        }
        LINK_COMMANDS
            .try_send(LinkCommand::Join)
            .map_err(|_| BridgeError::QueueFull)
    }

    fn leave(&mut self) {
        if LINK_COMMANDS.try_send(LinkCommand::Leave).is_err() {
            warn!("Link queue full, leave dropped");
        }
    }
}

/// Broker session owned by the MQTT runner
pub struct BusBridge {
    next_id: u16,
}

impl BusBridge {
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Packet identifiers are non-zero and wrap
    fn allocate_id(&mut self) -> u16 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.next_id
    }

    fn send(&self, command: BusCommand) -> Result<(), BridgeError> {
        BUS_COMMANDS
            .try_send(command)
            .map_err(|_| BridgeError::QueueFull)
    }
}

impl BusTransport for BusBridge {
    type Error = BridgeError;

    fn begin_connect(
        &mut self,
        host: &str,
        port: u16,
        client_id: &str,
        keep_alive_secs: u16,
    ) -> Result<(), Self::Error> {
        info!("Connecting to broker {}:{} as {}", host, port, client_id);
        self.send(BusCommand::Connect {
            host: bounded(host).ok_or(BridgeError::TooLarge)?,
            port,
            client_id: bounded(client_id).ok_or(BridgeError::TooLarge)?,
            keep_alive_secs,
        })
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Self::Error> {
        let topic = bounded(topic).ok_or(BridgeError::TooLarge)?;
        self.send(BusCommand::Subscribe { topic, qos })?;
        Ok(self.allocate_id())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<u16, Self::Error> {
        let topic = bounded(topic).ok_or(BridgeError::TooLarge)?;
        let payload = Vec::from_slice(payload).map_err(|_| BridgeError::TooLarge)?;
        let id = if qos.is_acknowledged() {
            self.allocate_id()
        } else {
            0
        };
        self.send(BusCommand::Publish(OutgoingPublish {
            id,
            topic,
            payload,
            qos,
            retain,
        }))?;
        Ok(id)
    }

    fn disconnect(&mut self) {
        if self.send(BusCommand::Disconnect).is_err() {
            warn!("Bus queue full, disconnect dropped");
        }
    }
}

/// One-shot GETs run by the per-kind HTTP runners
pub struct HttpBridge {
    endpoints: FetchEndpoints,
    /// Last token handed to each runner, to route aborts
    issued: [Option<u32>; 2],
}

impl HttpBridge {
    pub fn new(endpoints: FetchEndpoints) -> Self {
        Self {
            endpoints,
            issued: [None; 2],
        }
    }

    /// The engine issues one of two configured URLs; anything else is
    /// treated as the weather source.
    fn kind_of(&self, url: &str) -> FetchKind {
        if url == self.endpoints.url(FetchKind::Time) {
            FetchKind::Time
        } else {
            FetchKind::Weather
        }
    }
}

fn slot(kind: FetchKind) -> usize {
    match kind {
        FetchKind::Time => 0,
        FetchKind::Weather => 1,
    }
}

impl HttpTransport for HttpBridge {
    type Error = BridgeError;

    fn begin_get(&mut self, token: u32, url: &str) -> Result<(), Self::Error> {
        let kind = self.kind_of(url);
        http_commands(kind)
            .try_send(HttpCommand::Get {
                token,
                url: bounded(url).ok_or(BridgeError::TooLarge)?,
            })
            .map_err(|_| BridgeError::QueueFull)?;
        self.issued[slot(kind)] = Some(token);
        Ok(())
    }

    fn abort(&mut self, token: u32) {
        let Some(kind) = FetchKind::ALL
            .into_iter()
            .find(|&kind| self.issued[slot(kind)] == Some(token))
        else {
            debug!("Abort for unknown request {}", token);
            return;
        };
        self.issued[slot(kind)] = None;
        if http_commands(kind)
            .try_send(HttpCommand::Abort(token))
            .is_err()
        {
            warn!("HTTP queue full, abort of {} dropped", token);
        }
    }
}
