#![deny(unsafe_code)]
#![deny(warnings)]
//! Queues between the RTIC tasks
//!
//! The engine task is the only consumer of [`ENGINE_EVENTS`]. The tick task
//! and the network runners only build an [`Event`] and enqueue it. Requests
//! flowing the other way (join, connect, publish, GET) go through one command
//! channel per runner, filled by the driver bridges in [`crate::bridge`].
//!
//! `CriticalSectionRawMutex` makes every channel safe across RTIC priorities.

use core::sync::atomic::{AtomicBool, Ordering};

use clock_core::config::{CLIENT_ID_MAX_LEN, HOST_MAX_LEN, URL_MAX_LEN};
use clock_core::event::{Event, SETTINGS_MAX};
use clock_core::fetch::FetchKind;
use clock_core::reassembly::MAX_TOPIC_LEN;
use defmt::warn;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use hal_abstractions::QoS;
use heapless::{String, Vec};

/// Largest outgoing publish payload
pub const PUBLISH_MAX: usize = 256;

const EVENT_DEPTH: usize = 8;
const COMMAND_DEPTH: usize = 4;
/// A clean session subscribes to every topic at once
const BUS_DEPTH: usize = 12;

/// Events for the engine task
pub static ENGINE_EVENTS: Channel<CriticalSectionRawMutex, Event, EVENT_DEPTH> = Channel::new();

/// Requests for the link watcher
#[derive(Debug, Clone, defmt::Format)]
pub enum LinkCommand {
    Join,
    Leave,
}

/// Publish handed to the MQTT session runner
///
/// `id` is the engine's packet identifier, echoed back in the
/// acknowledgment event; `0` for QoS 0.
#[derive(Debug, Clone)]
pub struct OutgoingPublish {
    pub id: u16,
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, PUBLISH_MAX>,
    pub qos: QoS,
    pub retain: bool,
}

/// Requests for the MQTT session runner
#[derive(Debug, Clone)]
pub enum BusCommand {
    Connect {
        host: String<HOST_MAX_LEN>,
        port: u16,
        client_id: String<CLIENT_ID_MAX_LEN>,
        keep_alive_secs: u16,
    },
    Subscribe {
        topic: String<MAX_TOPIC_LEN>,
        qos: QoS,
    },
    Publish(OutgoingPublish),
    Disconnect,
}

/// Requests for the HTTP runner of one fetch kind
#[derive(Debug, Clone)]
pub enum HttpCommand {
    Get {
        token: u32,
        url: String<URL_MAX_LEN>,
    },
    Abort(u32),
}

pub type HttpChannel = Channel<CriticalSectionRawMutex, HttpCommand, COMMAND_DEPTH>;

pub static LINK_COMMANDS: Channel<CriticalSectionRawMutex, LinkCommand, COMMAND_DEPTH> =
    Channel::new();
pub static BUS_COMMANDS: Channel<CriticalSectionRawMutex, BusCommand, BUS_DEPTH> =
    Channel::new();
static TIME_COMMANDS: HttpChannel = Channel::new();
static WEATHER_COMMANDS: HttpChannel = Channel::new();

/// Command channel of the HTTP runner serving `kind`
pub fn http_commands(kind: FetchKind) -> &'static HttpChannel {
    match kind {
        FetchKind::Time => &TIME_COMMANDS,
        FetchKind::Weather => &WEATHER_COMMANDS,
    }
}

/// Latest `SyncStatus::is_degraded`, read by the heartbeat LED
static DEGRADED: AtomicBool = AtomicBool::new(true);

/// Enqueue an event from a network runner, waiting for room
pub async fn post(event: Event) {
    ENGINE_EVENTS.send(event).await;
}

/// Enqueue an event without waiting; a full queue drops it
pub fn try_post(event: Event) -> bool {
    if ENGINE_EVENTS.try_send(event).is_err() {
        warn!("Engine queue full, event dropped");
        return false;
    }
    true
}

/// Next event for the engine task
pub async fn next_event() -> Event {
    ENGINE_EVENTS.receive().await
}

/// Queue a settings report for the broker
pub fn post_settings(blob: &[u8]) -> bool {
    if blob.len() > SETTINGS_MAX {
        warn!("Settings blob too large: {} bytes", blob.len());
        return false;
    }
    Event::settings(blob).map(try_post).unwrap_or(false)
}

pub fn set_degraded(degraded: bool) {
    DEGRADED.store(degraded, Ordering::Release);
}

pub fn is_degraded() -> bool {
    DEGRADED.load(Ordering::Acquire)
}
