#![deny(warnings)]
//! MQTT v5.0 session runner
//!
//! Owns the broker connection on behalf of the engine's `BusBridge`. It
//! waits for a connect request, opens a plain TCP connection, runs the MQTT
//! handshake with `rust-mqtt`, then serves subscribe/publish commands while
//! polling for incoming packets. Every outcome is reported back to the
//! engine as an event; the engine decides about retries.
//!
//! # Memory Management
//!
//! - MQTT packet buffer: 2KB bump buffer for packet assembly
//! - TCP buffers: 8KB total, on the runner's stack frame
//!
//! The client is created with a send quota of one, so at most one
//! acknowledged publish is in flight. Later ones wait in a short backlog
//! until the broker acknowledges it.
//!
//! A session can stay quiet for long stretches (telemetry is held back while
//! the server reports offline), so a PINGREQ goes out whenever nothing was
//! sent for three quarters of the keep-alive.

#![allow(unsafe_code)] // TopicName::new_unchecked for validated topic strings

use clock_core::config::MAX_TIMEOUT_MS;
use clock_core::event::{Event, CHUNK_MAX};
use clock_core::session::DisconnectReason;
use defmt::{debug, error, info, warn, Debug2Format};
use embassy_futures::select::{select3, Either3};
use embassy_net::Stack;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use hal_abstractions::QoS;
use heapless::{Deque, String};
use rust_mqtt::{
    buffer::BumpBuffer,
    client::{
        event::Event as MqttEvent,
        options::{
            ConnectOptions, PublicationOptions, RetainHandling, SubscriptionOptions,
            TopicReference,
        },
        Client,
    },
    config::{KeepAlive, SessionExpiryInterval},
    types::{MqttString, QoS as MqttQoS, TopicName},
    Bytes,
};

use super::error::NetworkError;
use super::socket::AsyncTcpSocket;
use crate::events::{self, BusCommand, OutgoingPublish, BUS_COMMANDS};

/// MQTT packet buffer size: 2KB for packet assembly
const MQTT_BUFFER_SIZE: usize = 2048;

/// Acknowledged publishes waiting for the send quota
const BACKLOG_LEN: usize = 2;

/// Broker endpoint from a connect request
struct SessionParams {
    host: String<{ clock_core::config::HOST_MAX_LEN }>,
    port: u16,
    client_id: String<{ clock_core::config::CLIENT_ID_MAX_LEN }>,
    keep_alive_secs: u16,
}

fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

/// Check a topic before handing it to `TopicName::new_unchecked`
///
/// MQTT topic names cannot be empty or contain wildcards (`+`, `#`) or null
/// characters.
fn validate_topic(topic: &str) -> Result<&str, NetworkError> {
    if topic.is_empty() || topic.contains(['+', '#', '\0']) {
        error!("Invalid MQTT topic name: {}", topic);
        return Err(NetworkError::MqttProtocolError);
    }
    Ok(topic)
}

fn mqtt_string(s: &str) -> Result<MqttString<'_>, NetworkError> {
    MqttString::new(s.into()).map_err(|e| {
        error!("Failed to create MQTT string: {:?}", Debug2Format(&e));
        NetworkError::MqttBufferError
    })
}

/// Split an incoming payload into queue-sized chunks for the engine
async fn forward_message(topic: &str, payload: &[u8]) {
    debug!("Incoming {} bytes on {}", payload.len(), topic);
    if payload.is_empty() {
        if let Some(event) = Event::chunk(topic, &[], 0, 0) {
            events::post(event).await;
        }
        return;
    }

    for (index, piece) in payload.chunks(CHUNK_MAX).enumerate() {
        match Event::chunk(topic, piece, index * CHUNK_MAX, payload.len()) {
            Some(event) => events::post(event).await,
            None => {
                warn!("Topic {} too long, message dropped", topic);
                return;
            }
        }
    }
}

/// Longest quiet stretch before a PINGREQ; `None` disables pings
fn ping_interval(keep_alive_secs: u16) -> Option<Duration> {
    if keep_alive_secs == 0 {
        return None;
    }
    Some(Duration::from_millis(u64::from(keep_alive_secs) * 750))
}

/// Resolves once the session has been quiet for `interval`
async fn ping_due(last_sent: Instant, interval: Option<Duration>) {
    match interval {
        Some(interval) => Timer::at(last_sent + interval).await,
        None => core::future::pending().await,
    }
}

async fn wait_for_connect() -> SessionParams {
    loop {
        match BUS_COMMANDS.receive().await {
            BusCommand::Connect {
                host,
                port,
                client_id,
                keep_alive_secs,
            } => {
                return SessionParams {
                    host,
                    port,
                    client_id,
                    keep_alive_secs,
                }
            }
            BusCommand::Disconnect => debug!("Disconnect without a session"),
            BusCommand::Subscribe { topic, .. } => {
                debug!("Subscribe to {} dropped, no session", topic.as_str())
            }
            BusCommand::Publish(publish) => {
                debug!("Publish on {} dropped, no session", publish.topic.as_str())
            }
        }
    }
}

/// Serve broker sessions forever
pub async fn run(stack: Stack<'_>) -> ! {
    loop {
        let params = wait_for_connect().await;
        let reason = match session(stack, &params).await {
            Ok(()) => DisconnectReason::Requested,
            Err(e) => {
                warn!("MQTT session ended: {:?}", e);
                e.into()
            }
        };
        events::post(Event::SessionDisconnected(reason)).await;
    }
}

/// One broker session, from TCP connect until it drops or is closed
async fn session(stack: Stack<'_>, params: &SessionParams) -> Result<(), NetworkError> {
    info!(
        "Connecting to MQTT broker at {}:{}",
        params.host.as_str(),
        params.port
    );

    let mut rx_buffer = [0u8; 4096];
    let mut tx_buffer = [0u8; 4096];
    let mut socket = AsyncTcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);

    let mut mqtt_buffer = [0u8; MQTT_BUFFER_SIZE];
    let mut buffer = BumpBuffer::new(&mut mqtt_buffer);
    let mut client = Client::<'_, _, _, 1, 1, 1, 0>::new(&mut buffer);

    let connect_opts = ConnectOptions {
        session_expiry_interval: SessionExpiryInterval::EndOnDisconnect,
        clean_start: true,
        keep_alive: if params.keep_alive_secs == 0 {
            KeepAlive::Infinite
        } else {
            KeepAlive::Seconds(params.keep_alive_secs)
        },
        will: None,
        user_name: None,
        password: None,
    };
    let client_id = MqttString::new(params.client_id.as_str().into()).map_err(|e| {
        error!(
            "Failed to create MQTT client ID string: {:?}",
            Debug2Format(&e)
        );
        NetworkError::MqttProtocolError
    })?;

    let handshake = async {
        socket
            .connect_host(stack, params.host.as_str(), params.port)
            .await?;
        client
            .connect(socket, &connect_opts, Some(client_id))
            .await
            .map_err(|e| {
                error!("MQTT connect failed: {:?}", Debug2Format(&e));
                NetworkError::MqttConnectionFailed
            })?;
        Ok::<(), NetworkError>(())
    };
    with_timeout(Duration::from_millis(MAX_TIMEOUT_MS), handshake)
        .await
        .map_err(|_| NetworkError::Timeout)??;

    // Clean start with end-on-disconnect expiry: nothing persists broker-side
    info!("MQTT connection established");
    events::post(Event::SessionConnected { persisted: false }).await;

    let mut awaiting_ack: Option<u16> = None;
    let mut backlog: Deque<OutgoingPublish, BACKLOG_LEN> = Deque::new();
    let keep_alive = ping_interval(params.keep_alive_secs);
    let mut last_sent = Instant::now();

    loop {
        let outgoing = match select3(
            BUS_COMMANDS.receive(),
            client.poll(),
            ping_due(last_sent, keep_alive),
        )
        .await
        {
            Either3::First(BusCommand::Disconnect) => {
                info!("MQTT session closed on request");
                return Ok(());
            }
            Either3::First(BusCommand::Connect { .. }) => {
                debug!("Connect while connected, reporting the live session");
                events::post(Event::SessionConnected { persisted: false }).await;
                None
            }
            Either3::First(BusCommand::Subscribe { topic, qos }) => {
                let topic = validate_topic(topic.as_str())?;
                // SAFETY: validate_topic() rejected empty names, wildcards and nulls
                let name = unsafe { TopicName::new_unchecked(mqtt_string(topic)?) };
                let options = SubscriptionOptions {
                    retain_handling: RetainHandling::AlwaysSend,
                    retain_as_published: false,
                    no_local: false,
                    qos: to_mqtt_qos(qos),
                };
                client.subscribe(name.into(), options).await.map_err(|e| {
                    error!("Subscribe to {} failed: {:?}", topic, Debug2Format(&e));
                    NetworkError::MqttSubscribeFailed
                })?;
                debug!("Subscribe sent for {}", topic);
                last_sent = Instant::now();
                None
            }
            Either3::First(BusCommand::Publish(publish)) => {
                if awaiting_ack.is_some() && publish.qos.is_acknowledged() {
                    if backlog.push_back(publish).is_err() {
                        warn!("Publish backlog full, dropping publish");
                    }
                    None
                } else {
                    Some(publish)
                }
            }
            Either3::Second(Ok(MqttEvent::Publish(incoming))) => {
                forward_message(incoming.topic.as_str(), incoming.message.as_ref()).await;
                None
            }
            Either3::Second(Ok(
                MqttEvent::PublishAcknowledged(_) | MqttEvent::PublishComplete(_),
            )) => {
                if let Some(id) = awaiting_ack.take() {
                    events::post(Event::PublishAck(id)).await;
                }
                backlog.pop_front()
            }
            Either3::Second(Ok(_)) => None,
            Either3::Second(Err(e)) => {
                error!("MQTT connection lost: {:?}", Debug2Format(&e));
                return Err(NetworkError::ConnectionClosed);
            }
            Either3::Third(()) => {
                client.ping().await.map_err(|e| {
                    error!("MQTT ping failed: {:?}", Debug2Format(&e));
                    NetworkError::ConnectionClosed
                })?;
                debug!("PINGREQ sent");
                last_sent = Instant::now();
                None
            }
        };

        let Some(publish) = outgoing else {
            continue;
        };
        let topic = validate_topic(publish.topic.as_str())?;
        let options = PublicationOptions {
            retain: publish.retain,
            message_expiry_interval: None,
            // SAFETY: validate_topic() rejected empty names, wildcards and nulls
            topic: TopicReference::Name(unsafe { TopicName::new_unchecked(mqtt_string(topic)?) }),
            qos: to_mqtt_qos(publish.qos),
        };
        client
            .publish(&options, Bytes::from(publish.payload.as_slice()))
            .await
            .map_err(|e| {
                error!("MQTT publish on {} failed: {:?}", topic, Debug2Format(&e));
                NetworkError::MqttPublishFailed
            })?;
        debug!(
            "Published {} bytes on {} (id {})",
            publish.payload.len(),
            topic,
            publish.id
        );
        last_sent = Instant::now();
        if publish.qos.is_acknowledged() {
            awaiting_ack = Some(publish.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("esp_device/report/data").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("esp_device/+").is_err());
        assert!(validate_topic("esp_device/#").is_err());
        assert!(validate_topic("esp\0device").is_err());
    }

    #[test]
    fn test_ping_interval() {
        assert_eq!(ping_interval(0), None);
        assert_eq!(ping_interval(60), Some(Duration::from_secs(45)));
        assert_eq!(ping_interval(1), Some(Duration::from_millis(750)));
    }

    #[test]
    fn test_qos_mapping() {
        assert!(matches!(to_mqtt_qos(QoS::AtMostOnce), MqttQoS::AtMostOnce));
        assert!(matches!(to_mqtt_qos(QoS::AtLeastOnce), MqttQoS::AtLeastOnce));
    }
}
