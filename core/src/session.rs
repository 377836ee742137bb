//! Message bus session manager
//!
//! ```text
//! Idle ──connect──> Connecting ──on_connect──> Established
//!                      │   ▲                       │
//!      failure/timeout │   │ backoff elapsed       │ disconnect / link lost
//!                      ▼   │                       ▼
//!                   BackingOff <───────────────────┘
//! ```
//!
//! Two counters are kept apart: `failed_attempts` is capped at the configured
//! ceiling and feeds the offline report, `retry_attempts` only ever grows.
//! The manager never stops retrying.

use hal_abstractions::{BusTransport, QoS};
use heapless::Vec;

use crate::config::{BrokerConfig, TimingConfig};
use crate::error::{kind_name, SyncError};
use crate::reassembly::{CompleteMessage, Ingest, Reassembler};
use crate::time::{elapsed, scaled, Instant};
use crate::topics::Topic;

/// Outstanding acknowledged publishes tracked at once
const MAX_IN_FLIGHT: usize = 8;

/// Session state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting { started: Instant },
    Established,
    BackingOff { until: Instant },
}

/// Why the broker session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisconnectReason {
    /// TCP connection closed or reset
    TcpDisconnected,
    /// Broker refused the connect packet
    Refused,
    /// Credentials rejected
    NotAuthorized,
    /// Broker reported itself unavailable
    ServerUnavailable,
    /// Keep-alive or connect acknowledgment missed
    Timeout,
    /// Underlying network link dropped
    LinkLost,
    /// Session closed on request
    Requested,
    /// Transport-specific reason code
    Other(u8),
}

/// Result of a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new attempt was handed to the transport
    Started,
    /// An attempt is already running
    InProgress,
    /// Session already up
    Established,
    /// Still backing off
    Deferred { until: Instant },
}

/// Read-only session snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub session_up: bool,
    pub failed_attempts: u8,
    pub retry_deadline: Option<Instant>,
}

/// Broker session state machine
#[derive(Debug)]
pub struct SessionManager {
    phase: SessionPhase,
    failed_attempts: u8,
    retry_attempts: u32,
    timing: TimingConfig,
    reassembler: Reassembler,
    in_flight: Vec<u16, MAX_IN_FLIGHT>,
}

impl SessionManager {
    pub fn new(timing: TimingConfig) -> Self {
        Self {
            phase: SessionPhase::Idle,
            failed_attempts: 0,
            retry_attempts: 0,
            timing,
            reassembler: Reassembler::new(),
            in_flight: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_session_up(&self) -> bool {
        self.phase == SessionPhase::Established
    }

    pub fn failed_attempts(&self) -> u8 {
        self.failed_attempts
    }

    /// Total attempts since the last success; unbounded
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Whether consecutive failures have reached the offline ceiling
    pub fn at_fail_ceiling(&self) -> bool {
        self.failed_attempts >= self.timing.max_fail_counts
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            session_up: self.is_session_up(),
            failed_attempts: self.failed_attempts,
            retry_deadline: match self.phase {
                SessionPhase::BackingOff { until } => Some(until),
                _ => None,
            },
        }
    }

    /// Start a session attempt if the link allows and backoff has elapsed
    pub fn connect<B: BusTransport>(
        &mut self,
        bus: &mut B,
        broker: &BrokerConfig,
        link_up: bool,
        now: Instant,
    ) -> Result<ConnectOutcome, SyncError> {
        if !link_up {
            return Err(SyncError::LinkDown);
        }

        match self.phase {
            SessionPhase::Connecting { .. } => return Ok(ConnectOutcome::InProgress),
            SessionPhase::Established => return Ok(ConnectOutcome::Established),
            SessionPhase::BackingOff { until } if now < until => {
                return Ok(ConnectOutcome::Deferred { until })
            }
            _ => {}
        }

        self.retry_attempts = self.retry_attempts.saturating_add(1);
        log_info!(
            "Connecting to broker {}:{} (attempt {})",
            broker.host.as_str(),
            broker.port,
            self.retry_attempts
        );

        match bus.begin_connect(
            broker.host.as_str(),
            broker.port,
            broker.client_id.as_str(),
            broker.keep_alive_secs,
        ) {
            Ok(()) => {
                self.phase = SessionPhase::Connecting { started: now };
                Ok(ConnectOutcome::Started)
            }
            Err(e) => {
                log_warn!("Broker connect refused: {}", kind_name(&e));
                self.record_failure(now);
                Err(SyncError::Transport)
            }
        }
    }

    /// Expire a connect attempt that outlived the connect deadline
    ///
    /// Returns `true` if an attempt was abandoned.
    pub fn poll<B: BusTransport>(&mut self, bus: &mut B, now: Instant) -> bool {
        if let SessionPhase::Connecting { started } = self.phase {
            if elapsed(now, started) >= self.timing.max_timeout {
                log_warn!("Broker connect timed out");
                bus.disconnect();
                self.record_failure(now);
                return true;
            }
        }
        false
    }

    /// Broker accepted the session
    ///
    /// Ignored unless an attempt is in progress. A persisted session keeps
    /// its broker-side subscriptions, so topics are only requested for a
    /// clean one.
    pub fn on_connect<B: BusTransport>(&mut self, bus: &mut B, qos: QoS, persisted: bool) -> bool {
        if !matches!(self.phase, SessionPhase::Connecting { .. }) {
            log_debug!("Ignoring connect ack outside a connect attempt");
            return false;
        }

        self.phase = SessionPhase::Established;
        self.failed_attempts = 0;
        self.retry_attempts = 0;
        log_info!("Broker session established (persisted: {})", persisted);

        if !persisted {
            self.subscribe(bus, &Topic::ALL, qos);
        }
        true
    }

    /// Broker session ended
    ///
    /// Returns `true` if an established session was lost.
    pub fn on_disconnect(&mut self, reason: DisconnectReason, now: Instant) -> bool {
        let was_up = self.is_session_up();
        match self.phase {
            SessionPhase::Connecting { .. } => {
                log_warn!("Broker connect failed: {:?}", reason);
                self.record_failure(now);
            }
            SessionPhase::Established => {
                log_warn!("Broker session lost: {:?}", reason);
                self.back_off(now);
            }
            SessionPhase::Idle | SessionPhase::BackingOff { .. } => {}
        }
        self.drop_session_data();
        was_up
    }

    /// Link dropped under the session
    ///
    /// Tears down the transport and goes straight to backoff without counting
    /// a failure. Returns `true` if an established session was lost.
    pub fn on_link_down<B: BusTransport>(&mut self, bus: &mut B, now: Instant) -> bool {
        let was_up = self.is_session_up();
        if matches!(
            self.phase,
            SessionPhase::Connecting { .. } | SessionPhase::Established
        ) {
            log_info!("Session suspended: link down");
            bus.disconnect();
            self.back_off(now);
        }
        self.drop_session_data();
        was_up
    }

    /// Request subscriptions on the established session
    pub fn subscribe<B: BusTransport>(&mut self, bus: &mut B, topics: &[Topic], qos: QoS) {
        for topic in topics {
            match bus.subscribe(topic.path(), qos) {
                Ok(_) => log_debug!("Subscribed to {}", topic.path()),
                Err(e) => log_warn!("Subscribe to {} failed: {}", topic.path(), kind_name(&e)),
            }
        }
    }

    /// Publish on the established session
    ///
    /// Returns the packet id for acknowledged QoS levels, `0` otherwise.
    pub fn publish<B: BusTransport>(
        &mut self,
        bus: &mut B,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<u16, SyncError> {
        if !self.is_session_up() {
            return Err(SyncError::SessionNotReady);
        }

        let id = bus.publish(topic, payload, qos, retain).map_err(|e| {
            log_warn!("Publish to {} rejected: {}", topic, kind_name(&e));
            SyncError::PublishRejected
        })?;

        if qos.is_acknowledged() {
            if self.in_flight.is_full() {
                self.in_flight.remove(0);
            }
            let _ = self.in_flight.push(id);
        }
        Ok(id)
    }

    /// Broker acknowledged publish `id`; returns `true` if it was tracked
    pub fn on_publish_ack(&mut self, id: u16) -> bool {
        match self.in_flight.iter().position(|&p| p == id) {
            Some(index) => {
                self.in_flight.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether publish `id` is still waiting for its acknowledgment
    pub fn is_in_flight(&self, id: u16) -> bool {
        self.in_flight.contains(&id)
    }

    /// Feed one incoming chunk through reassembly
    ///
    /// Returns the complete message once its last chunk arrives.
    pub fn on_message_chunk(
        &mut self,
        topic: &str,
        payload: &[u8],
        offset: usize,
        chunk_len: usize,
        total_len: usize,
    ) -> Result<Option<CompleteMessage>, SyncError> {
        if !self.is_session_up() {
            log_debug!("Dropping chunk for {}: no session", topic);
            return Ok(None);
        }

        match self
            .reassembler
            .ingest(topic, payload, offset, chunk_len, total_len)
        {
            Ingest::Complete(message) => Ok(Some(message)),
            Ingest::Incomplete => Ok(None),
            Ingest::Rejected(reason) => {
                log_warn!("Dropped message on {}: {:?}", topic, reason);
                Err(SyncError::MalformedChunk)
            }
        }
    }

    fn record_failure(&mut self, now: Instant) {
        if self.failed_attempts < self.timing.max_fail_counts {
            self.failed_attempts += 1;
        }
        if self.at_fail_ceiling() {
            log_error!(
                "Broker unreachable after {} attempts, still retrying",
                self.retry_attempts
            );
        }
        self.back_off(now);
    }

    fn back_off(&mut self, now: Instant) {
        let factor = u32::from(self.failed_attempts.max(1));
        let until = now + scaled(self.timing.retry_interval, factor);
        log_debug!("Session backoff for {} ms", (until - now).to_millis());
        self.phase = SessionPhase::BackingOff { until };
    }

    fn drop_session_data(&mut self) {
        self.reassembler.evict_all();
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::at_secs;
    use hal_abstractions::mock::MockBus;

    fn manager() -> SessionManager {
        SessionManager::new(TimingConfig::default())
    }

    fn establish(session: &mut SessionManager, bus: &mut MockBus, now: Instant) {
        let broker = BrokerConfig::default();
        assert_eq!(
            session.connect(bus, &broker, true, now),
            Ok(ConnectOutcome::Started)
        );
        assert!(session.on_connect(bus, QoS::AtLeastOnce, false));
    }

    #[test]
    fn test_connect_requires_link() {
        let mut session = manager();
        let mut bus = MockBus::default();
        let result = session.connect(&mut bus, &BrokerConfig::default(), false, at_secs(0));
        assert_eq!(result, Err(SyncError::LinkDown));
        assert_eq!(bus.connects, 0);
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_connect_subscribes_all_topics() {
        let mut session = manager();
        let mut bus = MockBus::default();
        establish(&mut session, &mut bus, at_secs(0));

        assert!(session.is_session_up());
        assert_eq!(bus.last_host.as_str(), "www.eflystudio.com");
        assert_eq!(bus.last_port, 1883);
        assert_eq!(bus.subscriptions.len(), Topic::ALL.len());
        assert!(bus
            .subscriptions
            .iter()
            .any(|(t, _)| t.as_str() == "server/status"));
    }

    #[test]
    fn test_persisted_session_skips_subscribe() {
        let mut session = manager();
        let mut bus = MockBus::default();
        session
            .connect(&mut bus, &BrokerConfig::default(), true, at_secs(0))
            .unwrap();
        assert!(session.on_connect(&mut bus, QoS::AtLeastOnce, true));
        assert!(bus.subscriptions.is_empty());
    }

    #[test]
    fn test_connect_is_not_repeated_while_in_progress() {
        let mut session = manager();
        let mut bus = MockBus::default();
        let broker = BrokerConfig::default();
        session.connect(&mut bus, &broker, true, at_secs(0)).unwrap();
        assert_eq!(
            session.connect(&mut bus, &broker, true, at_secs(1)),
            Ok(ConnectOutcome::InProgress)
        );
        assert_eq!(bus.connects, 1);
    }

    #[test]
    fn test_failures_back_off_and_cap() {
        let mut session = manager();
        let mut bus = MockBus::default();
        let broker = BrokerConfig::default();
        let mut now = at_secs(0);

        for expected in 1..=7u8 {
            session.connect(&mut bus, &broker, true, now).unwrap();
            session.on_disconnect(DisconnectReason::Refused, now);
            assert_eq!(session.failed_attempts(), expected.min(5));

            let deadline = session.state().retry_deadline.unwrap();
            let wait = (deadline - now).to_secs();
            assert_eq!(wait, 3 * u64::from(expected.min(5)));

            // Still inside the window
            assert_eq!(
                session.connect(&mut bus, &broker, true, now),
                Ok(ConnectOutcome::Deferred { until: deadline })
            );
            now = deadline;
        }

        assert!(session.at_fail_ceiling());
        assert_eq!(session.retry_attempts(), 7);

        // Keeps retrying after the ceiling
        assert_eq!(
            session.connect(&mut bus, &broker, true, now),
            Ok(ConnectOutcome::Started)
        );
        assert!(session.on_connect(&mut bus, QoS::AtLeastOnce, true));
        assert_eq!(session.failed_attempts(), 0);
        assert_eq!(session.retry_attempts(), 0);
    }

    #[test]
    fn test_transport_refusal_counts_as_failure() {
        let mut session = manager();
        let mut bus = MockBus::default();
        bus.fail_next_connect = true;
        let result = session.connect(&mut bus, &BrokerConfig::default(), true, at_secs(0));
        assert_eq!(result, Err(SyncError::Transport));
        assert_eq!(session.failed_attempts(), 1);
        assert!(matches!(session.phase(), SessionPhase::BackingOff { .. }));
    }

    #[test]
    fn test_connect_deadline() {
        let mut session = manager();
        let mut bus = MockBus::default();
        session
            .connect(&mut bus, &BrokerConfig::default(), true, at_secs(0))
            .unwrap();

        assert!(!session.poll(&mut bus, at_secs(9)));
        assert!(session.poll(&mut bus, at_secs(10)));
        assert_eq!(bus.disconnects, 1);
        assert_eq!(session.failed_attempts(), 1);

        // A late ack for the abandoned attempt is ignored
        assert!(!session.on_connect(&mut bus, QoS::AtLeastOnce, false));
        assert!(!session.is_session_up());
    }

    #[test]
    fn test_session_loss_keeps_fail_count() {
        let mut session = manager();
        let mut bus = MockBus::default();
        establish(&mut session, &mut bus, at_secs(0));

        assert!(session.on_disconnect(DisconnectReason::TcpDisconnected, at_secs(5)));
        assert_eq!(session.failed_attempts(), 0);
        assert_eq!(session.state().retry_deadline, Some(at_secs(8)));
    }

    #[test]
    fn test_link_down_evicts_partial_messages() {
        let mut session = manager();
        let mut bus = MockBus::default();
        establish(&mut session, &mut bus, at_secs(0));

        assert_eq!(
            session.on_message_chunk("esp_device/control", b"abc", 0, 3, 6),
            Ok(None)
        );
        assert!(session.on_link_down(&mut bus, at_secs(1)));
        assert!(!session.is_session_up());
        assert_eq!(bus.disconnects, 1);

        session
            .connect(&mut bus, &BrokerConfig::default(), true, at_secs(10))
            .unwrap();
        session.on_connect(&mut bus, QoS::AtLeastOnce, true);
        assert_eq!(
            session.on_message_chunk("esp_device/control", b"def", 3, 3, 6),
            Err(SyncError::MalformedChunk)
        );
    }

    #[test]
    fn test_link_down_while_connecting_backs_off_without_failure() {
        let mut session = manager();
        let mut bus = MockBus::default();
        session
            .connect(&mut bus, &BrokerConfig::default(), true, at_secs(0))
            .unwrap();

        assert!(!session.on_link_down(&mut bus, at_secs(2)));
        assert_eq!(bus.disconnects, 1);
        assert_eq!(session.failed_attempts(), 0);
        assert_eq!(session.phase(), SessionPhase::BackingOff { until: at_secs(5) });

        // Nothing left to tear down
        assert!(!session.on_link_down(&mut bus, at_secs(3)));
        assert_eq!(bus.disconnects, 1);
    }

    #[test]
    fn test_publish_requires_session() {
        let mut session = manager();
        let mut bus = MockBus::default();
        assert_eq!(
            session.publish(&mut bus, "t", b"x", QoS::AtLeastOnce, false),
            Err(SyncError::SessionNotReady)
        );
        assert!(bus.publishes.is_empty());
    }

    #[test]
    fn test_publish_ack_tracking() {
        let mut session = manager();
        let mut bus = MockBus::default();
        establish(&mut session, &mut bus, at_secs(0));

        let id = session
            .publish(&mut bus, "t", b"x", QoS::AtLeastOnce, false)
            .unwrap();
        assert!(session.is_in_flight(id));
        assert!(session.on_publish_ack(id));
        assert!(!session.on_publish_ack(id));

        assert_eq!(
            session.publish(&mut bus, "t", b"y", QoS::AtMostOnce, false),
            Ok(0)
        );
        assert!(!session.is_in_flight(0));

        bus.fail_next_publish = true;
        assert_eq!(
            session.publish(&mut bus, "t", b"z", QoS::AtLeastOnce, false),
            Err(SyncError::PublishRejected)
        );
    }
}
