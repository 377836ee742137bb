//! Sync scheduler
//!
//! The only component that decides *when* things happen. Each tick runs the
//! rules below in order and stops at the first one that blocks:
//!
//! 1. link not up: start (or expire) a link attempt, nothing else
//! 2. session not up: start (or expire) a session attempt, nothing else,
//!    unless the failure ceiling was reached (fetches then run offline)
//! 3. time fetch when its interval elapsed and none is pending
//! 4. weather fetch, same rule
//! 5. telemetry publish when the session and the server are both up
//!
//! Settings are never published by the tick. They go out as soon as they
//! change, or on the next session establishment if there is none.
//!
//! Timestamps only advance on success, so a failed attempt is retried on the
//! next tick instead of a full interval later. A kind that timed out during a
//! tick is not reissued until the following one.

use hal_abstractions::{BusTransport, HttpTransport, LinkDriver, QoS};
use heapless::Vec;

use crate::config::{EngineConfig, SyncIntervals};
use crate::error::SyncError;
use crate::event::{Event, SETTINGS_MAX};
use crate::fetch::{FetchErrorCause, FetchFailure, FetchKind, RequestFetcher};
use crate::hooks::SyncHooks;
use crate::link::{DownReason, IpInfo, LinkState, NetworkLinkManager};
use crate::session::{DisconnectReason, SessionManager, SessionState};
use crate::status::{parse_server_state, SyncStatus};
use crate::time::{elapsed, scaled, Duration, Instant};
use crate::topics::Topic;

/// Largest telemetry snapshot
pub const TELEMETRY_MAX: usize = 256;

type SettingsBlob = Vec<u8, SETTINGS_MAX>;

#[derive(Debug, Clone, Copy)]
struct TelemetryInFlight {
    id: u16,
    issued_at: Instant,
}

#[derive(Debug, Clone)]
struct SettingsInFlight {
    id: u16,
    blob: SettingsBlob,
}

/// Tick-driven orchestrator owning the link, session and fetch state
pub struct SyncScheduler<L, B, H> {
    config: EngineConfig,
    link_driver: L,
    bus: B,
    http: H,
    link: NetworkLinkManager,
    session: SessionManager,
    fetcher: RequestFetcher,
    server_online: bool,
    intervals: SyncIntervals,
    last_data_sync_at: Option<Instant>,
    last_clock_sync_at: Option<Instant>,
    last_weather_sync_at: Option<Instant>,
    /// First instant sync actions were allowed; stands in for unset timestamps
    sync_baseline: Option<Instant>,
    telemetry_in_flight: Option<TelemetryInFlight>,
    settings_in_flight: Option<SettingsInFlight>,
    deferred_settings: Option<SettingsBlob>,
}

impl<L, B, H> SyncScheduler<L, B, H>
where
    L: LinkDriver,
    B: BusTransport,
    H: HttpTransport,
{
    pub fn new(config: EngineConfig, link_driver: L, bus: B, http: H) -> Self {
        let intervals = config.intervals.clamped();
        Self {
            link: NetworkLinkManager::new(),
            session: SessionManager::new(config.timing),
            fetcher: RequestFetcher::new(config.timing.max_timeout),
            config,
            link_driver,
            bus,
            http,
            server_online: false,
            intervals,
            last_data_sync_at: None,
            last_clock_sync_at: None,
            last_weather_sync_at: None,
            sync_baseline: None,
            telemetry_in_flight: None,
            settings_in_flight: None,
            deferred_settings: None,
        }
    }

    /// Feed one queued event
    pub fn handle(
        &mut self,
        event: Event,
        now: Instant,
        hooks: &mut impl SyncHooks,
    ) -> Result<(), SyncError> {
        match event {
            Event::Tick => self.tick(now, hooks),
            Event::LinkUp(ip) => self.on_link_up(ip),
            Event::LinkDown(reason) => self.on_link_down(reason, now),
            Event::SessionConnected { persisted } => self.on_session_connect(persisted, now),
            Event::SessionDisconnected(reason) => self.on_session_disconnect(reason, now),
            Event::MessageChunk {
                topic,
                payload,
                offset,
                total_len,
            } => {
                return self.on_message_chunk(
                    topic.as_str(),
                    &payload,
                    offset,
                    payload.len(),
                    total_len,
                    hooks,
                )
            }
            Event::PublishAck(id) => self.on_publish_ack(id, now),
            Event::FetchComplete {
                kind,
                token,
                status,
                body,
            } => {
                self.on_fetch_complete(kind, token, status, &body, now, hooks);
            }
            Event::FetchError { kind, token, cause } => self.on_fetch_error(kind, token, cause),
            Event::SettingsChanged(blob) => return self.settings_changed(&blob),
        }
        Ok(())
    }

    /// Periodic decision pass
    pub fn tick(&mut self, now: Instant, hooks: &mut impl SyncHooks) {
        let timed_out = self.fetcher.poll_timeouts(&mut self.http, now);
        let telemetry_expired = self.expire_telemetry(now);

        if !self.link.is_up() {
            self.drive_link(now);
            return;
        }

        if !self.session.is_session_up() {
            self.drive_session(now);
            if !self.session.at_fail_ceiling() {
                return;
            }
        }

        let baseline = *self.sync_baseline.get_or_insert(now);

        for kind in FetchKind::ALL {
            if !timed_out.contains(&kind) && self.fetch_due(kind, baseline, now) {
                self.issue_fetch(kind, now);
            }
        }

        if !telemetry_expired && self.telemetry_due(baseline, now) {
            self.publish_telemetry(now, hooks);
        }
    }

    pub fn on_link_up(&mut self, ip: IpInfo) {
        self.link.on_up(ip);
    }

    /// Link lost: drops the session and silently cancels outstanding fetches
    pub fn on_link_down(&mut self, reason: DownReason, now: Instant) {
        if !self.link.on_down(reason) {
            return;
        }
        self.fetcher.cancel_all(&mut self.http);
        self.session.on_link_down(&mut self.bus, now);
        self.release_publishes();
    }

    pub fn on_session_connect(&mut self, persisted: bool, now: Instant) {
        if !self.link.is_up() {
            log_warn!("Ignoring session connect while link is down");
            return;
        }
        if !self
            .session
            .on_connect(&mut self.bus, self.config.broker.qos, persisted)
        {
            return;
        }
        self.sync_baseline.get_or_insert(now);

        if let Some(blob) = self.deferred_settings.take() {
            log_info!("Publishing deferred settings");
            self.publish_settings(blob);
        }
    }

    pub fn on_session_disconnect(&mut self, reason: DisconnectReason, now: Instant) {
        self.session.on_disconnect(reason, now);
        self.release_publishes();
        self.check_fail_ceiling();
    }

    /// Incoming chunk; complete messages are routed to `hooks`
    ///
    /// A server status message also updates `server_online` before it is
    /// dispatched.
    pub fn on_message_chunk(
        &mut self,
        topic: &str,
        payload: &[u8],
        offset: usize,
        chunk_len: usize,
        total_len: usize,
        hooks: &mut impl SyncHooks,
    ) -> Result<(), SyncError> {
        let Some(message) = self
            .session
            .on_message_chunk(topic, payload, offset, chunk_len, total_len)?
        else {
            return Ok(());
        };

        let Some(topic) = Topic::from_path(message.topic.as_str()) else {
            log_warn!("No handler for topic {}", message.topic.as_str());
            return Ok(());
        };

        if topic == Topic::ServerStatus {
            match parse_server_state(&message.payload) {
                Some(online) => self.set_server_online(online),
                None => log_warn!("Unrecognized server status payload"),
            }
        }
        hooks.dispatch(topic, &message.payload);
        Ok(())
    }

    pub fn on_publish_ack(&mut self, id: u16, now: Instant) {
        if !self.session.on_publish_ack(id) {
            log_debug!("Ack for untracked publish {}", id);
            return;
        }

        if matches!(self.telemetry_in_flight, Some(t) if t.id == id) {
            self.telemetry_in_flight = None;
            self.last_data_sync_at = Some(now);
            log_debug!("Telemetry {} acknowledged", id);
        } else if matches!(&self.settings_in_flight, Some(s) if s.id == id) {
            self.settings_in_flight = None;
            log_info!("Settings {} acknowledged", id);
        }
    }

    /// Response for a pending fetch
    ///
    /// `None` for a response nobody is waiting for. The timestamp only
    /// advances once the decoder accepted the body.
    pub fn on_fetch_complete(
        &mut self,
        kind: FetchKind,
        token: u32,
        status: u16,
        body: &[u8],
        now: Instant,
        hooks: &mut impl SyncHooks,
    ) -> Option<Result<(), FetchFailure>> {
        let outcome = self.fetcher.on_complete(kind, token, status)?.and_then(|()| {
            hooks
                .deliver_response(kind, body)
                .map_err(|_| FetchFailure::Undecodable)
        });
        match outcome {
            Ok(()) => {
                log_info!("{:?} sync complete", kind);
                *self.last_sync_mut(kind) = Some(now);
            }
            Err(FetchFailure::Undecodable) => log_warn!("{:?} response rejected by decoder", kind),
            Err(_) => {}
        }
        Some(outcome)
    }

    pub fn on_fetch_error(&mut self, kind: FetchKind, token: u32, cause: FetchErrorCause) {
        self.fetcher.on_error(kind, token, cause);
    }

    /// Publish a settings blob now, or once the next session is up
    ///
    /// A newer blob replaces any deferred one.
    pub fn settings_changed(&mut self, blob: &[u8]) -> Result<(), SyncError> {
        let blob = SettingsBlob::from_slice(blob).map_err(|_| SyncError::PayloadTooLarge)?;

        if self.session.is_session_up() {
            self.deferred_settings = None;
            self.publish_settings(blob);
        } else {
            if self.deferred_settings.is_some() {
                log_debug!("Deferred settings superseded");
            }
            self.deferred_settings = Some(blob);
        }
        Ok(())
    }

    /// Apply new intervals, clamped to their minimums
    pub fn set_intervals(&mut self, intervals: SyncIntervals) -> SyncIntervals {
        self.intervals = intervals.clamped();
        log_info!(
            "Sync intervals: data {}s, clock {}u, weather {}u",
            self.intervals.data_secs,
            self.intervals.clock_units,
            self.intervals.weather_units
        );
        self.intervals
    }

    pub fn set_server_online(&mut self, online: bool) {
        if self.server_online != online {
            log_info!("Server {}", if online { "online" } else { "offline" });
        }
        self.server_online = online;
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            server_online: self.server_online,
            session_up: self.session.is_session_up(),
            link_up: self.link.is_up(),
            failed_attempts: self.session.failed_attempts(),
            intervals: self.intervals,
            last_data_sync_at: self.last_data_sync_at,
            last_clock_sync_at: self.last_clock_sync_at,
            last_weather_sync_at: self.last_weather_sync_at,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_fetch_pending(&self, kind: FetchKind) -> bool {
        self.fetcher.is_pending(kind)
    }

    pub fn has_deferred_settings(&self) -> bool {
        self.deferred_settings.is_some()
    }

    pub fn link_driver(&self) -> &L {
        &self.link_driver
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    pub fn http_mut(&mut self) -> &mut H {
        &mut self.http
    }

    fn drive_link(&mut self, now: Instant) {
        if self.link.attempt_expired(now, self.config.timing.max_timeout) {
            self.link.abandon(&mut self.link_driver);
            return;
        }
        if let Err(e) = self
            .link
            .connect(&mut self.link_driver, &self.config.credentials, now)
        {
            log_debug!("Link connect deferred: {:?}", e);
        }
    }

    fn drive_session(&mut self, now: Instant) {
        self.session.poll(&mut self.bus, now);
        if let Err(e) = self
            .session
            .connect(&mut self.bus, &self.config.broker, self.link.is_up(), now)
        {
            log_debug!("Session connect deferred: {:?}", e);
        }
        self.check_fail_ceiling();
    }

    fn check_fail_ceiling(&mut self) {
        if self.session.at_fail_ceiling() && self.server_online {
            log_warn!("Failure ceiling reached, reporting server offline");
            self.server_online = false;
        }
    }

    fn fetch_due(&self, kind: FetchKind, baseline: Instant, now: Instant) -> bool {
        if self.fetcher.is_pending(kind) {
            return false;
        }
        let (last, units) = match kind {
            FetchKind::Time => (self.last_clock_sync_at, self.intervals.clock_units),
            FetchKind::Weather => (self.last_weather_sync_at, self.intervals.weather_units),
        };
        let interval = scaled(self.config.timing.sync_unit, units);
        elapsed(now, last.unwrap_or(baseline)) >= interval
    }

    fn issue_fetch(&mut self, kind: FetchKind, now: Instant) {
        let url = self.config.endpoints.url(kind);
        if let Err(e) = self
            .fetcher
            .issue(&mut self.http, kind, url, self.link.is_up(), now)
        {
            log_debug!("{:?} fetch not issued: {:?}", kind, e);
        }
    }

    fn telemetry_due(&self, baseline: Instant, now: Instant) -> bool {
        if !self.session.is_session_up()
            || !self.server_online
            || self.telemetry_in_flight.is_some()
        {
            return false;
        }
        let floor = self.config.timing.min_sync_interval;
        let mut interval = Duration::secs(u64::from(self.intervals.data_secs));
        if interval < floor {
            interval = floor;
        }
        elapsed(now, self.last_data_sync_at.unwrap_or(baseline)) >= interval
    }

    fn publish_telemetry(&mut self, now: Instant, hooks: &mut impl SyncHooks) {
        let mut buf = [0u8; TELEMETRY_MAX];
        let Some(len) = hooks.telemetry_snapshot(&mut buf) else {
            return;
        };
        let qos = self.config.broker.qos;
        let payload = &buf[..len.min(TELEMETRY_MAX)];

        match self.session.publish(
            &mut self.bus,
            self.config.broker.telemetry_topic,
            payload,
            qos,
            false,
        ) {
            Ok(id) if qos.is_acknowledged() => {
                self.telemetry_in_flight = Some(TelemetryInFlight { id, issued_at: now });
            }
            Ok(_) => self.last_data_sync_at = Some(now),
            Err(e) => log_warn!("Telemetry publish failed: {:?}", e),
        }
    }

    /// Abandon a telemetry publish whose ack never came
    fn expire_telemetry(&mut self, now: Instant) -> bool {
        match self.telemetry_in_flight {
            Some(t) if elapsed(now, t.issued_at) >= self.config.timing.max_timeout => {
                log_warn!("Telemetry {} unacknowledged, giving up", t.id);
                self.telemetry_in_flight = None;
                true
            }
            _ => false,
        }
    }

    fn publish_settings(&mut self, blob: SettingsBlob) {
        match self.session.publish(
            &mut self.bus,
            self.config.broker.settings_topic,
            &blob,
            QoS::AtLeastOnce,
            true,
        ) {
            Ok(id) => self.settings_in_flight = Some(SettingsInFlight { id, blob }),
            Err(e) => {
                log_warn!("Settings publish failed: {:?}", e);
                self.deferred_settings = Some(blob);
            }
        }
    }

    /// Forget in-flight publishes of a lost session
    ///
    /// Unacknowledged settings go back to deferred unless newer ones are
    /// already waiting.
    fn release_publishes(&mut self) {
        self.telemetry_in_flight = None;
        if let Some(settings) = self.settings_in_flight.take() {
            if self.deferred_settings.is_none() {
                self.deferred_settings = Some(settings.blob);
            }
        }
    }

    fn last_sync_mut(&mut self, kind: FetchKind) -> &mut Option<Instant> {
        match kind {
            FetchKind::Time => &mut self.last_clock_sync_at,
            FetchKind::Weather => &mut self.last_weather_sync_at,
        }
    }
}
