#![deny(unsafe_code)]
#![deny(warnings)]
//! Clock application behind the sync engine
//!
//! Produces the telemetry snapshot, decodes the time and weather responses,
//! and handles messages arriving on the subscribed topics.

use core::fmt::Write as _;

use clock_core::config::SyncIntervals;
use clock_core::error::DecodeError;
use clock_core::event::FETCH_BODY_MAX;
use clock_core::fetch::FetchKind;
use clock_core::hooks::SyncHooks;
use clock_core::topics::Topic;
use defmt::{debug, info, warn};
use heapless::{String, Vec};

use crate::json;
use crate::time::{self, CivilDateTime};

/// Settings report published on the settings topic
pub const SETTINGS_REPORT_MAX: usize = 128;

pub struct ClockApp {
    /// Seconds since boot, refreshed by the engine task before each event
    uptime_secs: u64,
    intervals: SyncIntervals,
    pending_intervals: Option<SyncIntervals>,
    weather: Vec<u8, FETCH_BODY_MAX>,
    weather_updates: u32,
}

impl ClockApp {
    pub fn new(intervals: SyncIntervals) -> Self {
        Self {
            uptime_secs: 0,
            intervals,
            pending_intervals: None,
            weather: Vec::new(),
            weather_updates: 0,
        }
    }

    pub fn set_uptime(&mut self, uptime_secs: u64) {
        self.uptime_secs = uptime_secs;
    }

    /// Interval change requested by a config/settings message
    pub fn take_interval_update(&mut self) -> Option<SyncIntervals> {
        self.pending_intervals.take()
    }

    /// Record the intervals the engine actually applied
    pub fn intervals_applied(&mut self, intervals: SyncIntervals) {
        self.intervals = intervals;
    }

    /// JSON settings report for the broker
    pub fn settings_report(&self) -> Option<String<SETTINGS_REPORT_MAX>> {
        let mut report = String::new();
        write!(
            report,
            "{{\"dataSyncInterval\":{},\"clockSyncInterval\":{},\"weatherSyncInterval\":{}}}",
            self.intervals.data_secs, self.intervals.clock_units, self.intervals.weather_units
        )
        .ok()?;
        Some(report)
    }

    fn apply_settings(&mut self, payload: &[u8]) {
        let field = |key| json::find_u64(payload, key).and_then(|v| u32::try_from(v).ok());
        let requested = SyncIntervals {
            data_secs: field("dataSyncInterval").unwrap_or(self.intervals.data_secs),
            clock_units: field("clockSyncInterval").unwrap_or(self.intervals.clock_units),
            weather_units: field("weatherSyncInterval").unwrap_or(self.intervals.weather_units),
        };
        if requested != self.intervals {
            info!("Sync intervals requested: {:?}", requested);
            self.pending_intervals = Some(requested);
        }
    }

    fn decode_time(&mut self, body: &[u8]) -> Result<(), DecodeError> {
        let unix_secs = json::find_u64(body, "unixtime").ok_or(DecodeError)?;
        time::set_unix_time(unix_secs).map_err(|e| {
            warn!("RTC write failed: {:?}", e);
            DecodeError
        })?;
        info!("Clock synced: {:?}", CivilDateTime::from_unix(unix_secs));
        Ok(())
    }

    fn decode_weather(&mut self, body: &[u8]) -> Result<(), DecodeError> {
        if !json::is_object(body) {
            return Err(DecodeError);
        }
        self.weather.clear();
        // Fits: body was delivered in a FETCH_BODY_MAX buffer
        let _ = self.weather.extend_from_slice(body);
        self.weather_updates = self.weather_updates.wrapping_add(1);
        info!("Weather updated ({} bytes)", body.len());
        Ok(())
    }
}

impl SyncHooks for ClockApp {
    fn telemetry_snapshot(&mut self, buf: &mut [u8]) -> Option<usize> {
        let mut snapshot = String::<{ clock_core::scheduler::TELEMETRY_MAX }>::new();
        write!(
            snapshot,
            "{{\"uptime\":{},\"synced\":{}",
            self.uptime_secs,
            time::is_time_synced()
        )
        .ok()?;
        if let Ok(now) = time::unix_time() {
            let civil = CivilDateTime::from_unix(now);
            write!(
                snapshot,
                ",\"time\":{},\"date\":\"{:04}-{:02}-{:02} {:02}:{:02}:{:02}\"",
                now, civil.year, civil.month, civil.day, civil.hour, civil.minute, civil.second
            )
            .ok()?;
        }
        write!(snapshot, ",\"weatherUpdates\":{}}}", self.weather_updates).ok()?;

        let out = buf.get_mut(..snapshot.len())?;
        out.copy_from_slice(snapshot.as_bytes());
        Some(snapshot.len())
    }

    fn deliver_response(&mut self, kind: FetchKind, body: &[u8]) -> Result<(), DecodeError> {
        match kind {
            FetchKind::Time => self.decode_time(body),
            FetchKind::Weather => self.decode_weather(body),
        }
    }

    fn dispatch(&mut self, topic: Topic, payload: &[u8]) {
        match topic {
            Topic::Config | Topic::Settings => self.apply_settings(payload),
            Topic::Control => info!("Control message ({} bytes)", payload.len()),
            Topic::Upgrade => warn!("Firmware upgrade requests are not supported"),
            Topic::Data | Topic::Status | Topic::ServerStatus => {
                debug!("Message on {:?} ({} bytes)", topic, payload.len())
            }
        }
    }
}
