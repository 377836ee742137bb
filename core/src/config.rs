//! Engine configuration structures
//!
//! Defaults carry the firmware's shipped constants. The configuration
//! collaborator (flash-backed settings) overrides them at start-up.

use hal_abstractions::QoS;
use heapless::String;

use crate::fetch::FetchKind;
use crate::time::Duration;

/// Request deadline and connect timeout (ms)
pub const MAX_TIMEOUT_MS: u64 = 10_000;
/// Base reconnect interval (s)
pub const RETRY_INTERVAL_SECS: u64 = 3;
/// Consecutive session failures before the server is reported offline
pub const MAX_FAIL_COUNTS: u8 = 5;
/// Floor for the telemetry publish interval (s)
pub const MIN_SYNC_INTERVAL_SECS: u32 = 3;
/// One clock/weather interval unit (s)
pub const SYNC_UNIT_SECS: u64 = 120;
/// Default clock sync interval, in units
pub const SYNC_TIME_INTERVAL: u32 = 15;
/// Default weather sync interval, in units
pub const SYNC_WEATHER_INTERVAL: u32 = 15;
/// Default telemetry publish interval (s)
pub const DATA_SYNC_INTERVAL_SECS: u32 = 10;

pub const SSID_MAX_LEN: usize = 32;
pub const PASSPHRASE_MAX_LEN: usize = 64;
pub const HOST_MAX_LEN: usize = 64;
pub const CLIENT_ID_MAX_LEN: usize = 48;
pub const URL_MAX_LEN: usize = 128;

/// Copy `s` into a bounded string, `None` if it does not fit
pub fn bounded<const N: usize>(s: &str) -> Option<String<N>> {
    let mut out = String::new();
    out.push_str(s).ok()?;
    Some(out)
}

fn bounded_or_empty<const N: usize>(s: &str) -> String<N> {
    bounded(s).unwrap_or_default()
}

/// Access point credentials, opaque to the engine
#[derive(Debug, Clone, Default)]
pub struct LinkCredentials {
    pub ssid: String<SSID_MAX_LEN>,
    pub passphrase: String<PASSPHRASE_MAX_LEN>,
}

impl LinkCredentials {
    pub fn new(ssid: &str, passphrase: &str) -> Self {
        Self {
            ssid: bounded_or_empty(ssid),
            passphrase: bounded_or_empty(passphrase),
        }
    }
}

/// Message bus endpoint and publish parameters
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker hostname
    pub host: String<HOST_MAX_LEN>,
    /// Broker port (plain MQTT)
    pub port: u16,
    /// Client identifier presented at connect
    pub client_id: String<CLIENT_ID_MAX_LEN>,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
    /// Topic the telemetry snapshot is published on
    pub telemetry_topic: &'static str,
    /// Topic the settings blob is published on (retained)
    pub settings_topic: &'static str,
    /// QoS for subscriptions and telemetry
    pub qos: QoS,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: bounded_or_empty("www.eflystudio.com"),
            port: 1883,
            client_id: bounded_or_empty("desktop-clock"),
            keep_alive_secs: 60,
            telemetry_topic: "esp_device/report/data",
            settings_topic: "esp_device/report/settings",
            qos: QoS::AtLeastOnce,
        }
    }
}

/// Time and weather source URLs
#[derive(Debug, Clone)]
pub struct FetchEndpoints {
    pub time_url: String<URL_MAX_LEN>,
    pub weather_url: String<URL_MAX_LEN>,
}

impl FetchEndpoints {
    pub fn url(&self, kind: FetchKind) -> &str {
        match kind {
            FetchKind::Time => self.time_url.as_str(),
            FetchKind::Weather => self.weather_url.as_str(),
        }
    }
}

impl Default for FetchEndpoints {
    fn default() -> Self {
        Self {
            time_url: bounded_or_empty("http://worldtimeapi.org/api/ip"),
            weather_url: bounded_or_empty("http://www.eflystudio.cn/api/weather.php"),
        }
    }
}

/// User-adjustable sync cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncIntervals {
    /// Telemetry publish interval in seconds (effective floor: 3)
    pub data_secs: u32,
    /// Clock sync interval in 2-minute units (≥1)
    pub clock_units: u32,
    /// Weather sync interval in 2-minute units (≥1)
    pub weather_units: u32,
}

impl SyncIntervals {
    /// Clamp every field to its documented minimum
    pub fn clamped(self) -> Self {
        Self {
            data_secs: self.data_secs.max(MIN_SYNC_INTERVAL_SECS),
            clock_units: self.clock_units.max(1),
            weather_units: self.weather_units.max(1),
        }
    }
}

impl Default for SyncIntervals {
    fn default() -> Self {
        Self {
            data_secs: DATA_SYNC_INTERVAL_SECS,
            clock_units: SYNC_TIME_INTERVAL,
            weather_units: SYNC_WEATHER_INTERVAL,
        }
    }
}

/// Retry, deadline and cadence constants
#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    /// Link/session connect deadline and fetch/ack timeout
    pub max_timeout: Duration,
    /// Base session backoff
    pub retry_interval: Duration,
    /// Failures before the server is reported offline
    pub max_fail_counts: u8,
    /// Telemetry interval floor
    pub min_sync_interval: Duration,
    /// Length of one clock/weather interval unit
    pub sync_unit: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_timeout: Duration::millis(MAX_TIMEOUT_MS),
            retry_interval: Duration::secs(RETRY_INTERVAL_SECS),
            max_fail_counts: MAX_FAIL_COUNTS,
            min_sync_interval: Duration::secs(MIN_SYNC_INTERVAL_SECS as u64),
            sync_unit: Duration::secs(SYNC_UNIT_SECS),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub credentials: LinkCredentials,
    pub broker: BrokerConfig,
    pub endpoints: FetchEndpoints,
    pub intervals: SyncIntervals,
    pub timing: TimingConfig,
}
