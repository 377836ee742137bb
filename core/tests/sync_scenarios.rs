//! End-to-end scheduler scenarios against the recording drivers

use clock_core::config::{EngineConfig, SyncIntervals};
use clock_core::error::DecodeError;
use clock_core::event::Event;
use clock_core::fetch::FetchKind;
use clock_core::hooks::SyncHooks;
use clock_core::link::{DownReason, IpInfo};
use clock_core::session::DisconnectReason;
use clock_core::time::{at_secs, Duration, Instant};
use clock_core::topics::Topic;
use clock_core::SyncScheduler;
use hal_abstractions::mock::{MockBus, MockHttp, MockLink};
use hal_abstractions::QoS;

const WEATHER_URL: &str = "http://www.eflystudio.cn/api/weather.php";
const TELEMETRY_TOPIC: &str = "esp_device/report/data";

const IP: IpInfo = IpInfo {
    address: [192, 168, 4, 2],
    gateway: Some([192, 168, 4, 1]),
};

type Scheduler = SyncScheduler<MockLink, MockBus, MockHttp>;

#[derive(Default)]
struct App {
    dispatched: Vec<Topic>,
}

impl SyncHooks for App {
    fn telemetry_snapshot(&mut self, buf: &mut [u8]) -> Option<usize> {
        let data = b"{\"uptime\":1}";
        buf[..data.len()].copy_from_slice(data);
        Some(data.len())
    }

    fn deliver_response(&mut self, _kind: FetchKind, _body: &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }

    fn dispatch(&mut self, topic: Topic, _payload: &[u8]) {
        self.dispatched.push(topic);
    }
}

fn scheduler_with(intervals: SyncIntervals, qos: QoS) -> Scheduler {
    let mut config = EngineConfig::default();
    config.intervals = intervals;
    config.broker.qos = qos;
    SyncScheduler::new(
        config,
        MockLink::default(),
        MockBus::default(),
        MockHttp::default(),
    )
}

/// Link up at `link_at`, session established at `session_at`
fn bring_online(s: &mut Scheduler, app: &mut App, link_at: Instant, session_at: Instant) {
    s.tick(link_at, app);
    s.on_link_up(IP);
    s.tick(link_at, app);
    s.on_session_connect(false, session_at);
    assert!(s.status().session_up);
}

fn server_says(s: &mut Scheduler, app: &mut App, payload: &[u8]) {
    s.on_message_chunk("server/status", payload, 0, payload.len(), payload.len(), app)
        .unwrap();
}

#[test]
fn weather_timeout_is_retried_next_tick() {
    let mut s = scheduler_with(
        SyncIntervals {
            data_secs: 10,
            clock_units: 100,
            weather_units: 1,
        },
        QoS::AtLeastOnce,
    );
    let mut app = App::default();

    bring_online(&mut s, &mut app, at_secs(0), at_secs(1));
    assert_eq!(s.status().failed_attempts, 0);

    for t in 1..121 {
        s.tick(at_secs(t), &mut app);
    }
    assert_eq!(s.http().requests_for(WEATHER_URL), 0);

    s.tick(at_secs(121), &mut app);
    assert_eq!(s.http().requests_for(WEATHER_URL), 1);
    assert!(s.is_fetch_pending(FetchKind::Weather));

    for t in 122..131 {
        s.tick(at_secs(t), &mut app);
    }
    assert!(s.is_fetch_pending(FetchKind::Weather));

    // Deadline passes: slot freed, timestamp untouched, no reissue yet
    s.tick(at_secs(131), &mut app);
    assert!(!s.is_fetch_pending(FetchKind::Weather));
    assert_eq!(s.status().last_weather_sync_at, None);
    assert_eq!(s.http().requests_for(WEATHER_URL), 1);

    s.tick(at_secs(132), &mut app);
    assert_eq!(s.http().requests_for(WEATHER_URL), 2);
}

#[test]
fn repeated_session_failures_degrade_to_offline() {
    let mut s = scheduler_with(
        SyncIntervals {
            data_secs: 10,
            clock_units: 1,
            weather_units: 100,
        },
        QoS::AtMostOnce,
    );
    let mut app = App::default();

    bring_online(&mut s, &mut app, at_secs(0), at_secs(0));
    server_says(&mut s, &mut app, b"online");
    assert!(s.status().server_online);

    s.on_session_disconnect(DisconnectReason::TcpDisconnected, at_secs(1));
    for attempt in 1..=5u8 {
        let now = s.session_state().retry_deadline.unwrap();
        s.tick(now, &mut app);
        s.on_session_disconnect(DisconnectReason::Refused, now);
        assert_eq!(s.status().failed_attempts, attempt);
    }
    assert!(!s.status().server_online);
    assert!(!s.status().session_up);

    // Offline mode: fetches go out while the session is still retrying
    let now = at_secs(200);
    s.tick(now, &mut app);
    assert!(s.is_fetch_pending(FetchKind::Time));
    assert_eq!(s.bus().connects, 7);

    // Session comes back but the server has not confirmed yet
    s.on_session_connect(true, now);
    assert!(s.status().session_up);
    assert_eq!(s.status().failed_attempts, 0);

    let before = s.bus().publishes_on(TELEMETRY_TOPIC);
    for t in 0..30 {
        s.tick(now + Duration::secs(t), &mut app);
    }
    assert_eq!(s.bus().publishes_on(TELEMETRY_TOPIC), before);

    server_says(&mut s, &mut app, b"online");
    s.tick(now + Duration::secs(30), &mut app);
    assert_eq!(s.bus().publishes_on(TELEMETRY_TOPIC), before + 1);
}

#[test]
fn tick_is_idempotent_for_same_instant() {
    let mut s = scheduler_with(
        SyncIntervals {
            data_secs: 10,
            clock_units: 1,
            weather_units: 1,
        },
        QoS::AtMostOnce,
    );
    let mut app = App::default();
    bring_online(&mut s, &mut app, at_secs(0), at_secs(0));
    server_says(&mut s, &mut app, b"1");

    s.tick(at_secs(120), &mut app);
    let requests = s.http().requests.len();
    let publishes = s.bus().publishes.len();
    assert_eq!(requests, 2);
    assert_eq!(publishes, 1);

    s.tick(at_secs(120), &mut app);
    assert_eq!(s.http().requests.len(), requests);
    assert_eq!(s.bus().publishes.len(), publishes);
    assert_eq!(s.bus().connects, 1);
    assert_eq!(s.link_driver().joins, 1);
}

#[test]
fn telemetry_interval_has_a_floor() {
    let mut s = scheduler_with(
        SyncIntervals {
            data_secs: 1,
            clock_units: 100,
            weather_units: 100,
        },
        QoS::AtMostOnce,
    );
    let mut app = App::default();
    bring_online(&mut s, &mut app, at_secs(0), at_secs(0));
    server_says(&mut s, &mut app, b"online");
    assert_eq!(s.status().intervals.data_secs, 3);

    let mut published_at = Vec::new();
    for t in 1..=9 {
        let before = s.bus().publishes_on(TELEMETRY_TOPIC);
        s.tick(at_secs(t), &mut app);
        if s.bus().publishes_on(TELEMETRY_TOPIC) > before {
            published_at.push(t);
        }
    }
    assert_eq!(published_at, [3, 6, 9]);
}

#[test]
fn chunked_control_message_is_dispatched_once() {
    let mut s = scheduler_with(SyncIntervals::default(), QoS::AtLeastOnce);
    let mut app = App::default();
    bring_online(&mut s, &mut app, at_secs(0), at_secs(0));

    let msg = b"{\"cmd\":\"on\"}";
    let events = [
        Event::chunk("esp_device/control", &msg[..5], 0, msg.len()).unwrap(),
        Event::chunk("esp_device/control", &msg[5..], 5, msg.len()).unwrap(),
    ];
    for event in events {
        s.handle(event, at_secs(1), &mut app).unwrap();
    }
    assert_eq!(app.dispatched, [Topic::Control]);
}

/// Small deterministic generator for event sequences
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

#[test]
fn session_state_follows_link_and_connect_events() {
    let mut s = scheduler_with(SyncIntervals::default(), QoS::AtLeastOnce);
    let mut app = App::default();
    let mut rng = Lcg(0x5eed);

    let mut link_up = false;
    let mut connected_since_up = false;
    let mut failed = 0u8;
    let mut now = at_secs(0);

    for _ in 0..2_000 {
        now = now + Duration::millis(500 + rng.next(4_000));
        let mut connect_fired = false;

        match rng.next(5) {
            0 => s.tick(now, &mut app),
            1 if !link_up => {
                s.on_link_up(IP);
                link_up = true;
                connected_since_up = false;
            }
            1 => {
                s.on_link_down(DownReason::Lost, now);
                link_up = false;
                connected_since_up = false;
            }
            2 => {
                let was_up = s.status().session_up;
                s.on_session_connect(rng.next(2) == 0, now);
                connect_fired = s.status().session_up && !was_up;
                if link_up && s.status().session_up {
                    connected_since_up = true;
                }
            }
            3 => s.on_session_disconnect(DisconnectReason::Refused, now),
            _ => s.tick(now, &mut app),
        }

        let status = s.status();
        if status.session_up {
            assert!(status.link_up);
            assert!(link_up && connected_since_up);
        }

        if connect_fired {
            assert_eq!(status.failed_attempts, 0);
        } else {
            assert!(status.failed_attempts >= failed);
        }
        assert!(status.failed_attempts <= 5);
        failed = status.failed_attempts;
    }
}
