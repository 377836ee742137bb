//! Recording drivers for host tests
//!
//! Each mock accepts every request (unless told to fail the next one) and
//! records what it was asked to do, so tests can assert on the traffic the
//! engine generated without any network.

use heapless::{String, Vec};

use crate::{BusTransport, HttpTransport, LinkDriver, QoS};

/// Error returned by a mock that was told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

impl core::fmt::Display for MockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "mock driver refused the request")
    }
}

impl core::error::Error for MockError {}

impl embedded_io::Error for MockError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::Other
    }
}

fn copy_str<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Link driver that records join attempts
#[derive(Debug, Default)]
pub struct MockLink {
    pub joins: u32,
    pub leaves: u32,
    pub last_ssid: String<32>,
    pub fail_next: bool,
}

impl LinkDriver for MockLink {
    type Error = MockError;

    fn begin_join(&mut self, ssid: &str, _passphrase: &str) -> Result<(), Self::Error> {
        if core::mem::take(&mut self.fail_next) {
            return Err(MockError);
        }
        self.joins += 1;
        self.last_ssid = copy_str(ssid);
        Ok(())
    }

    fn leave(&mut self) {
        self.leaves += 1;
    }
}

/// A publish captured by [`MockBus`]
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String<64>,
    pub payload: Vec<u8, 256>,
    pub qos: QoS,
    pub retain: bool,
    pub packet_id: u16,
}

/// Broker transport that records connects, subscriptions and publishes
#[derive(Debug, Default)]
pub struct MockBus {
    pub connects: u32,
    pub disconnects: u32,
    pub last_host: String<64>,
    pub last_port: u16,
    pub subscriptions: Vec<(String<64>, QoS), 32>,
    pub publishes: Vec<Published, 64>,
    pub fail_next_connect: bool,
    pub fail_next_publish: bool,
    next_packet_id: u16,
}

impl MockBus {
    /// Number of publishes recorded on `topic`
    pub fn publishes_on(&self, topic: &str) -> usize {
        self.publishes
            .iter()
            .filter(|p| p.topic.as_str() == topic)
            .count()
    }

    /// Most recent publish on `topic`
    pub fn last_publish_on(&self, topic: &str) -> Option<&Published> {
        self.publishes
            .iter()
            .rev()
            .find(|p| p.topic.as_str() == topic)
    }

    fn allocate_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        self.next_packet_id
    }
}

impl BusTransport for MockBus {
    type Error = MockError;

    fn begin_connect(
        &mut self,
        host: &str,
        port: u16,
        _client_id: &str,
        _keep_alive_secs: u16,
    ) -> Result<(), Self::Error> {
        if core::mem::take(&mut self.fail_next_connect) {
            return Err(MockError);
        }
        self.connects += 1;
        self.last_host = copy_str(host);
        self.last_port = port;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Self::Error> {
        let _ = self.subscriptions.push((copy_str(topic), qos));
        Ok(self.allocate_id())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<u16, Self::Error> {
        if core::mem::take(&mut self.fail_next_publish) {
            return Err(MockError);
        }
        let packet_id = if qos.is_acknowledged() {
            self.allocate_id()
        } else {
            0
        };
        let mut body = Vec::new();
        let _ = body.extend_from_slice(&payload[..payload.len().min(256)]);
        let _ = self.publishes.push(Published {
            topic: copy_str(topic),
            payload: body,
            qos,
            retain,
            packet_id,
        });
        Ok(packet_id)
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
    }
}

/// HTTP client that records issued and aborted requests
#[derive(Debug, Default)]
pub struct MockHttp {
    pub requests: Vec<(u32, String<160>), 32>,
    pub aborted: Vec<u32, 32>,
    pub fail_next: bool,
}

impl MockHttp {
    /// Number of requests issued for `url`
    pub fn requests_for(&self, url: &str) -> usize {
        self.requests
            .iter()
            .filter(|(_, u)| u.as_str() == url)
            .count()
    }
}

impl HttpTransport for MockHttp {
    type Error = MockError;

    fn begin_get(&mut self, token: u32, url: &str) -> Result<(), Self::Error> {
        if core::mem::take(&mut self.fail_next) {
            return Err(MockError);
        }
        let _ = self.requests.push((token, copy_str(url)));
        Ok(())
    }

    fn abort(&mut self, token: u32) {
        let _ = self.aborted.push(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_assigns_ids_only_to_acknowledged_publishes() {
        let mut bus = MockBus::default();
        assert_eq!(bus.publish("a", b"x", QoS::AtMostOnce, false), Ok(0));
        assert_eq!(bus.publish("a", b"y", QoS::AtLeastOnce, false), Ok(1));
        assert_eq!(bus.publishes_on("a"), 2);
        assert_eq!(bus.last_publish_on("a").map(|p| p.packet_id), Some(1));
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let mut http = MockHttp {
            fail_next: true,
            ..Default::default()
        };
        assert!(http.begin_get(1, "http://a").is_err());
        assert!(http.begin_get(2, "http://a").is_ok());
        assert_eq!(http.requests_for("http://a"), 1);
    }

    #[test]
    fn test_link_records_ssid() {
        let mut link = MockLink::default();
        link.begin_join("Router-1234", "pw").unwrap();
        assert_eq!(link.joins, 1);
        assert_eq!(link.last_ssid.as_str(), "Router-1234");
    }
}
