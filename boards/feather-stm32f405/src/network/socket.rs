#![deny(unsafe_code)]
#![deny(warnings)]
//! Async TCP socket wrapper shared by the MQTT and HTTP runners
//!
//! Wraps `embassy_net::tcp::TcpSocket` behind the `embedded-io-async`
//! traits `rust-mqtt` needs for its transport, and adds host name
//! resolution so both runners connect the same way.

use defmt::{debug, error, Debug2Format};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpEndpoint, Stack};
use embassy_time::Duration;
use embedded_io_async::{ErrorType, Read, Write};

use super::error::NetworkError;

/// Socket inactivity timeout
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Async TCP socket implementing embedded-io-async traits
pub struct AsyncTcpSocket<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> AsyncTcpSocket<'a> {
    pub fn new(stack: Stack<'a>, rx_buffer: &'a mut [u8], tx_buffer: &'a mut [u8]) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));
        Self { socket }
    }

    /// Connect to a remote endpoint
    pub async fn connect(&mut self, endpoint: IpEndpoint) -> Result<(), NetworkError> {
        self.socket.connect(endpoint).await.map_err(|e| {
            error!("TCP connect failed: {:?}", Debug2Format(&e));
            NetworkError::SocketError
        })
    }

    /// Resolve `host` and connect to it on `port`
    pub async fn connect_host(
        &mut self,
        stack: Stack<'_>,
        host: &str,
        port: u16,
    ) -> Result<(), NetworkError> {
        let address = resolve(stack, host).await?;
        let endpoint = IpEndpoint::new(address, port);
        debug!("Resolved {} to {}", host, Debug2Format(&endpoint));
        self.connect(endpoint).await
    }

    /// Close the write half; the peer sees EOF
    pub fn close(&mut self) {
        self.socket.close();
    }
}

/// First IPv4 address for `host`
async fn resolve(stack: Stack<'_>, host: &str) -> Result<embassy_net::IpAddress, NetworkError> {
    stack
        .dns_query(host, DnsQueryType::A)
        .await
        .map_err(|e| {
            error!("DNS query for {} failed: {:?}", host, Debug2Format(&e));
            NetworkError::DnsError
        })?
        .first()
        .copied()
        .ok_or_else(|| {
            error!("DNS returned no results for {}", host);
            NetworkError::DnsError
        })
}

impl ErrorType for AsyncTcpSocket<'_> {
    type Error = NetworkError;
}

impl Read for AsyncTcpSocket<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket
            .read(buf)
            .await
            .map_err(|_| NetworkError::SocketError)
    }
}

impl Write for AsyncTcpSocket<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket
            .write(buf)
            .await
            .map_err(|_| NetworkError::SocketError)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket
            .flush()
            .await
            .map_err(|_| NetworkError::SocketError)
    }
}
