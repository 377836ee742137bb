#![deny(unsafe_code)]
#![deny(warnings)]
//! Network runner error types

use clock_core::fetch::FetchErrorCause;
use clock_core::session::DisconnectReason;
use defmt::Format;

/// Network runner operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum NetworkError {
    /// DNS resolution failed
    DnsError,
    /// Socket connect/read/write error
    SocketError,
    /// Peer closed the connection
    ConnectionClosed,
    /// Request timeout
    Timeout,
    /// Malformed URL handed to the HTTP runner
    InvalidUrl,
    /// Response could not be parsed
    InvalidResponse,
    /// Response larger than the receive buffer
    ResponseTooLarge,
    /// Ethernet controller failed to initialize
    HardwareInit,
    /// MQTT connection refused or failed
    MqttConnectionFailed,
    /// MQTT publish failed
    MqttPublishFailed,
    /// MQTT subscribe failed
    MqttSubscribeFailed,
    /// MQTT protocol error
    MqttProtocolError,
    /// MQTT buffer allocation failed
    MqttBufferError,
}

impl core::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::DnsError => write!(f, "DNS resolution failed"),
            Self::SocketError => write!(f, "Socket error"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Request timeout"),
            Self::InvalidUrl => write!(f, "Invalid URL"),
            Self::InvalidResponse => write!(f, "Invalid response"),
            Self::ResponseTooLarge => write!(f, "Response too large"),
            Self::HardwareInit => write!(f, "Ethernet init failed"),
            Self::MqttConnectionFailed => write!(f, "MQTT connection failed"),
            Self::MqttPublishFailed => write!(f, "MQTT publish failed"),
            Self::MqttSubscribeFailed => write!(f, "MQTT subscribe failed"),
            Self::MqttProtocolError => write!(f, "MQTT protocol error"),
            Self::MqttBufferError => write!(f, "MQTT buffer error"),
        }
    }
}

impl core::error::Error for NetworkError {}

impl embedded_io_async::Error for NetworkError {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        match self {
            Self::SocketError | Self::ConnectionClosed => embedded_io_async::ErrorKind::BrokenPipe,
            Self::Timeout => embedded_io_async::ErrorKind::TimedOut,
            Self::InvalidResponse | Self::InvalidUrl => embedded_io_async::ErrorKind::InvalidData,
            Self::ResponseTooLarge | Self::MqttBufferError => {
                embedded_io_async::ErrorKind::OutOfMemory
            }
            _ => embedded_io_async::ErrorKind::Other,
        }
    }
}

impl From<NetworkError> for FetchErrorCause {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::DnsError | NetworkError::InvalidUrl => FetchErrorCause::Dns,
            NetworkError::SocketError => FetchErrorCause::Connect,
            NetworkError::ResponseTooLarge => FetchErrorCause::BodyTooLarge,
            NetworkError::InvalidResponse => FetchErrorCause::InvalidResponse,
            _ => FetchErrorCause::ConnectionLost,
        }
    }
}

impl From<NetworkError> for DisconnectReason {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::MqttConnectionFailed => DisconnectReason::Refused,
            NetworkError::Timeout => DisconnectReason::Timeout,
            NetworkError::DnsError => DisconnectReason::ServerUnavailable,
            _ => DisconnectReason::TcpDisconnected,
        }
    }
}
