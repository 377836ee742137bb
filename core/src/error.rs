//! Engine error taxonomy
//!
//! Nothing here is fatal. The scheduler either defers the action to a later
//! tick or lets the owning state machine's backoff retry it.

/// Engine operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncError {
    /// Operation needs the network link and it is not up
    LinkDown,
    /// Publish attempted without an established bus session
    SessionNotReady,
    /// Transport refused a publish on an established session
    PublishRejected,
    /// Request exceeded its deadline
    Timeout,
    /// Reassembly chunk out of sequence; the message was dropped
    MalformedChunk,
    /// A fetch of the same kind is already outstanding
    AlreadyPending,
    /// Payload does not fit the bounded buffer it must be copied into
    PayloadTooLarge,
    /// Platform driver refused to start the operation
    Transport,
}

impl core::fmt::Display for SyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::LinkDown => write!(f, "Network link is down"),
            Self::SessionNotReady => write!(f, "Bus session not established"),
            Self::PublishRejected => write!(f, "Publish rejected by transport"),
            Self::Timeout => write!(f, "Request timeout"),
            Self::MalformedChunk => write!(f, "Malformed message chunk"),
            Self::AlreadyPending => write!(f, "Request already pending"),
            Self::PayloadTooLarge => write!(f, "Payload too large"),
            Self::Transport => write!(f, "Transport error"),
        }
    }
}

impl core::error::Error for SyncError {}

/// Response body rejected by a format decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecodeError;

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Response body could not be decoded")
    }
}

impl core::error::Error for DecodeError {}

/// Short name of a driver error's kind, for log lines
pub(crate) fn kind_name<E: embedded_io::Error>(e: &E) -> &'static str {
    use embedded_io::ErrorKind;
    match e.kind() {
        ErrorKind::NotConnected => "not connected",
        ErrorKind::ConnectionRefused => "connection refused",
        ErrorKind::ConnectionReset => "connection reset",
        ErrorKind::TimedOut => "timed out",
        ErrorKind::OutOfMemory => "out of memory",
        ErrorKind::InvalidInput => "invalid input",
        _ => "other",
    }
}
