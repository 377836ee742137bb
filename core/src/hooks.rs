//! Collaborators outside the engine
//!
//! The engine never looks inside telemetry, responses or incoming messages.
//! The application implements [`SyncHooks`] to produce and consume them.

use crate::error::DecodeError;
use crate::fetch::FetchKind;
use crate::topics::Topic;

/// Application side of the sync engine
pub trait SyncHooks {
    /// Serialize the current sensor/status snapshot into `buf`
    ///
    /// Returns the number of bytes written, or `None` if there is nothing to
    /// publish.
    fn telemetry_snapshot(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Hand a successful response body to its decoder
    ///
    /// A rejected body counts as a failed fetch and is retried on the next
    /// tick.
    fn deliver_response(&mut self, kind: FetchKind, body: &[u8]) -> Result<(), DecodeError>;

    /// Route a complete incoming message to its handler
    fn dispatch(&mut self, topic: Topic, payload: &[u8]);
}
