//! Multi-chunk bus message reassembly
//!
//! The transport may deliver one publish as several chunks, each carrying its
//! byte offset and the message's total length. Chunks for a topic arrive in
//! order, so a buffer only ever needs the next expected offset:
//!
//! ```text
//! (T, off=0, len=5, total=12) -> open buffer, 5/12     -> Incomplete
//! (T, off=5, len=7, total=12) -> append, 12/12         -> Complete(12 bytes)
//! (T, off=0, ...) then (T, off=6, ...)                 -> Rejected, buffer dropped
//! ```
//!
//! At most one message per topic is in flight. Partial data is never
//! forwarded: a rejected message is discarded whole.

use heapless::{String, Vec};

/// Largest reassembled message in bytes
pub const MAX_MESSAGE_LEN: usize = 1024;
/// Topics that may have a partial message open at the same time
pub const REASSEMBLY_SLOTS: usize = 4;
/// Longest topic name tracked
pub const MAX_TOPIC_LEN: usize = 64;

/// Why a chunk was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectReason {
    /// Chunk offset differs from the bytes received so far
    OffsetMismatch { expected: usize, got: usize },
    /// Continuation chunk with no message open for its topic
    NoOpenMessage,
    /// Chunk disagrees with the total length announced at offset 0
    TotalMismatch,
    /// Declared chunk length differs from the payload length
    LengthMismatch,
    /// Message or topic larger than the reassembly buffer
    TooLarge,
    /// Every slot is holding another topic's partial message
    NoFreeSlot,
}

/// A fully reassembled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMessage {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_MESSAGE_LEN>,
}

/// Result of feeding one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    Complete(CompleteMessage),
    Incomplete,
    Rejected(RejectReason),
}

#[derive(Debug)]
struct ReassemblyBuffer {
    topic: String<MAX_TOPIC_LEN>,
    data: Vec<u8, MAX_MESSAGE_LEN>,
    expected_total: usize,
}

impl ReassemblyBuffer {
    fn bytes_so_far(&self) -> usize {
        self.data.len()
    }
}

/// Per-topic reassembly buffers
#[derive(Debug, Default)]
pub struct Reassembler {
    buffers: Vec<ReassemblyBuffer, REASSEMBLY_SLOTS>,
}

impl Reassembler {
    pub const fn new() -> Self {
        Self {
            buffers: Vec::new(),
        }
    }

    /// Feed one chunk of a message published on `topic`
    pub fn ingest(
        &mut self,
        topic: &str,
        payload: &[u8],
        offset: usize,
        chunk_len: usize,
        total_len: usize,
    ) -> Ingest {
        if chunk_len != payload.len() {
            self.discard(topic);
            return Ingest::Rejected(RejectReason::LengthMismatch);
        }

        match self.position(topic) {
            Some(index) => self.continue_message(index, payload, offset, total_len),
            None => self.start_message(topic, payload, offset, total_len),
        }
    }

    /// Number of topics with a partial message open
    pub fn open_count(&self) -> usize {
        self.buffers.len()
    }

    /// Whether `topic` has a partial message open
    pub fn is_open(&self, topic: &str) -> bool {
        self.position(topic).is_some()
    }

    /// Drop every partial message (session lost)
    pub fn evict_all(&mut self) {
        if !self.buffers.is_empty() {
            log_debug!("Evicting {} partial messages", self.buffers.len());
        }
        self.buffers.clear();
    }

    fn position(&self, topic: &str) -> Option<usize> {
        self.buffers.iter().position(|b| b.topic.as_str() == topic)
    }

    fn discard(&mut self, topic: &str) {
        if let Some(index) = self.position(topic) {
            self.buffers.swap_remove(index);
        }
    }

    fn start_message(&mut self, topic: &str, payload: &[u8], offset: usize, total_len: usize) -> Ingest {
        if offset != 0 {
            return Ingest::Rejected(RejectReason::NoOpenMessage);
        }
        if total_len > MAX_MESSAGE_LEN || topic.len() > MAX_TOPIC_LEN {
            return Ingest::Rejected(RejectReason::TooLarge);
        }
        if payload.len() > total_len {
            return Ingest::Rejected(RejectReason::TotalMismatch);
        }

        let mut data = Vec::new();
        // Fits: payload.len() <= total_len <= MAX_MESSAGE_LEN
        let _ = data.extend_from_slice(payload);

        // Single-chunk message needs no buffer slot
        if payload.len() == total_len {
            return Ingest::Complete(CompleteMessage {
                topic: crate::config::bounded(topic).unwrap_or_default(),
                payload: data,
            });
        }

        let buffer = ReassemblyBuffer {
            topic: crate::config::bounded(topic).unwrap_or_default(),
            data,
            expected_total: total_len,
        };
        match self.buffers.push(buffer) {
            Ok(()) => Ingest::Incomplete,
            Err(_) => Ingest::Rejected(RejectReason::NoFreeSlot),
        }
    }

    fn continue_message(
        &mut self,
        index: usize,
        payload: &[u8],
        offset: usize,
        total_len: usize,
    ) -> Ingest {
        let buffer = &mut self.buffers[index];

        let reason = if offset != buffer.bytes_so_far() {
            Some(RejectReason::OffsetMismatch {
                expected: buffer.bytes_so_far(),
                got: offset,
            })
        } else if total_len != buffer.expected_total
            || buffer.bytes_so_far() + payload.len() > buffer.expected_total
        {
            Some(RejectReason::TotalMismatch)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.buffers.swap_remove(index);
            return Ingest::Rejected(reason);
        }

        // Fits: bytes_so_far + payload.len() <= expected_total <= MAX_MESSAGE_LEN
        let _ = buffer.data.extend_from_slice(payload);
        if buffer.bytes_so_far() < buffer.expected_total {
            return Ingest::Incomplete;
        }

        let buffer = self.buffers.swap_remove(index);
        Ingest::Complete(CompleteMessage {
            topic: buffer.topic,
            payload: buffer.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8; 12] = b"hello, world";

    #[test]
    fn test_two_chunks_complete() {
        let mut r = Reassembler::new();
        assert_eq!(r.ingest("T", &MESSAGE[..5], 0, 5, 12), Ingest::Incomplete);
        assert!(r.is_open("T"));

        match r.ingest("T", &MESSAGE[5..], 5, 7, 12) {
            Ingest::Complete(msg) => {
                assert_eq!(msg.topic.as_str(), "T");
                assert_eq!(msg.payload.as_slice(), MESSAGE);
            }
            other => panic!("expected complete message, got {:?}", other),
        }
        assert_eq!(r.open_count(), 0);
    }

    #[test]
    fn test_offset_mismatch_drops_message() {
        let mut r = Reassembler::new();
        assert_eq!(r.ingest("T", &MESSAGE[..5], 0, 5, 12), Ingest::Incomplete);
        assert_eq!(
            r.ingest("T", &MESSAGE[6..], 6, 6, 12),
            Ingest::Rejected(RejectReason::OffsetMismatch {
                expected: 5,
                got: 6
            })
        );
        assert!(!r.is_open("T"));

        // Continuations of the dropped message cannot complete anything
        assert_eq!(
            r.ingest("T", &MESSAGE[5..], 5, 7, 12),
            Ingest::Rejected(RejectReason::NoOpenMessage)
        );

        // A fresh offset-0 chunk restarts reassembly
        assert_eq!(r.ingest("T", &MESSAGE[..5], 0, 5, 12), Ingest::Incomplete);
        assert!(matches!(
            r.ingest("T", &MESSAGE[5..], 5, 7, 12),
            Ingest::Complete(_)
        ));
    }

    #[test]
    fn test_restart_while_open_is_rejected() {
        let mut r = Reassembler::new();
        r.ingest("T", &MESSAGE[..5], 0, 5, 12);
        assert_eq!(
            r.ingest("T", &MESSAGE[..5], 0, 5, 12),
            Ingest::Rejected(RejectReason::OffsetMismatch {
                expected: 5,
                got: 0
            })
        );
        assert_eq!(r.open_count(), 0);
    }

    #[test]
    fn test_single_chunk_uses_no_slot() {
        let mut r = Reassembler::new();
        match r.ingest("server/status", b"online", 0, 6, 6) {
            Ingest::Complete(msg) => assert_eq!(msg.payload.as_slice(), b"online"),
            other => panic!("expected complete message, got {:?}", other),
        }
        assert_eq!(r.open_count(), 0);
    }

    #[test]
    fn test_topics_are_independent() {
        let mut r = Reassembler::new();
        r.ingest("A", b"abc", 0, 3, 6);
        r.ingest("B", b"xy", 0, 2, 4);
        assert!(matches!(r.ingest("B", b"zw", 2, 2, 4), Ingest::Complete(_)));
        assert!(matches!(r.ingest("A", b"def", 3, 3, 6), Ingest::Complete(_)));
    }

    #[test]
    fn test_rejects_bad_lengths() {
        let mut r = Reassembler::new();
        assert_eq!(
            r.ingest("T", b"abc", 0, 4, 10),
            Ingest::Rejected(RejectReason::LengthMismatch)
        );
        assert_eq!(
            r.ingest("T", b"abc", 0, 3, MAX_MESSAGE_LEN + 1),
            Ingest::Rejected(RejectReason::TooLarge)
        );

        r.ingest("T", b"abc", 0, 3, 5);
        assert_eq!(
            r.ingest("T", b"def", 3, 3, 5),
            Ingest::Rejected(RejectReason::TotalMismatch)
        );
        assert!(!r.is_open("T"));
    }

    #[test]
    fn test_slot_exhaustion_and_eviction() {
        let mut r = Reassembler::new();
        for topic in ["a", "b", "c", "d"] {
            assert_eq!(r.ingest(topic, b"x", 0, 1, 2), Ingest::Incomplete);
        }
        assert_eq!(
            r.ingest("e", b"x", 0, 1, 2),
            Ingest::Rejected(RejectReason::NoFreeSlot)
        );

        r.evict_all();
        assert_eq!(r.open_count(), 0);
        assert_eq!(
            r.ingest("a", b"y", 1, 1, 2),
            Ingest::Rejected(RejectReason::NoOpenMessage)
        );
    }
}
