//! One-shot time and weather requests
//!
//! At most one request of each kind is outstanding. Every issued request ends
//! exactly once: with a response, a transport error, or a timeout once
//! `max_timeout` has passed. Losing the link cancels outstanding requests
//! silently. The fetcher never retries; the scheduler decides when to ask
//! again.

use hal_abstractions::HttpTransport;
use heapless::Vec;

use crate::error::{kind_name, SyncError};
use crate::time::{Duration, Instant};

/// What a request fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FetchKind {
    Time,
    Weather,
}

impl FetchKind {
    pub const ALL: [FetchKind; 2] = [FetchKind::Time, FetchKind::Weather];

    const fn slot(self) -> usize {
        match self {
            FetchKind::Time => 0,
            FetchKind::Weather => 1,
        }
    }
}

/// Transport-level request failure reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FetchErrorCause {
    /// Host name did not resolve
    Dns,
    /// TCP connect failed
    Connect,
    /// Connection dropped mid-exchange
    ConnectionLost,
    /// Response could not be parsed as HTTP
    InvalidResponse,
    /// Body larger than the receive buffer
    BodyTooLarge,
}

/// Terminal failure of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FetchFailure {
    /// No response before the deadline
    Timeout,
    /// Server answered with a non-2xx status
    HttpStatus(u16),
    /// Platform reported a transport error
    Transport(FetchErrorCause),
    /// Body rejected by its decoder
    Undecodable,
}

impl From<FetchFailure> for SyncError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Timeout => SyncError::Timeout,
            _ => SyncError::Transport,
        }
    }
}

/// One outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFetch {
    pub kind: FetchKind,
    pub issued_at: Instant,
    pub timeout_at: Instant,
    pub token: u32,
}

/// Request slots and their deadlines
#[derive(Debug)]
pub struct RequestFetcher {
    slots: [Option<PendingFetch>; 2],
    next_token: u32,
    timeout: Duration,
}

impl RequestFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: [None; 2],
            next_token: 1,
            timeout,
        }
    }

    pub fn is_pending(&self, kind: FetchKind) -> bool {
        self.slots[kind.slot()].is_some()
    }

    /// Start a request for `url`
    ///
    /// Fails fast with `LinkDown` or `AlreadyPending`; nothing is queued.
    pub fn issue<H: HttpTransport>(
        &mut self,
        http: &mut H,
        kind: FetchKind,
        url: &str,
        link_up: bool,
        now: Instant,
    ) -> Result<u32, SyncError> {
        if !link_up {
            return Err(SyncError::LinkDown);
        }
        if self.is_pending(kind) {
            return Err(SyncError::AlreadyPending);
        }

        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1).max(1);

        http.begin_get(token, url).map_err(|e| {
            log_warn!("{:?} request refused: {}", kind, kind_name(&e));
            SyncError::Transport
        })?;

        log_debug!("{:?} request {} issued: {}", kind, token, url);
        self.slots[kind.slot()] = Some(PendingFetch {
            kind,
            issued_at: now,
            timeout_at: now + self.timeout,
            token,
        });
        Ok(token)
    }

    /// Response arrived for `token`
    ///
    /// `None` for a response nobody is waiting for (late or cancelled).
    /// Otherwise the slot is freed and non-2xx statuses become failures.
    pub fn on_complete(
        &mut self,
        kind: FetchKind,
        token: u32,
        status: u16,
    ) -> Option<Result<(), FetchFailure>> {
        self.take(kind, token)?;
        if (200..300).contains(&status) {
            Some(Ok(()))
        } else {
            log_warn!("{:?} request failed with HTTP {}", kind, status);
            Some(Err(FetchFailure::HttpStatus(status)))
        }
    }

    /// Transport error for `token`; `None` if nobody is waiting for it
    pub fn on_error(
        &mut self,
        kind: FetchKind,
        token: u32,
        cause: FetchErrorCause,
    ) -> Option<FetchFailure> {
        self.take(kind, token)?;
        log_warn!("{:?} request failed: {:?}", kind, cause);
        Some(FetchFailure::Transport(cause))
    }

    /// Expire requests whose deadline has passed
    ///
    /// Returns the kinds that timed out; their slots are free again.
    pub fn poll_timeouts<H: HttpTransport>(
        &mut self,
        http: &mut H,
        now: Instant,
    ) -> Vec<FetchKind, 2> {
        let mut expired = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(pending) = *slot {
                if now >= pending.timeout_at {
                    log_warn!("{:?} request {} timed out", pending.kind, pending.token);
                    http.abort(pending.token);
                    *slot = None;
                    let _ = expired.push(pending.kind);
                }
            }
        }
        expired
    }

    /// Drop every outstanding request without reporting it
    pub fn cancel_all<H: HttpTransport>(&mut self, http: &mut H) {
        for slot in self.slots.iter_mut() {
            if let Some(pending) = slot.take() {
                log_debug!("{:?} request {} cancelled", pending.kind, pending.token);
                http.abort(pending.token);
            }
        }
    }

    fn take(&mut self, kind: FetchKind, token: u32) -> Option<PendingFetch> {
        let slot = &mut self.slots[kind.slot()];
        if matches!(slot, Some(pending) if pending.token == token) {
            return slot.take();
        }
        log_debug!("Ignoring stale {:?} response {}", kind, token);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::at_secs;
    use hal_abstractions::mock::MockHttp;

    const TIME_URL: &str = "http://worldtimeapi.org/api/ip";

    fn fetcher() -> RequestFetcher {
        RequestFetcher::new(Duration::millis(10_000))
    }

    #[test]
    fn test_issue_requires_link() {
        let mut f = fetcher();
        let mut http = MockHttp::default();
        assert_eq!(
            f.issue(&mut http, FetchKind::Time, TIME_URL, false, at_secs(0)),
            Err(SyncError::LinkDown)
        );
        assert!(http.requests.is_empty());
        assert!(!f.is_pending(FetchKind::Time));
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let mut f = fetcher();
        let mut http = MockHttp::default();
        f.issue(&mut http, FetchKind::Time, TIME_URL, true, at_secs(0))
            .unwrap();
        assert_eq!(
            f.issue(&mut http, FetchKind::Time, TIME_URL, true, at_secs(1)),
            Err(SyncError::AlreadyPending)
        );
        // The other kind has its own slot
        assert!(f
            .issue(&mut http, FetchKind::Weather, "http://w", true, at_secs(1))
            .is_ok());
        assert_eq!(http.requests.len(), 2);
    }

    #[test]
    fn test_complete_exactly_once() {
        let mut f = fetcher();
        let mut http = MockHttp::default();
        let token = f
            .issue(&mut http, FetchKind::Time, TIME_URL, true, at_secs(0))
            .unwrap();

        assert_eq!(f.on_complete(FetchKind::Time, token, 200), Some(Ok(())));
        assert_eq!(f.on_complete(FetchKind::Time, token, 200), None);
        assert!(!f.is_pending(FetchKind::Time));
    }

    #[test]
    fn test_http_error_status_is_failure() {
        let mut f = fetcher();
        let mut http = MockHttp::default();
        let token = f
            .issue(&mut http, FetchKind::Weather, "http://w", true, at_secs(0))
            .unwrap();
        assert_eq!(
            f.on_complete(FetchKind::Weather, token, 503),
            Some(Err(FetchFailure::HttpStatus(503)))
        );
    }

    #[test]
    fn test_timeout_frees_slot() {
        let mut f = fetcher();
        let mut http = MockHttp::default();
        let token = f
            .issue(&mut http, FetchKind::Time, TIME_URL, true, at_secs(0))
            .unwrap();

        assert!(f.poll_timeouts(&mut http, at_secs(9)).is_empty());
        let expired = f.poll_timeouts(&mut http, at_secs(10));
        assert_eq!(expired.as_slice(), &[FetchKind::Time]);
        assert_eq!(http.aborted.as_slice(), &[token]);

        // Late response is dropped
        assert_eq!(f.on_complete(FetchKind::Time, token, 200), None);
        assert!(f
            .issue(&mut http, FetchKind::Time, TIME_URL, true, at_secs(11))
            .is_ok());
    }

    #[test]
    fn test_cancel_all_is_silent() {
        let mut f = fetcher();
        let mut http = MockHttp::default();
        let t1 = f
            .issue(&mut http, FetchKind::Time, TIME_URL, true, at_secs(0))
            .unwrap();
        f.issue(&mut http, FetchKind::Weather, "http://w", true, at_secs(0))
            .unwrap();

        f.cancel_all(&mut http);
        assert!(!f.is_pending(FetchKind::Time));
        assert!(!f.is_pending(FetchKind::Weather));
        assert_eq!(http.aborted.len(), 2);
        assert_eq!(f.on_error(FetchKind::Time, t1, FetchErrorCause::Connect), None);
        assert!(f.poll_timeouts(&mut http, at_secs(60)).is_empty());
    }

    #[test]
    fn test_transport_refusal_leaves_slot_free() {
        let mut f = fetcher();
        let mut http = MockHttp {
            fail_next: true,
            ..Default::default()
        };
        assert_eq!(
            f.issue(&mut http, FetchKind::Time, TIME_URL, true, at_secs(0)),
            Err(SyncError::Transport)
        );
        assert!(!f.is_pending(FetchKind::Time));
    }
}
