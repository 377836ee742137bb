//! Engine time base
//!
//! Millisecond `fugit` types, the same arithmetic the RTIC monotonic exposes.
//! The platform converts its monotonic ticks with [`Instant::from_ticks`].

/// Point on the monotonic millisecond timeline
pub type Instant = fugit::TimerInstantU64<1_000>;

/// Span on the monotonic millisecond timeline
pub type Duration = fugit::TimerDurationU64<1_000>;

/// Time elapsed from `since` to `now`, zero if `now` is earlier
pub fn elapsed(now: Instant, since: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}

/// `base` scaled by `factor`, saturating instead of overflowing
pub fn scaled(base: Duration, factor: u32) -> Duration {
    Duration::from_ticks(base.ticks().saturating_mul(factor as u64))
}

/// Instant `secs` seconds after the timeline origin
pub const fn at_secs(secs: u64) -> Instant {
    Instant::from_ticks(secs * 1_000)
}
