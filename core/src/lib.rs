//! Connectivity and synchronization engine for the desktop clock
//!
//! This crate contains the logic that keeps the clock connected and in sync.
//! It has NO hardware dependencies: radios, sockets and the broker are reached
//! through the traits in `hal-abstractions`, and everything here runs on the
//! host under `cargo test`.
//!
//! # Components
//!
//! - [`link`]: wireless station link state (`Down`/`Connecting`/`Up`)
//! - [`session`]: message bus session state machine with bounded backoff
//! - [`reassembly`]: rebuilds multi-chunk bus messages per topic
//! - [`fetch`]: one-shot time/weather requests with deadlines
//! - [`scheduler`]: the tick-driven orchestrator owning all of the above
//!
//! # Execution model
//!
//! Single-threaded and callback-driven. The platform feeds timer ticks and
//! network completions into [`scheduler::SyncScheduler`] one at a time (see
//! [`event::Event`]); no method here blocks and nothing needs a lock.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

#[macro_use]
mod logging;

pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod hooks;
pub mod link;
pub mod reassembly;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod time;
pub mod topics;

pub use error::SyncError;
pub use scheduler::SyncScheduler;
pub use status::SyncStatus;
