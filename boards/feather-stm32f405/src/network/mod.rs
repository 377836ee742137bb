#![deny(warnings)]
//! Network runners behind the engine's driver bridges
//!
//! - **`config`**: board network and engine configuration
//! - **`error`**: error enum for network operations
//! - **`http`**: HTTP/1.0 GET runner (time and weather sources)
//! - **`link`**: DHCP watcher reporting link up/down
//! - **`mqtt`**: broker session runner
//! - **`socket`**: async TCP socket wrapper for embedded-io-async
//!
//! The embassy-net `Stack` is `!Send`, so every runner lives inside the
//! network task and talks to the engine only through `crate::events`.

pub mod config;
pub mod error;
pub mod http;
pub mod link;
pub mod mqtt;
pub mod socket;

use embassy_futures::join::join3;
use embassy_net::Stack;

/// Drive the link watcher and both protocol runners forever
pub async fn run(stack: Stack<'_>) -> ! {
    let (never, _, _) = join3(link::watch(stack), mqtt::run(stack), http::run(stack)).await;
    never
}
