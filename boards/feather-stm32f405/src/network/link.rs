#![deny(unsafe_code)]
#![deny(warnings)]
//! Link watcher
//!
//! Translates DHCP configuration changes into engine link events. The wired
//! link has no association step, so a join request only re-reports the
//! current address and a leave request has nothing to undo.

use clock_core::event::Event;
use clock_core::link::{DownReason, IpInfo};
use defmt::{debug, info};
use embassy_futures::select::{select, Either};
use embassy_net::Stack;

use crate::events::{self, LinkCommand, LINK_COMMANDS};

/// Current IPv4 configuration as engine address info
fn ip_info(stack: Stack<'_>) -> Option<IpInfo> {
    let config = stack.config_v4()?;
    Some(IpInfo {
        address: config.address.address().octets(),
        gateway: config.gateway.map(|gw| gw.octets()),
    })
}

async fn report_up(stack: Stack<'_>) {
    if let Some(ip) = ip_info(stack) {
        let [a, b, c, d] = ip.address;
        info!("Link up: {}.{}.{}.{}", a, b, c, d);
        events::post(Event::LinkUp(ip)).await;
    }
}

/// Watch the stack forever
pub async fn watch(stack: Stack<'_>) -> ! {
    info!("Waiting for DHCP...");
    loop {
        let up = stack.is_config_up();
        let change = async {
            if up {
                stack.wait_config_down().await
            } else {
                stack.wait_config_up().await
            }
        };

        match select(change, LINK_COMMANDS.receive()).await {
            Either::First(()) if up => {
                info!("Link down: DHCP lease lost");
                events::post(Event::LinkDown(DownReason::Lost)).await;
            }
            Either::First(()) => report_up(stack).await,
            Either::Second(LinkCommand::Join) if up => report_up(stack).await,
            Either::Second(LinkCommand::Join) => debug!("Join requested, waiting for DHCP"),
            Either::Second(LinkCommand::Leave) => debug!("Leave requested, DHCP keeps running"),
        }
    }
}
