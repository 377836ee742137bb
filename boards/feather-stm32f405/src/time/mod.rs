#![deny(unsafe_code)]
#![deny(warnings)]
//! Wall-clock time on the hardware RTC
//!
//! The engine's clock sync fetches the worldtimeapi document; its decoder
//! writes the `unixtime` field here. Between syncs the RTC keeps counting
//! from the LSE (±20-50ppm).

mod calendar;
mod rtc;

pub use calendar::CivilDateTime;
pub use rtc::{is_time_synced, set_unix_time, unix_time};

/// Initialize the RTC with the LSE clock configured in `init`
pub fn init_time_system(rtc_peripheral: embassy_stm32::Peri<'static, embassy_stm32::peripherals::RTC>) {
    use embassy_stm32::rtc::{Rtc, RtcConfig};

    let rtc = Rtc::new(rtc_peripheral, RtcConfig::default());
    rtc::initialize_rtc(rtc);
}
