#![deny(unsafe_code)]
#![deny(warnings)]
//! RTC wrapper and wall-clock time
//!
//! The internal RTC (LSE, 1-second resolution) keeps wall-clock time between
//! syncs. Time read back is only meaningful once a sync has written it.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;
use defmt::{info, Format};
use embassy_stm32::rtc::{DateTime, DayOfWeek, Rtc};

use super::calendar::CivilDateTime;

/// Set once the RTC holds synced wall-clock time
static TIME_SYNCED: AtomicBool = AtomicBool::new(false);

/// Global internal RTC instance
static RTC: Mutex<RefCell<Option<Rtc>>> = Mutex::new(RefCell::new(None));

/// RTC operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum RtcError {
    /// RTC not initialized or time never synced
    NotInitialized,
    /// Timestamp outside the calendar range the RTC accepts
    OutOfRange,
    /// RTC hardware error
    HardwareError,
}

/// Install the RTC; called once from `init`
pub fn initialize_rtc(rtc: Rtc) {
    critical_section::with(|cs| {
        RTC.borrow(cs).replace(Some(rtc));
    });
    info!("Internal RTC initialized");
}

/// Whether the RTC holds synced wall-clock time
pub fn is_time_synced() -> bool {
    TIME_SYNCED.load(Ordering::Acquire)
}

fn day_of_week(weekday: u8) -> DayOfWeek {
    match weekday {
        0 => DayOfWeek::Monday,
        1 => DayOfWeek::Tuesday,
        2 => DayOfWeek::Wednesday,
        3 => DayOfWeek::Thursday,
        4 => DayOfWeek::Friday,
        5 => DayOfWeek::Saturday,
        _ => DayOfWeek::Sunday,
    }
}

/// Write Unix time to the RTC; marks time synced on success
pub fn set_unix_time(unix_secs: u64) -> Result<(), RtcError> {
    let civil = CivilDateTime::from_unix(unix_secs);
    let datetime = DateTime::from(
        civil.year,
        civil.month,
        civil.day,
        day_of_week(civil.weekday),
        civil.hour,
        civil.minute,
        civil.second,
        0,
    )
    .map_err(|_| RtcError::OutOfRange)?;

    critical_section::with(|cs| {
        let mut rtc = RTC.borrow(cs).borrow_mut();
        let rtc = rtc.as_mut().ok_or(RtcError::NotInitialized)?;
        rtc.set_datetime(datetime)
            .map_err(|_| RtcError::HardwareError)?;
        TIME_SYNCED.store(true, Ordering::Release);
        Ok(())
    })
}

/// Current Unix time from the RTC
pub fn unix_time() -> Result<u64, RtcError> {
    if !is_time_synced() {
        return Err(RtcError::NotInitialized);
    }

    critical_section::with(|cs| {
        let mut rtc = RTC.borrow(cs).borrow_mut();
        let rtc = rtc.as_mut().ok_or(RtcError::NotInitialized)?;
        let now = rtc.now().map_err(|_| RtcError::HardwareError)?;
        Ok(CivilDateTime {
            year: now.year(),
            month: now.month(),
            day: now.day(),
            weekday: 0,
            hour: now.hour(),
            minute: now.minute(),
            second: now.second(),
        }
        .to_unix())
    })
}
