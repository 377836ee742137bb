//! Calendar date/time conversions using O(1) algorithms
//!
//! Howard Hinnant's `civil_from_days` and `days_from_civil`, see
//! <http://howardhinnant.github.io/date_algorithms.html>. UTC only, valid for
//! 1970 through 2105 (u16 year). No leap seconds.
#![deny(unsafe_code)]
#![deny(warnings)]

const SECONDS_PER_DAY: u64 = 86_400;
/// Days from 0000-03-01 to 1970-01-01
const EPOCH_SHIFT: i32 = 719_468;
const DAYS_PER_ERA: i32 = 146_097;

/// Broken-down UTC time
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct CivilDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    /// 0 = Monday .. 6 = Sunday
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl CivilDateTime {
    pub fn from_unix(unix_secs: u64) -> Self {
        let days = (unix_secs / SECONDS_PER_DAY) as i32;
        let secs_today = unix_secs % SECONDS_PER_DAY;
        let (year, month, day) = civil_from_days(days);

        Self {
            year,
            month,
            day,
            weekday: weekday_from_days(days),
            hour: (secs_today / 3600) as u8,
            minute: ((secs_today % 3600) / 60) as u8,
            second: (secs_today % 60) as u8,
        }
    }

    pub fn to_unix(&self) -> u64 {
        let days = days_from_civil(self.year, self.month, self.day).max(0) as u64;
        days * SECONDS_PER_DAY
            + self.hour as u64 * 3600
            + self.minute as u64 * 60
            + self.second as u64
    }
}

/// 1970-01-01 was a Thursday
fn weekday_from_days(days_since_epoch: i32) -> u8 {
    (days_since_epoch + 3).rem_euclid(7) as u8
}

fn civil_from_days(days_since_epoch: i32) -> (u16, u8, u8) {
    // Year starts on March 1 so the leap day falls at its end
    let z = days_since_epoch + EPOCH_SHIFT;
    let era = z.div_euclid(DAYS_PER_ERA);
    let doe = (z - era * DAYS_PER_ERA) as u32; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365; // [0, 399]
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // March = 0
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = yoe as i32 + era * 400 + i32::from(month <= 2);

    (year as u16, month, day)
}

fn days_from_civil(year: u16, month: u8, day: u8) -> i32 {
    let (y, m) = if month <= 2 {
        (year as i32 - 1, month as u32 + 9)
    } else {
        (year as i32, month as u32 - 3)
    };
    let era = y.div_euclid(400);
    let yoe = (y - era * 400) as u32;
    let doy = (153 * m + 2) / 5 + day as u32 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;

    era * DAYS_PER_ERA + doe as i32 - EPOCH_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch() {
        let dt = CivilDateTime::from_unix(0);
        assert_eq!((dt.year, dt.month, dt.day), (1970, 1, 1));
        assert_eq!((dt.hour, dt.minute, dt.second), (0, 0, 0));
        assert_eq!(dt.weekday, 3); // Thursday
    }

    #[test]
    fn test_known_dates() {
        // 2024-02-29 12:34:56, a Thursday
        let dt = CivilDateTime::from_unix(1_709_210_096);
        assert_eq!((dt.year, dt.month, dt.day), (2024, 2, 29));
        assert_eq!((dt.hour, dt.minute, dt.second), (12, 34, 56));
        assert_eq!(dt.weekday, 3);

        // 2000-01-01, a Saturday
        let dt = CivilDateTime::from_unix(946_684_800);
        assert_eq!((dt.year, dt.month, dt.day), (2000, 1, 1));
        assert_eq!(dt.weekday, 5);
    }

    #[test]
    fn test_century_boundaries() {
        for unix_secs in [946_684_799u64, 2_147_483_647, 4_102_444_800] {
            assert_eq!(CivilDateTime::from_unix(unix_secs).to_unix(), unix_secs);
        }
        // 2100 is not a leap year: Feb 28 is followed by Mar 1
        let dt = CivilDateTime::from_unix(4_107_542_400);
        assert_eq!((dt.year, dt.month, dt.day), (2100, 3, 1));
    }
}
