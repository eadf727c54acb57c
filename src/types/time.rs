//! CP56Time2a absolute time tag.
//!
//! ```text
//! | Milliseconds (D7..D0)                 |  0..59999 ms within the minute
//! | Milliseconds (D15..D8)                |
//! | IV(D7)  RES1(D6)  Minutes(D5..D0)     |  0..59
//! | SU(D7)  RES2(D6..D5)  Hours(D4..D0)   |  0..23
//! | DayOfWeek(D7..D5)  DayOfMonth(D4..D0) |  1..7, 1..31
//! | RES3(D7..D4)  Months(D3..D0)          |  1..12
//! | RES4(D7)  Year(D6..D0)                |  0..99, offset from 2000
//! ```

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{Iec104Error, Result};

/// CP56Time2a timestamp (7 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cp56Time2a {
    /// Milliseconds within the minute (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Hours (0-23)
    pub hours: u8,
    /// Day of month (1-31)
    pub day: u8,
    /// Day of week (1-7, 1=Monday, 0=unused)
    pub day_of_week: u8,
    /// Month (1-12)
    pub month: u8,
    /// Year (0-99, years since 2000)
    pub year: u8,
    /// Invalid flag
    pub invalid: bool,
    /// Summer time flag
    pub summer_time: bool,
}

/// Encoded size of a CP56Time2a value.
pub const CP56_TIME_SIZE: usize = 7;

impl Cp56Time2a {
    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Build from a UTC date-time. Years outside 2000..=2127 are clamped
    /// into the 7-bit year field.
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let milliseconds = (time.second() * 1000 + time.nanosecond() / 1_000_000).min(59_999);
        Self {
            milliseconds: milliseconds as u16,
            minutes: time.minute() as u8,
            hours: time.hour() as u8,
            day: time.day() as u8,
            day_of_week: time.weekday().number_from_monday() as u8,
            month: time.month() as u8,
            year: (time.year() - 2000).clamp(0, 127) as u8,
            invalid: false,
            summer_time: false,
        }
    }

    /// Convert to a UTC date-time.
    ///
    /// Returns `None` when the invalid flag is set or the fields do not form
    /// a calendar date.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        if self.invalid {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(2000 + self.year as i32, self.month as u32, self.day as u32)?;
        let seconds = (self.milliseconds / 1000) as u32;
        let millis = (self.milliseconds % 1000) as u32;
        let naive = date.and_hms_milli_opt(self.hours as u32, self.minutes as u32, seconds, millis)?;
        Some(Utc.from_utc_datetime(&naive))
    }

    /// Seconds within the minute.
    #[inline]
    pub const fn seconds(&self) -> u8 {
        (self.milliseconds / 1000) as u8
    }

    /// Parse from 7 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CP56_TIME_SIZE {
            return Err(Iec104Error::invalid_asdu("CP56Time2a too short"));
        }

        Ok(Self {
            milliseconds: u16::from_le_bytes([bytes[0], bytes[1]]),
            minutes: bytes[2] & 0x3F,
            invalid: (bytes[2] & 0x80) != 0,
            hours: bytes[3] & 0x1F,
            summer_time: (bytes[3] & 0x80) != 0,
            day: bytes[4] & 0x1F,
            day_of_week: (bytes[4] >> 5) & 0x07,
            month: bytes[5] & 0x0F,
            year: bytes[6] & 0x7F,
        })
    }

    /// Encode to 7 bytes.
    pub fn to_bytes(&self) -> [u8; CP56_TIME_SIZE] {
        let ms = self.milliseconds.to_le_bytes();
        [
            ms[0],
            ms[1],
            (self.minutes & 0x3F) | if self.invalid { 0x80 } else { 0 },
            (self.hours & 0x1F) | if self.summer_time { 0x80 } else { 0 },
            (self.day & 0x1F) | ((self.day_of_week & 0x07) << 5),
            self.month & 0x0F,
            self.year & 0x7F,
        ]
    }
}

impl std::fmt::Display for Cp56Time2a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03} {:02}/{:02}/{:04}",
            self.hours,
            self.minutes,
            self.seconds(),
            self.milliseconds % 1000,
            self.day,
            self.month,
            2000 + self.year as u16
        )?;
        if self.invalid {
            f.write_str(" (IV)")?;
        }
        Ok(())
    }
}
