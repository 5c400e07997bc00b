//! Local civil calendar: hour, weekday, weekend and public holidays.
//!
//! All timestamps are UTC internally; calendar fields are derived in the
//! configured IANA timezone so that e.g. the evening peak stays at local
//! hour 18 across DST switches.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Which public-holiday set to flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolidayCalendar {
    /// Nationwide German public holidays.
    #[serde(alias = "de")]
    Germany,
    /// No holidays flagged.
    None,
}

impl HolidayCalendar {
    /// Holiday dates falling in `year`.
    pub fn holidays(&self, year: i32) -> BTreeSet<NaiveDate> {
        match self {
            HolidayCalendar::None => BTreeSet::new(),
            HolidayCalendar::Germany => german_holidays(year),
        }
    }
}

/// Western (Gregorian) Easter Sunday, anonymous Gregorian algorithm.
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

fn german_holidays(year: i32) -> BTreeSet<NaiveDate> {
    let mut out = BTreeSet::new();
    let fixed = [(1, 1), (5, 1), (10, 3), (12, 25), (12, 26)];
    out.extend(
        fixed
            .iter()
            .filter_map(|&(m, d)| NaiveDate::from_ymd_opt(year, m, d)),
    );
    if let Some(easter) = easter_sunday(year) {
        // Good Friday, Easter Monday, Ascension, Whit Monday
        for offset in [-2, 1, 39, 50] {
            out.insert(easter + Duration::days(offset));
        }
    }
    // 500th anniversary of the Reformation was a one-off nationwide holiday.
    if year == 2017 {
        out.extend(NaiveDate::from_ymd_opt(2017, 10, 31));
    }
    out
}

/// Calendar fields for one hourly timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFields {
    /// Local hour 0..=23.
    pub hour: u32,
    /// Local weekday, 0 = Monday .. 6 = Sunday.
    pub dow: u32,
    pub is_weekend: bool,
    pub is_holiday: bool,
}

impl CalendarFields {
    /// Numeric encoding in model-input order.
    pub fn as_features(&self) -> [f64; 4] {
        [
            f64::from(self.hour),
            f64::from(self.dow),
            f64::from(u8::from(self.is_weekend)),
            f64::from(u8::from(self.is_holiday)),
        ]
    }
}

/// Jurisdiction whose civil calendar drives the calendar features.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarContext {
    pub tz: Tz,
    pub holidays: HolidayCalendar,
}

impl CalendarContext {
    pub fn new(tz: Tz, holidays: HolidayCalendar) -> Self {
        Self { tz, holidays }
    }

    pub fn germany() -> Self {
        Self::new(chrono_tz::Europe::Berlin, HolidayCalendar::Germany)
    }

    /// Parse an IANA timezone name.
    pub fn from_tz_name(tz: &str, holidays: HolidayCalendar) -> Result<Self, String> {
        let tz: Tz = tz.parse().map_err(|e| format!("unknown timezone '{tz}': {e}"))?;
        Ok(Self::new(tz, holidays))
    }

    /// A cache-backed annotator for bulk use.
    pub fn annotator(&self) -> CalendarAnnotator<'_> {
        CalendarAnnotator {
            ctx: self,
            years: HashMap::new(),
        }
    }

    /// One-off calendar fields; recomputes the holiday set.
    pub fn fields(&self, ts: DateTime<Utc>) -> CalendarFields {
        self.annotator().annotate(ts)
    }
}

/// Computes calendar fields, building each year's holiday set once.
pub struct CalendarAnnotator<'a> {
    ctx: &'a CalendarContext,
    years: HashMap<i32, BTreeSet<NaiveDate>>,
}

impl CalendarAnnotator<'_> {
    pub fn annotate(&mut self, ts: DateTime<Utc>) -> CalendarFields {
        let local = ts.with_timezone(&self.ctx.tz);
        let date = local.date_naive();
        let dow = local.weekday().num_days_from_monday();
        let holidays = self.ctx.holidays;
        let is_holiday = self
            .years
            .entry(date.year())
            .or_insert_with(|| holidays.holidays(date.year()))
            .contains(&date);
        CalendarFields {
            hour: local.hour(),
            dow,
            is_weekend: dow >= 5,
            is_holiday,
        }
    }

    /// Distinct years whose holiday set has been computed.
    pub fn cached_years(&self) -> usize {
        self.years.len()
    }
}
