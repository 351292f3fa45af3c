//! Date normalization for scraped publication dates.
//!
//! Sources publish dates in many shapes: Dutch long-form dates with a time
//! (`27 juni 2025 - 17:00`), ISO 8601 timestamps with or without offset and
//! fractional seconds, and a zoo of numeric and English month-name layouts.
//! [`DateNormalizer`] tries them in a fixed order and falls back to the
//! current time when nothing matches, so a single bad date never aborts a run.
//!
//! # Ambiguous numeric dates
//!
//! `03/04/2025` parses as 4 March with the default layout order because
//! `%m/%d/%Y` is tried before `%d/%m/%Y`. Nothing here tries to guess which
//! one the source meant. Sites that publish day-first numeric dates must
//! declare their own `formats` order in the site configuration.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

/// Layouts tried after the locale pattern and ISO 8601, in order.
pub const DEFAULT_FORMATS: &[&str] = &[
    "%d-%b-%Y",
    "%Y-%m-%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%Y.%m.%d",
    "%B %d, %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%d %b %Y",
];

static LOCALIZED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2})\s+(\p{L}+)\.?\s+(\d{4})(?:\s*-?\s*(\d{1,2}):(\d{2}))?")
        .expect("valid localized date regex")
});

static ISO_OFFSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:[Zz]|[+-]\d{2}:?\d{2})$").expect("valid offset regex"));

/// Month-name tables for sources that spell months out in their own language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthLocale {
    /// Dutch month names (`januari` .. `december`) and their abbreviations.
    Nl,
}

impl MonthLocale {
    /// Look up a month name, case-insensitively. Unknown names yield `None`.
    pub fn month_number(self, name: &str) -> Option<u32> {
        let name = name.to_lowercase();
        let month = match self {
            MonthLocale::Nl => match name.as_str() {
                "januari" | "jan" => 1,
                "februari" | "feb" => 2,
                "maart" | "mrt" => 3,
                "april" | "apr" => 4,
                "mei" => 5,
                "juni" | "jun" => 6,
                "juli" | "jul" => 7,
                "augustus" | "aug" => 8,
                "september" | "sep" | "sept" => 9,
                "oktober" | "okt" => 10,
                "november" | "nov" => 11,
                "december" | "dec" => 12,
                _ => return None,
            },
        };
        Some(month)
    }
}

/// Parse `27 juni 2025 - 17:00` style dates with an explicit month table.
///
/// The pattern is searched anywhere in the input, so surrounding text such as
/// `Gepubliceerd op 27 juni 2025 - 17:00` is fine. The time part is optional.
pub fn parse_localized(raw: &str, locale: MonthLocale) -> Option<NaiveDateTime> {
    let caps = LOCALIZED_DATE.captures(raw)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month = locale.month_number(caps.get(2)?.as_str())?;
    let year: i32 = caps.get(3)?.as_str().parse().ok()?;
    let hour: u32 = caps.get(4).map_or(Some(0), |m| m.as_str().parse().ok())?;
    let minute: u32 = caps.get(5).map_or(Some(0), |m| m.as_str().parse().ok())?;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
}

/// Shorthand for [`parse_localized`] with the Dutch table.
pub fn parse_nl_datetime(raw: &str) -> Option<NaiveDateTime> {
    parse_localized(raw, MonthLocale::Nl)
}

/// Parse an ISO 8601 timestamp, dropping any `Z`/offset suffix and
/// sub-second precision. The wall-clock reading is kept as-is.
pub fn parse_iso8601(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if !raw.contains('T') {
        return None;
    }
    let stripped = ISO_OFFSET.replace(raw, "");
    let seconds = stripped.split('.').next()?;

    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(seconds, fmt).ok())
}

/// Try each `strftime` layout in order; date-only layouts yield midnight.
pub fn parse_with_formats<S: AsRef<str>>(raw: &str, formats: &[S]) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    formats.iter().find_map(|fmt| {
        let fmt = fmt.as_ref();
        NaiveDateTime::parse_from_str(raw, fmt).ok().or_else(|| {
            NaiveDate::parse_from_str(raw, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
    })
}

/// Parse a UTC offset written as `+0100`, `+01:00`, `-0500`, `Z` or `UTC`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits = rest.replace(':', "");
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Render a timestamp the way RSS `pubDate` expects (RFC 822 with numeric offset).
pub fn rfc822(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}

/// Turns raw date strings from one site into timestamps in that site's offset.
#[derive(Debug, Clone)]
pub struct DateNormalizer {
    locale: Option<MonthLocale>,
    formats: Vec<String>,
    offset: FixedOffset,
}

impl DateNormalizer {
    /// `formats` replaces [`DEFAULT_FORMATS`] when given.
    pub fn new(
        locale: Option<MonthLocale>,
        formats: Option<&[String]>,
        offset: FixedOffset,
    ) -> Self {
        let formats = match formats {
            Some(f) => f.to_vec(),
            None => DEFAULT_FORMATS.iter().map(|f| f.to_string()).collect(),
        };
        Self {
            locale,
            formats,
            offset,
        }
    }

    /// Current wall-clock time in the site's offset, truncated to seconds.
    pub fn now(&self) -> DateTime<FixedOffset> {
        let now = Utc::now().with_timezone(&self.offset);
        now.with_nanosecond(0).unwrap_or(now)
    }

    /// First format that parses wins, in order: locale pattern, ISO 8601,
    /// then the configured layouts.
    pub fn try_parse(&self, raw: &str) -> Option<DateTime<FixedOffset>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        self.locale
            .and_then(|locale| parse_localized(raw, locale))
            .or_else(|| parse_iso8601(raw))
            .or_else(|| parse_with_formats(raw, &self.formats))
            .map(|naive| self.localize(naive))
    }

    /// Like [`try_parse`](Self::try_parse) but never fails: unparseable input
    /// is logged and replaced with [`now`](Self::now).
    pub fn parse(&self, raw: &str) -> DateTime<FixedOffset> {
        match self.try_parse(raw) {
            Some(ts) => ts,
            None => {
                warn!(raw, "Could not parse date; using current time");
                self.now()
            }
        }
    }

    fn localize(&self, naive: NaiveDateTime) -> DateTime<FixedOffset> {
        self.offset
            .from_local_datetime(&naive)
            .earliest()
            .unwrap_or_else(|| self.now())
    }
}
