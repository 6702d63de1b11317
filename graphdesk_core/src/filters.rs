//! Client-side filtering helpers: date ranges (including a few natural
//! phrases), tolerant ISO datetime parsing and case-insensitive matching.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConnectorError;

/// Inclusive `[start, end]` window in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

static LAST_N_DAYS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:last|past)\s+(\d{1,3})\s+days?\b").expect("days regex"));

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// Last representable instant of the day, so `23:59:59.5` is still inside.
fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or_default())
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ConnectorError> {
        if end < start {
            return Err(ConnectorError::InvalidParams(format!(
                "date range ends ({}) before it starts ({})",
                to_graph_datetime(&end),
                to_graph_datetime(&start)
            )));
        }
        Ok(Self { start, end })
    }

    /// A whole calendar day.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: start_of_day(date),
            end: end_of_day(date),
        }
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        *at >= self.start && *at <= self.end
    }

    /// Whether a Graph datetime string falls inside the range. Unparseable
    /// values never match.
    pub fn contains_str(&self, value: &str) -> bool {
        parse_graph_datetime(value)
            .map(|at| self.contains(&at))
            .unwrap_or(false)
    }

    /// Recognises `today`, `yesterday`, `this week`, `last week`,
    /// `last|past N days` and `this month` anywhere in `text`.
    pub fn from_phrase(text: &str, now: DateTime<Utc>) -> Option<Self> {
        let text = text.to_lowercase();
        let today = now.date_naive();
        if let Some(caps) = LAST_N_DAYS.captures(&text) {
            let n: i64 = caps[1].parse().ok()?;
            let first = today - Duration::days(n.max(1) - 1);
            return Some(Self {
                start: start_of_day(first),
                end: now,
            });
        }
        let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        if text.contains("yesterday") {
            return Some(Self::day(today - Duration::days(1)));
        }
        if text.contains("today") {
            return Some(Self::day(today));
        }
        if text.contains("last week") {
            let start = monday - Duration::days(7);
            return Some(Self {
                start: start_of_day(start),
                end: end_of_day(monday - Duration::days(1)),
            });
        }
        if text.contains("this week") {
            return Some(Self {
                start: start_of_day(monday),
                end: end_of_day(monday + Duration::days(6)),
            });
        }
        if text.contains("this month") {
            let first = today.with_day(1)?;
            return Some(Self {
                start: start_of_day(first),
                end: now,
            });
        }
        None
    }

    /// Builds a range from tool arguments. `date` selects one day; otherwise
    /// `since` (date, datetime or phrase) is required and `until` defaults to
    /// `now`. A bare `until` date covers that whole day.
    pub fn from_args(
        date: Option<&str>,
        since: Option<&str>,
        until: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, ConnectorError> {
        if let Some(d) = date.map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(range) = Self::from_phrase(d, now) {
                return Ok(range);
            }
            let day = NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| {
                ConnectorError::InvalidParams(format!("'{}' is not a YYYY-MM-DD date", d))
            })?;
            return Ok(Self::day(day));
        }

        let since = since
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ConnectorError::InvalidParams("provide 'date' or 'since'".to_string())
            })?;
        let until = until.map(str::trim).filter(|s| !s.is_empty());

        if until.is_none() {
            if let Some(range) = Self::from_phrase(since, now) {
                return Ok(range);
            }
        }

        let start = parse_bound(since, false)?;
        let end = match until {
            Some(u) => parse_bound(u, true)?,
            None => now,
        };
        Self::new(start, end)
    }

    /// Graph `$filter` clause on `field` for this range.
    pub fn odata_filter(&self, field: &str) -> String {
        format!(
            "{field} ge {} and {field} le {}",
            to_graph_datetime(&self.start),
            to_graph_datetime(&self.end)
        )
    }
}

fn parse_bound(value: &str, is_end: bool) -> Result<DateTime<Utc>, ConnectorError> {
    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(if is_end {
            end_of_day(day)
        } else {
            start_of_day(day)
        });
    }
    parse_graph_datetime(value)
        .ok_or_else(|| ConnectorError::InvalidParams(format!("unrecognised date '{}'", value)))
}

/// Parses the datetime shapes Graph returns: RFC 3339 with any number of
/// fractional digits, or a naive `dateTime` (calendar events) taken as UTC.
pub fn parse_graph_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(start_of_day)
}

/// `2024-05-01T09:30:00Z`, the form Graph accepts in `$filter` and
/// `calendarView` bounds. Fractions are written to Graph's 100ns precision
/// (`23:59:59.9999999Z`).
pub fn to_graph_datetime(at: &DateTime<Utc>) -> String {
    let nanos = at.timestamp_subsec_nanos();
    if nanos == 0 {
        return at.to_rfc3339_opts(SecondsFormat::Secs, true);
    }
    format!("{}.{:07}Z", at.format("%Y-%m-%dT%H:%M:%S"), nanos / 100)
}

pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        parse_graph_datetime(s).unwrap()
    }

    #[test]
    fn parses_graph_shapes() {
        assert_eq!(
            at("2024-05-01T10:00:00.0000000Z"),
            at("2024-05-01T10:00:00Z")
        );
        assert_eq!(at("2024-05-01T10:00:00.0000000"), at("2024-05-01T10:00:00Z"));
        assert_eq!(at("2024-05-01T12:00:00+02:00"), at("2024-05-01T10:00:00Z"));
        assert!(parse_graph_datetime("not a date").is_none());
    }

    #[test]
    fn bare_until_date_covers_the_day() {
        let now = at("2024-06-01T00:00:00Z");
        let r = DateRange::from_args(None, Some("2024-05-01"), Some("2024-05-02"), now).unwrap();
        assert!(r.contains_str("2024-05-02T23:30:00Z"));
        assert!(!r.contains_str("2024-05-03T00:00:01Z"));
        assert!(r.contains_str("2024-05-01T00:00:00Z"));
    }

    #[test]
    fn phrases_resolve_relative_to_now() {
        // 2024-05-15 is a Wednesday.
        let now = at("2024-05-15T13:00:00Z");
        let y = DateRange::from_phrase("mail from yesterday", now).unwrap();
        assert_eq!(y.start, at("2024-05-14T00:00:00Z"));

        let lw = DateRange::from_phrase("last week", now).unwrap();
        assert_eq!(lw.start, at("2024-05-06T00:00:00Z"));
        assert_eq!(lw.end, at("2024-05-12T23:59:59.999999999Z"));

        let n = DateRange::from_phrase("past 3 days", now).unwrap();
        assert_eq!(n.start, at("2024-05-13T00:00:00Z"));
        assert_eq!(n.end, now);

        let m = DateRange::from_phrase("this month", now).unwrap();
        assert_eq!(m.start, at("2024-05-01T00:00:00Z"));
        assert!(DateRange::from_phrase("quarterly numbers", now).is_none());
    }

    #[test]
    fn rejects_inverted_or_missing_bounds() {
        let now = Utc::now();
        assert!(DateRange::from_args(None, Some("2024-05-03"), Some("2024-05-01"), now).is_err());
        assert!(DateRange::from_args(None, None, None, now).is_err());
    }

    #[test]
    fn whole_day_includes_its_last_second() {
        let r = DateRange::day(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!(r.contains_str("2024-05-01T23:59:59.5000000Z"));
        assert!(r.contains_str("2024-05-01T23:59:59.9999999Z"));
        assert!(!r.contains_str("2024-05-02T00:00:00Z"));
        assert_eq!(to_graph_datetime(&r.end), "2024-05-01T23:59:59.9999999Z");
        assert_eq!(to_graph_datetime(&r.start), "2024-05-01T00:00:00Z");
    }

    #[test]
    fn odata_filter_uses_utc_bounds() {
        let r = DateRange::day(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(
            r.odata_filter("receivedDateTime"),
            "receivedDateTime ge 2024-05-01T00:00:00Z and receivedDateTime le 2024-05-01T23:59:59.9999999Z"
        );
    }

    #[test]
    fn substring_match_ignores_case() {
        assert!(contains_ci("Quarterly Budget Review", "budget"));
        assert!(!contains_ci("Standup", "budget"));
        assert!(contains_ci("anything", "  "));
    }
}
