//! Classic five-field cron expressions.
//!
//! Grammar per field: `*`, an integer, a comma list, an inclusive `a-b`
//! range, or `*/step`. Day-of-month and day-of-week combine as a union
//! when both are constrained. Evaluation is in host local time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ScheduleError;

/// One pattern within a cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronPat {
    Any,
    Value(u32),
    Range(u32, u32),
    Step(u32),
}

/// A single cron field: the union of its comma-separated patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    pats: Vec<CronPat>,
}

impl CronField {
    fn parse(text: &str, name: &str, min: u32, max: u32) -> Result<Self, ScheduleError> {
        let mut pats = Vec::new();
        for part in text.split(',') {
            pats.push(Self::parse_pat(part, name, min, max)?);
        }
        Ok(CronField { pats })
    }

    fn parse_pat(part: &str, name: &str, min: u32, max: u32) -> Result<CronPat, ScheduleError> {
        if part == "*" {
            return Ok(CronPat::Any);
        }
        if let Some(step) = part.strip_prefix("*/") {
            let step: u32 = step
                .parse()
                .map_err(|_| ScheduleError::bad_field(name, part))?;
            if step == 0 {
                return Err(ScheduleError::bad_field(name, part));
            }
            return Ok(CronPat::Step(step));
        }
        if let Some((a, b)) = part.split_once('-') {
            let a: u32 = a.parse().map_err(|_| ScheduleError::bad_field(name, part))?;
            let b: u32 = b.parse().map_err(|_| ScheduleError::bad_field(name, part))?;
            if a > b || a < min || b > max {
                return Err(ScheduleError::bad_field(name, part));
            }
            return Ok(CronPat::Range(a, b));
        }
        let v: u32 = part
            .parse()
            .map_err(|_| ScheduleError::bad_field(name, part))?;
        if v < min || v > max {
            return Err(ScheduleError::bad_field(name, part));
        }
        Ok(CronPat::Value(v))
    }

    fn matches(&self, value: u32) -> bool {
        self.pats.iter().any(|pat| match *pat {
            CronPat::Any => true,
            CronPat::Value(v) => v == value,
            CronPat::Range(a, b) => (a..=b).contains(&value),
            CronPat::Step(k) => value % k == 0,
        })
    }

    fn is_any(&self) -> bool {
        self.pats.iter().all(|p| matches!(p, CronPat::Any))
    }
}

/// A parsed five-field cron expression, keeping its source text for
/// display and serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
}

/// Evaluation walks minute by minute; four years bounds pathological
/// expressions like `0 0 30 2 *`.
const MAX_SEARCH_MINUTES: i64 = 4 * 366 * 24 * 60;

impl CronExpr {
    /// Parse `minute hour day-of-month month day-of-week`.
    pub fn parse(source: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = source.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount {
                expression: source.to_string(),
                found: fields.len(),
            });
        }
        Ok(CronExpr {
            source: source.to_string(),
            minute: CronField::parse(fields[0], "minute", 0, 59)?,
            hour: CronField::parse(fields[1], "hour", 0, 23)?,
            dom: CronField::parse(fields[2], "day-of-month", 1, 31)?,
            month: CronField::parse(fields[3], "month", 1, 12)?,
            // 0 or 7 both mean Sunday.
            dow: CronField::parse(fields[4], "day-of-week", 0, 7)?,
        })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the instant's local minute satisfies the expression.
    pub fn matches(&self, at: DateTime<Local>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.month.matches(at.month())
            && self.day_matches(at)
    }

    /// Union semantics: when both day fields are constrained, either
    /// matching is enough.
    fn day_matches(&self, at: DateTime<Local>) -> bool {
        let dow = at.weekday().num_days_from_sunday();
        let dom_hit = self.dom.matches(at.day());
        // Fold cron's 7 onto 0 so `7` and `0` both mean Sunday.
        let dow_hit = self.dow.matches(dow) || (dow == 0 && self.dow.matches(7));

        match (self.dom.is_any(), self.dow.is_any()) {
            (true, true) => true,
            (false, true) => dom_hit,
            (true, false) => dow_hit,
            (false, false) => dom_hit || dow_hit,
        }
    }

    /// Smallest matching instant strictly after `after`, on a minute
    /// boundary in local time.
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut candidate = truncate_to_minute(after) + Duration::minutes(1);
        for _ in 0..MAX_SEARCH_MINUTES {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn truncate_to_minute(at: DateTime<Local>) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), at.minute(), 0)
        .single()
        .unwrap_or(at)
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronExpr::parse(s)
    }
}

// On the wire a cron schedule is just its source string.
impl Serialize for CronExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for CronExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CronExpr::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, mo, d)
                    .unwrap()
                    .and_hms_opt(h, mi, 0)
                    .unwrap(),
            )
            .single()
            .unwrap()
    }

    #[test]
    fn every_minute_advances_to_next_boundary() {
        let expr = CronExpr::parse("*/1 * * * *").unwrap();
        let now = local(2026, 3, 14, 10, 30);
        let next = expr.next_after(now).unwrap();
        assert_eq!(next, local(2026, 3, 14, 10, 31));
    }

    #[test]
    fn next_is_strictly_after_even_on_boundary() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let now = local(2026, 3, 14, 10, 30);
        assert_eq!(expr.next_after(now).unwrap(), local(2026, 3, 14, 10, 31));
    }

    #[test]
    fn fixed_daily_time() {
        let expr = CronExpr::parse("30 4 * * *").unwrap();
        let next = expr.next_after(local(2026, 3, 14, 10, 0)).unwrap();
        assert_eq!(next, local(2026, 3, 15, 4, 30));

        let next = expr.next_after(local(2026, 3, 14, 4, 0)).unwrap();
        assert_eq!(next, local(2026, 3, 14, 4, 30));
    }

    #[test]
    fn step_matches_divisible_values() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        let next = expr.next_after(local(2026, 3, 14, 10, 1)).unwrap();
        assert_eq!(next.minute(), 15);
        let next = expr.next_after(local(2026, 3, 14, 10, 46)).unwrap();
        assert_eq!(next.minute(), 0);
        assert_eq!(next.hour(), 11);
    }

    #[test]
    fn range_is_inclusive() {
        let expr = CronExpr::parse("10-12 * * * *").unwrap();
        assert!(expr.matches(local(2026, 3, 14, 9, 10)));
        assert!(expr.matches(local(2026, 3, 14, 9, 12)));
        assert!(!expr.matches(local(2026, 3, 14, 9, 13)));
    }

    #[test]
    fn comma_list() {
        let expr = CronExpr::parse("0,30 * * * *").unwrap();
        assert!(expr.matches(local(2026, 3, 14, 9, 0)));
        assert!(expr.matches(local(2026, 3, 14, 9, 30)));
        assert!(!expr.matches(local(2026, 3, 14, 9, 15)));
    }

    #[test]
    fn dom_dow_union_when_both_constrained() {
        // 13th of the month OR any Friday. 2026-03-13 is a Friday;
        // 2026-03-20 is also a Friday; 2026-04-13 is a Monday.
        let expr = CronExpr::parse("0 0 13 * 5").unwrap();
        assert!(expr.matches(local(2026, 3, 13, 0, 0)));
        assert!(expr.matches(local(2026, 3, 20, 0, 0)));
        assert!(expr.matches(local(2026, 4, 13, 0, 0)));
        assert!(!expr.matches(local(2026, 3, 14, 0, 0)));
    }

    #[test]
    fn dow_only_constrained() {
        // Sundays at noon. 2026-03-15 is a Sunday.
        let expr = CronExpr::parse("0 12 * * 0").unwrap();
        assert!(expr.matches(local(2026, 3, 15, 12, 0)));
        assert!(!expr.matches(local(2026, 3, 16, 12, 0)));
    }

    #[test]
    fn seven_means_sunday() {
        let expr = CronExpr::parse("0 12 * * 7").unwrap();
        assert!(expr.matches(local(2026, 3, 15, 12, 0)));
    }

    #[test]
    fn month_field_respected() {
        let expr = CronExpr::parse("0 0 1 6 *").unwrap();
        let next = expr.next_after(local(2026, 3, 14, 0, 0)).unwrap();
        assert_eq!((next.month(), next.day()), (6, 1));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("* * * * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronExpr::parse("60 * * * *").is_err());
        assert!(CronExpr::parse("* 24 * * *").is_err());
        assert!(CronExpr::parse("* * 0 * *").is_err());
        assert!(CronExpr::parse("* * * 13 *").is_err());
        assert!(CronExpr::parse("* * * * 8").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(CronExpr::parse("a * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("5-2 * * * *").is_err());
    }

    #[test]
    fn serde_roundtrips_as_string() {
        let expr = CronExpr::parse("*/5 2-4 * * 1").unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(json, "\"*/5 2-4 * * 1\"");
        let back: CronExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            // next_after yields an instant strictly in the future that
            // the expression itself accepts.
            #[test]
            fn next_after_is_future_and_matching(minute in 0u32..60, hour in 0u32..24) {
                let expr = CronExpr::parse(&format!("{minute} {hour} * * *")).unwrap();
                let now = Local::now();
                let next = expr.next_after(now).unwrap();
                prop_assert!(next > now);
                prop_assert!(expr.matches(next));
                prop_assert_eq!(next.second(), 0);
            }

            // No instant between `after` and the answer matches: the
            // answer is the smallest such minute.
            #[test]
            fn next_after_is_minimal(step in 1u32..30) {
                let expr = CronExpr::parse(&format!("*/{step} * * * *")).unwrap();
                let now = Local::now();
                let next = expr.next_after(now).unwrap();
                let mut probe = truncate_to_minute(now) + Duration::minutes(1);
                while probe < next {
                    prop_assert!(!expr.matches(probe));
                    probe += Duration::minutes(1);
                }
            }
        }
    }
}
