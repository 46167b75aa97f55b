//! Turns the human-readable timestamps shown in the inbox ("2h ago",
//! "Yesterday", "3:15 PM", "Jan 10") into absolute instants.

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static SHORT_RELATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+)\s*([smhd])\s+ago$").unwrap());
static CLOCK_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{1,2}):(\d{2})\s*([ap])\.?m\.?$").unwrap());
static LONG_RELATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+)\s+(second|minute|hour|day)s?\s+ago$").unwrap());
static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2})(?:,?\s+(\d{4}))?$",
    )
    .unwrap()
});

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Normalizes `label` against the current local time.
pub fn normalize_date(label: &str) -> Option<DateTime<Utc>> {
    normalize_date_at(label, Local::now())
}

/// Normalizes `label` relative to `now`. Calendar forms ("today", clock
/// times, month-day labels) are interpreted in `now`'s time zone.
///
/// Returns `None` when no pattern matches or the matched values do not form
/// a real date; callers keep that distinct from any genuine timestamp.
pub fn normalize_date_at<Tz: TimeZone>(label: &str, now: DateTime<Tz>) -> Option<DateTime<Utc>> {
    let label = label.trim();

    if let Some(caps) = SHORT_RELATIVE.captures(label) {
        let amount: i64 = caps[1].parse().ok()?;
        let delta = match caps[2].to_ascii_lowercase().as_str() {
            "s" => TimeDelta::try_seconds(amount),
            "m" => TimeDelta::try_minutes(amount),
            "h" => TimeDelta::try_hours(amount),
            _ => TimeDelta::try_days(amount),
        }?;
        return now.checked_sub_signed(delta).map(|dt| dt.with_timezone(&Utc));
    }

    match label.to_ascii_lowercase().as_str() {
        "yesterday" => {
            return now
                .checked_sub_days(Days::new(1))
                .map(|dt| dt.with_timezone(&Utc))
        }
        "today" => return Some(now.with_timezone(&Utc)),
        _ => {}
    }

    if let Some(caps) = CLOCK_TIME.captures(label) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        if !(1..=12).contains(&hour) {
            return None;
        }
        let pm = caps[3].eq_ignore_ascii_case("p");
        let hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let local = now.date_naive().and_time(time);
        return now
            .timezone()
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc));
    }

    if let Some(caps) = LONG_RELATIVE.captures(label) {
        let amount: i64 = caps[1].parse().ok()?;
        let delta = match caps[2].to_ascii_lowercase().as_str() {
            "second" => TimeDelta::try_seconds(amount),
            "minute" => TimeDelta::try_minutes(amount),
            "hour" => TimeDelta::try_hours(amount),
            _ => TimeDelta::try_days(amount),
        }?;
        return now.checked_sub_signed(delta).map(|dt| dt.with_timezone(&Utc));
    }

    if let Some(caps) = MONTH_DAY.captures(label) {
        let prefix: String = caps[1].chars().take(3).collect::<String>().to_ascii_lowercase();
        let month = MONTHS.iter().position(|m| *m == prefix)? as u32 + 1;
        let day: u32 = caps[2].parse().ok()?;

        if let Some(year) = caps.get(3) {
            let year: i32 = year.as_str().parse().ok()?;
            return local_midnight(&now, NaiveDate::from_ymd_opt(year, month, day)?);
        }

        let this_year = local_midnight(&now, NaiveDate::from_ymd_opt(now.year(), month, day)?)?;
        if this_year > now.with_timezone(&Utc) {
            return local_midnight(&now, NaiveDate::from_ymd_opt(now.year() - 1, month, day)?);
        }
        return Some(this_year);
    }

    None
}

fn local_midnight<Tz: TimeZone>(now: &DateTime<Tz>, date: NaiveDate) -> Option<DateTime<Utc>> {
    now.timezone()
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
