use crate::model::Flow;
use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

pub(crate) const WEEKDAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

pub(crate) fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Abbreviation used in dialplan time specifications.
pub(crate) fn asterisk_weekday(name: &str) -> Option<&'static str> {
    match name {
        "monday" => Some("mon"),
        "tuesday" => Some("tue"),
        "wednesday" => Some("wed"),
        "thursday" => Some("thu"),
        "friday" => Some("fri"),
        "saturday" => Some("sat"),
        "sunday" => Some("sun"),
        _ => None,
    }
}

pub(crate) fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

/// Split a `"HH:MM-HH:MM"` range into its endpoints.
pub(crate) fn parse_time_range(value: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start, end) = value.split_once('-')?;
    Some((parse_time(start.trim())?, parse_time(end.trim())?))
}

/// Whether the flow accepts calls at `now`.
///
/// Flows without business hours are always open. Otherwise `now` is shifted
/// into the configured timezone and matched against that weekday's ranges,
/// inclusive of both endpoints. A weekday with no ranges is closed. Ranges
/// are same-day only; a range whose start is after its end never matches
/// (the validator reports it). An unknown timezone falls back to UTC with a
/// warning; this function never fails.
pub fn is_open(flow: &Flow, now: DateTime<Utc>) -> bool {
    let Some(hours) = &flow.business_hours else {
        return true;
    };
    let tz: Tz = match hours.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(
                flow = %flow.id,
                timezone = %hours.timezone,
                "unknown timezone; evaluating business hours in UTC"
            );
            chrono_tz::UTC
        }
    };
    let local = now.with_timezone(&tz);
    let weekday = weekday_name(local.weekday());
    let time = local.time();
    let Some(ranges) = hours.timeframes.get(weekday) else {
        return false;
    };
    ranges.iter().any(|range| {
        parse_time_range(range)
            .map(|(start, end)| start <= time && time <= end)
            .unwrap_or(false)
    })
}
