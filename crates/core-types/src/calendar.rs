use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// The calendar day `now` falls on in the given zone.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Midnight-to-midnight bounds of a local calendar day, `[start, end)`.
///
/// Across a DST switch the day is 23 or 25 hours long. A midnight that does not
/// exist locally resolves to the first valid instant after it.
pub fn day_bounds(date: NaiveDate, tz: Tz) -> (DateTime<Tz>, DateTime<Tz>) {
    let next = date.checked_add_days(Days::new(1)).unwrap_or(date);
    (local_midnight(date, tz), local_midnight(next, tz))
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Tz> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(dt) => dt,
        // The gap is never longer than a few hours.
        None => {
            let shifted = midnight + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(|| tz.from_utc_datetime(&midnight))
        }
    }
}
