use chrono::{Days, NaiveDate};

/// The `days` calendar days immediately before `today`, oldest first.
///
/// `today` itself is never included since its data is still incomplete.
pub fn compute_window(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (1..=u64::from(days))
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(back)))
        .collect()
}
