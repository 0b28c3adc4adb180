use chrono::{Datelike, Days, NaiveDate};

/// All (year, month) pairs from January of `start_year` through the month of
/// `today`, ascending.
pub fn months_since(start_year: i32, today: NaiveDate) -> Vec<(i32, u32)> {
    let mut months = Vec::new();
    let (mut y, mut m) = (start_year, 1u32);
    while y < today.year() || (y == today.year() && m <= today.month()) {
        months.push((y, m));
        if m == 12 {
            y += 1;
            m = 1;
        } else {
            m += 1;
        }
    }
    months
}

/// Every calendar date of the given month, ascending. Empty for an invalid
/// (year, month) pair.
pub fn dates_in_month(year: i32, month: u32) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    let mut dates = Vec::new();
    let mut current = first;
    while current.month() == month {
        dates.push(current);
        match current.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }
    dates
}
