use anyhow::Result;
use chrono::NaiveDate;

use crate::archive::ArchiveStore;
use crate::calendar::{dates_in_month, months_since};
use crate::model::MonthRecords;

/// The earliest month with at least one missing day.
#[derive(Debug)]
pub struct TargetMonth {
    pub year: i32,
    pub month: u32,
    /// Missing dates, ascending.
    pub missing: Vec<NaiveDate>,
    /// Records already on disk at scan time. Advisory only; the coordinator
    /// re-reads under the month lock before writing.
    pub existing: MonthRecords,
}

/// Scan months ascending from January of `start_year` through the month of
/// `today` and return the first one with a gap. `None` means the archive is
/// complete up to the present.
pub fn find_target_month(
    store: &ArchiveStore,
    start_year: i32,
    today: NaiveDate,
) -> Result<Option<TargetMonth>> {
    for (year, month) in months_since(start_year, today) {
        let existing = store.read(year, month)?;
        let missing: Vec<NaiveDate> = dates_in_month(year, month)
            .into_iter()
            .filter(|d| !existing.contains_key(d))
            .collect();
        if !missing.is_empty() {
            return Ok(Some(TargetMonth {
                year,
                month,
                missing,
                existing,
            }));
        }
    }
    Ok(None)
}
