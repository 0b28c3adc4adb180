use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// One fetched or archived day: date plus rate per currency code.
/// `None` marks a rate the API did not report (serialized as a blank cell).
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRateRecord {
    pub date: NaiveDate,
    pub rates: BTreeMap<String, Option<Decimal>>,
}

/// A month's archive: date -> record, ascending by key.
pub type MonthRecords = BTreeMap<NaiveDate, DailyRateRecord>;

/// Snapshot of the remote monthly quota, fetched once per run.
#[derive(Debug, Clone, Copy)]
pub struct QuotaStatus {
    pub total: Option<u64>,
    pub used: Option<u64>,
    pub remaining: Option<u64>,
}

/// How a run ended when it did not fail outright.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every month since the start year is complete.
    NothingToDo,
    /// A gap exists but the quota budget said not to touch it.
    SkippedQuota,
    /// Fetched and persisted `fetched` days for the target month.
    Completed { year: i32, month: u32, fetched: usize },
}
