use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{error, info};

use crate::archive::ArchiveStore;
use crate::budget::{self, BudgetDecision};
use crate::calendar::dates_in_month;
use crate::client::RateSource;
use crate::config::Config;
use crate::lock::MonthLock;
use crate::locator::find_target_month;
use crate::model::{MonthRecords, RunOutcome};

/// One run of the incremental backfill: check quota, pick the earliest month
/// with a gap, size the batch against remaining quota, then fetch and persist
/// under the month's exclusive file lock.
pub struct Scheduler<'a, S: RateSource> {
    config: &'a Config,
    source: &'a S,
    store: &'a ArchiveStore,
}

impl<'a, S: RateSource> Scheduler<'a, S> {
    pub fn new(config: &'a Config, source: &'a S, store: &'a ArchiveStore) -> Self {
        Self {
            config,
            source,
            store,
        }
    }

    pub async fn run(&self, today: NaiveDate) -> Result<RunOutcome> {
        let status = self
            .source
            .quota_status()
            .await
            .context("cannot obtain status from API")?;
        info!(
            "Monthly quota: total={:?} used={:?} remaining={:?}",
            status.total, status.used, status.remaining
        );
        // Fail closed: never guess remaining quota.
        let remaining = status
            .remaining
            .context("status does not expose remaining monthly quota")?;

        let Some(target) = find_target_month(self.store, self.config.start_year, today)? else {
            info!(
                "No missing data found since {}. Nothing to do.",
                self.config.start_year
            );
            return Ok(RunOutcome::NothingToDo);
        };
        info!(
            "Targeting {:04}-{:02} with {} missing days",
            target.year,
            target.month,
            target.missing.len()
        );

        let planned: &[NaiveDate] = match budget::plan(
            remaining,
            self.config.safety_buffer,
            target.missing.len(),
            self.config.allow_partial_month,
        ) {
            BudgetDecision::Skip(reason) => {
                info!("Skipping this run: {}. Exiting.", reason);
                return Ok(RunOutcome::SkippedQuota);
            }
            BudgetDecision::Proceed { days } => {
                if days < target.missing.len() {
                    info!(
                        "Partial allowed: will fetch {} of {} missing days based on quota.",
                        days,
                        target.missing.len()
                    );
                }
                &target.missing[..days]
            }
        };

        let lock_path = self.store.lock_path_for(target.year, target.month);
        let lock = MonthLock::acquire(&lock_path, self.config.lock_timeout).await?;
        let fetched = self.fill_month(target.year, target.month, planned).await;
        drop(lock);

        let fetched = fetched?;
        info!("Finished processing {:04}-{:02}", target.year, target.month);
        Ok(RunOutcome::Completed {
            year: target.year,
            month: target.month,
            fetched,
        })
    }

    /// The locked phase: re-read the month, drop planned dates another run
    /// already filled, fetch the rest ascending, and persist. A fetch failure
    /// aborts the loop but whatever was collected is still merged and written
    /// before the error propagates.
    pub(crate) async fn fill_month(
        &self,
        year: i32,
        month: u32,
        planned: &[NaiveDate],
    ) -> Result<usize> {
        let mut existing = self.store.read(year, month)?;
        let planned: Vec<NaiveDate> = {
            let all = dates_in_month(year, month);
            planned
                .iter()
                .copied()
                .filter(|d| all.contains(d) && !existing.contains_key(d))
                .collect()
        };
        if planned.is_empty() {
            info!("Nothing to fetch after re-check inside lock (another run filled it).");
            return Ok(0);
        }

        let mut fetched: MonthRecords = MonthRecords::new();
        for date in planned {
            info!("Fetching {}", date);
            match self.source.historical(date).await {
                Ok(record) => {
                    fetched.insert(date, record);
                }
                Err(err) => {
                    error!("Error during fetch: {}", err);
                    if !fetched.is_empty() {
                        info!("Saving partial results ({} rows).", fetched.len());
                        existing.extend(fetched);
                        self.store.write(year, month, &existing)?;
                    }
                    return Err(anyhow::Error::new(err).context(format!("fetching {}", date)));
                }
            }
        }

        let count = fetched.len();
        existing.extend(fetched);
        self.store.write(year, month, &existing)?;
        info!(
            "Saved {} rows to {}",
            count,
            self.store.path_for(year, month).display()
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FetchError;
    use crate::model::{DailyRateRecord, QuotaStatus};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn eur_record(date: NaiveDate) -> DailyRateRecord {
        let mut rates = BTreeMap::new();
        rates.insert("EUR".to_string(), Some(Decimal::new(93, 2)));
        DailyRateRecord { date, rates }
    }

    /// In-memory stand-in for the remote API: fixed quota snapshot, optional
    /// 429 on one date, and a log of every historical call.
    struct FakeSource {
        remaining: Option<u64>,
        reject_from: Option<NaiveDate>,
        calls: Mutex<Vec<NaiveDate>>,
    }

    impl FakeSource {
        fn with_quota(remaining: u64) -> Self {
            Self {
                remaining: Some(remaining),
                reject_from: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<NaiveDate> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RateSource for FakeSource {
        async fn quota_status(&self) -> Result<QuotaStatus, FetchError> {
            Ok(QuotaStatus {
                total: Some(5000),
                used: None,
                remaining: self.remaining,
            })
        }

        async fn historical(&self, date: NaiveDate) -> Result<DailyRateRecord, FetchError> {
            self.calls.lock().unwrap().push(date);
            if self.reject_from.is_some_and(|cutoff| date >= cutoff) {
                return Err(FetchError::QuotaExhausted);
            }
            Ok(eur_record(date))
        }
    }

    fn config(dir: &Path, allow_partial: bool) -> Config {
        Config {
            api_key: "test-key".to_string(),
            api_base_url: "http://localhost".to_string(),
            base_currency: "USD".to_string(),
            start_year: 2023,
            data_dir: dir.to_path_buf(),
            max_per_minute: 10,
            safety_buffer: 1,
            allow_partial_month: allow_partial,
            max_retries: 0,
            retry_base: Duration::from_millis(1),
            request_timeout: Duration::from_secs(1),
            currencies: vec!["EUR".to_string()],
            lock_timeout: Duration::from_secs(1),
        }
    }

    fn store(dir: &Path) -> ArchiveStore {
        ArchiveStore::new(dir, vec!["EUR".to_string()])
    }

    fn fill_except(store: &ArchiveStore, year: i32, month: u32, gaps: &[NaiveDate]) {
        let mut records = MonthRecords::new();
        for date in dates_in_month(year, month) {
            if !gaps.contains(&date) {
                records.insert(date, eur_record(date));
            }
        }
        store.write(year, month, &records).unwrap();
    }

    #[tokio::test]
    async fn fills_earliest_gap_then_finds_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), false);
        let store = store(dir.path());
        let gaps = [d("2023-01-03"), d("2023-01-17"), d("2023-01-30")];
        fill_except(&store, 2023, 1, &gaps);
        fill_except(&store, 2023, 2, &[]);

        let source = FakeSource::with_quota(1000);
        let scheduler = Scheduler::new(&config, &source, &store);
        let today = d("2023-02-28");

        let outcome = scheduler.run(today).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                year: 2023,
                month: 1,
                fetched: 3
            }
        );
        assert_eq!(source.calls(), gaps.to_vec());
        assert_eq!(store.read(2023, 1).unwrap().len(), 31);

        // Second run converges: the gap is gone.
        let outcome = scheduler.run(today).await.unwrap();
        assert_eq!(outcome, RunOutcome::NothingToDo);
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test]
    async fn budget_skip_issues_zero_requests() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), false);
        let store = store(dir.path());
        let gaps: Vec<NaiveDate> = (1..=10).map(|day| d(&format!("2023-01-{:02}", day))).collect();
        fill_except(&store, 2023, 1, &gaps);

        // remaining=5, buffer=1, missing=10, partial disallowed.
        let source = FakeSource::with_quota(5);
        let scheduler = Scheduler::new(&config, &source, &store);

        let outcome = scheduler.run(d("2023-01-31")).await.unwrap();
        assert_eq!(outcome, RunOutcome::SkippedQuota);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn partial_budget_fetches_earliest_available_days() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), true);
        let store = store(dir.path());
        let gaps: Vec<NaiveDate> = (1..=10).map(|day| d(&format!("2023-01-{:02}", day))).collect();
        fill_except(&store, 2023, 1, &gaps);

        // remaining=5, buffer=1 -> exactly the 4 earliest missing dates.
        let source = FakeSource::with_quota(5);
        let scheduler = Scheduler::new(&config, &source, &store);

        let outcome = scheduler.run(d("2023-01-31")).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                year: 2023,
                month: 1,
                fetched: 4
            }
        );
        assert_eq!(source.calls(), gaps[..4].to_vec());
        let on_disk = store.read(2023, 1).unwrap();
        assert_eq!(on_disk.len(), 25);
        assert!(on_disk.contains_key(&d("2023-01-04")));
        assert!(!on_disk.contains_key(&d("2023-01-05")));
    }

    #[tokio::test]
    async fn revalidation_under_lock_fetches_nothing_when_month_filled() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), false);
        let store = store(dir.path());
        let planned = [d("2023-01-03"), d("2023-01-17")];
        // Another run filled the whole month between scan and lock.
        fill_except(&store, 2023, 1, &[]);

        let source = FakeSource::with_quota(1000);
        let scheduler = Scheduler::new(&config, &source, &store);

        let fetched = scheduler.fill_month(2023, 1, &planned).await.unwrap();
        assert_eq!(fetched, 0);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn partial_fetch_failure_persists_progress_and_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), false);
        let store = store(dir.path());
        let gaps: Vec<NaiveDate> = (10..=14).map(|day| d(&format!("2023-01-{}", day))).collect();
        fill_except(&store, 2023, 1, &gaps);

        // Quota dies on the 4th planned date.
        let source = FakeSource {
            remaining: Some(1000),
            reject_from: Some(d("2023-01-13")),
            calls: Mutex::new(Vec::new()),
        };
        let scheduler = Scheduler::new(&config, &source, &store);

        let err = scheduler.run(d("2023-01-31")).await;
        assert!(err.is_err());
        assert_eq!(source.calls().len(), 4);

        // The three successful days are merged with prior content.
        let on_disk = store.read(2023, 1).unwrap();
        assert_eq!(on_disk.len(), 26 + 3);
        for day in &gaps[..3] {
            assert!(on_disk.contains_key(day));
        }
        assert!(!on_disk.contains_key(&d("2023-01-13")));
    }

    #[tokio::test]
    async fn run_fails_closed_when_status_lacks_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), false);
        let store = store(dir.path());

        let source = FakeSource {
            remaining: None,
            reject_from: None,
            calls: Mutex::new(Vec::new()),
        };
        let scheduler = Scheduler::new(&config, &source, &store);

        assert!(scheduler.run(d("2023-01-31")).await.is_err());
        assert!(source.calls().is_empty());
    }
}
