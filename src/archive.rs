use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::warn;
use rust_decimal::Decimal;
use tempfile::NamedTempFile;

use crate::model::{DailyRateRecord, MonthRecords};

/// One CSV file per month under `dir`, header `date,<c1>,<c2>,...` in the
/// configured currency order, rows ascending by date. Writes go through a
/// temporary file in the same directory and an atomic rename, so readers
/// never observe a partial file.
pub struct ArchiveStore {
    dir: PathBuf,
    currencies: Vec<String>,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>, currencies: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            currencies,
        }
    }

    pub fn path_for(&self, year: i32, month: u32) -> PathBuf {
        self.dir.join(format!("{:04}-{:02}.csv", year, month))
    }

    /// Sibling lock file used as the cross-process mutual-exclusion token.
    pub fn lock_path_for(&self, year: i32, month: u32) -> PathBuf {
        let mut name = self.path_for(year, month).into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Read a month's archive. A missing file is an empty map; malformed
    /// rows are skipped with a warning, never fatal.
    pub fn read(&self, year: i32, month: u32) -> Result<MonthRecords> {
        let path = self.path_for(year, month);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("opening archive {}", path.display()))?;
        let headers = reader.headers()?.clone();

        let mut records = BTreeMap::new();
        for row in reader.records() {
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    warn!("Skipping malformed row in {}: {}", path.display(), err);
                    continue;
                }
            };
            match self.parse_row(&headers, &row) {
                Some(record) => {
                    records.insert(record.date, record);
                }
                None => warn!("Skipping row without valid date in {}", path.display()),
            }
        }
        Ok(records)
    }

    fn parse_row(&self, headers: &csv::StringRecord, row: &csv::StringRecord) -> Option<DailyRateRecord> {
        let date_idx = headers.iter().position(|h| h == "date")?;
        let date = NaiveDate::parse_from_str(row.get(date_idx)?, "%Y-%m-%d").ok()?;

        let mut rates = BTreeMap::new();
        for code in &self.currencies {
            let cell = headers
                .iter()
                .position(|h| h == code)
                .and_then(|i| row.get(i))
                .unwrap_or("");
            // Numeric where possible; anything else is the blank sentinel.
            rates.insert(code.clone(), Decimal::from_str(cell).ok());
        }
        Some(DailyRateRecord { date, rates })
    }

    /// Serialize `records` ascending by date and atomically replace the
    /// month's file. On failure the temporary file is removed and the
    /// destination keeps its prior content.
    pub fn write(&self, year: i32, month: u32, records: &MonthRecords) -> Result<()> {
        let path = self.path_for(year, month);
        let tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("creating temp file in {}", self.dir.display()))?;

        {
            let mut writer = csv::Writer::from_writer(tmp.as_file());
            let mut header = vec!["date".to_string()];
            header.extend(self.currencies.iter().cloned());
            writer.write_record(&header)?;

            for record in records.values() {
                let mut row = vec![record.date.format("%Y-%m-%d").to_string()];
                for code in &self.currencies {
                    let cell = match record.rates.get(code) {
                        Some(Some(rate)) => rate.to_string(),
                        _ => String::new(),
                    };
                    row.push(cell);
                }
                writer.write_record(&row)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .with_context(|| format!("replacing archive {}", path.display()))?;
        Ok(())
    }
}
