use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use log::info;
use thiserror::Error;
use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("could not acquire lock on {path} after {timeout:.1}s")]
    Timeout { path: PathBuf, timeout: f64 },
    #[error("lock file error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Exclusive advisory lock on a month's sibling `.lock` file. Coordinates
/// separate OS processes racing over the same archive; the file's content is
/// irrelevant. Not reentrant. Released on drop, on every exit path.
pub struct MonthLock {
    file: File,
    path: PathBuf,
}

impl MonthLock {
    /// Acquire within `timeout`, polling the flock rather than blocking
    /// indefinitely.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<MonthLock, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    info!("Acquired file lock {}", path.display());
                    return Ok(MonthLock {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(_) if Instant::now() < deadline => sleep(POLL_INTERVAL).await,
                Err(_) => {
                    return Err(LockError::Timeout {
                        path: path.to_path_buf(),
                        timeout: timeout.as_secs_f64(),
                    });
                }
            }
        }
    }
}

impl Drop for MonthLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        info!("Released file lock {}", self.path.display());
    }
}
