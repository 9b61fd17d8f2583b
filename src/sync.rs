//! Poll loop
//!
//! Every cycle renames fresh camera uploads to canonical names, downloads the
//! images newer than the local archive and, if enabled, deletes images older
//! than the retention horizon from the remote folder. A cycle is skipped when
//! the folder's fingerprint did not change since the last completed cycle.

use std::{fmt, path::PathBuf, thread, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    archive,
    backoff::Backoff,
    naming,
    remote::{ErrorClass, Fingerprint, FolderSnapshot, RemoteError, RemoteStorage, remote_path},
};

/// Sync settings
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Remote folder the camera uploads to
    pub remote_folder: String,
    /// Root of the local `YYYY/YYYY-MM-DD` archive
    pub archive_dir: PathBuf,
    /// Pause between cycles
    pub interval: Duration,
    /// Upper bound of the pause after repeated transient failures
    pub max_backoff: Duration,
    /// Age in days after which remote images are deleted
    pub expiry_days: u32,
    /// Delete remote images older than `expiry_days`
    pub delete: bool,
    /// Only log what would be done
    pub dry_run: bool,
    /// Stop after a single cycle
    pub one_run: bool,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Archive(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether the next cycle may succeed where this one failed
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.class() == ErrorClass::Transient)
    }
}

/// What a cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The folder fingerprint was unchanged, nothing was touched
    Unchanged,
    Synced(Statistics),
}

/// Per-file counters of a cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Statistics {
    pub renamed: usize,
    pub downloaded: usize,
    pub deleted: usize,
    /// Files which disappeared before we got to them
    pub vanished: usize,
    /// Files without a canonical name
    pub ignored: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "renamed {}, downloaded {}, deleted {}, vanished {}, ignored {}",
            self.renamed, self.downloaded, self.deleted, self.vanished, self.ignored
        )
    }
}

/// Drives poll cycles against a [RemoteStorage]
pub struct Syncer<R> {
    remote: R,
    options: SyncOptions,
    /// Fingerprint of the folder after the last completed cycle
    last_fingerprint: Option<Fingerprint>,
}

impl<R: RemoteStorage> Syncer<R> {
    pub fn new(remote: R, options: SyncOptions) -> Self {
        Self {
            remote,
            options,
            last_fingerprint: None,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Run cycles until a fatal error occurs, or once with `one_run`.
    ///
    /// Transient failures abort the current cycle only; the pause before the
    /// next one grows with every consecutive failure.
    pub fn run(&mut self) -> Result<(), SyncError> {
        let backoff = Backoff::new(self.options.interval, self.options.max_backoff);
        let mut failures = 0u32;

        loop {
            match self.run_cycle(Utc::now()) {
                Ok(_) => failures = 0,
                Err(e) if e.is_transient() => {
                    failures = failures.saturating_add(1);
                    warn!("Cycle aborted ({failures} in a row): {e}");
                }
                Err(e) => {
                    error!("Cycle failed: {e:#}");
                    return Err(e);
                }
            }

            if self.options.one_run {
                break;
            }

            let delay = backoff.delay(failures);
            info!(
                "{} Done run. Sleeping for {}s",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S %:z"),
                delay.as_secs()
            );
            thread::sleep(delay);
        }

        info!("Exiting main loop");
        Ok(())
    }

    /// Run a single cycle as of `now`
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome, SyncError> {
        let horizon = now
            .checked_sub_signed(TimeDelta::days(i64::from(self.options.expiry_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let watermark = self.watermark()?;
        let folder = self.options.remote_folder.as_str();

        let snapshot = self.remote.snapshot(folder)?;
        if self.last_fingerprint.as_ref() == Some(&snapshot.fingerprint) {
            info!("Skipping cycle. No changes in folder '{folder}'");
            return Ok(CycleOutcome::Unchanged);
        }

        let mut stats = Statistics::default();

        info!("Renaming existing files");
        self.rename_files(&snapshot, &mut stats)?;

        // Renaming changed the folder, list it again.
        info!("Downloading new files");
        let snapshot = self.remote.snapshot(folder)?;
        self.download_new_files(&snapshot, &watermark, &mut stats)?;

        if self.options.delete {
            info!("Deleting old files");
            self.delete_old_files(&snapshot, &horizon, &mut stats)?;
        }

        self.last_fingerprint = Some(snapshot.fingerprint);
        info!("Cycle done: {stats}");

        Ok(CycleOutcome::Synced(stats))
    }

    /// Creation instant of the newest archived image
    fn watermark(&self) -> Result<DateTime<Utc>, SyncError> {
        let watermark = match archive::find_latest(&self.options.archive_dir)? {
            Some(latest) => {
                debug!(
                    "Latest archived file is {}/{}/{}",
                    latest.year_dir, latest.date_dir, latest.file_name
                );
                latest.instant().unwrap_or(DateTime::<Utc>::MIN_UTC)
            }
            None => {
                info!(
                    "No archived files in {}",
                    self.options.archive_dir.display()
                );
                DateTime::<Utc>::MIN_UTC
            }
        };
        Ok(watermark)
    }

    fn rename_files(
        &self,
        snapshot: &FolderSnapshot,
        stats: &mut Statistics,
    ) -> Result<(), SyncError> {
        let folder = self.options.remote_folder.as_str();

        for name in snapshot.file_names() {
            let Some(new_name) = naming::normalize(name) else {
                continue;
            };
            info!("Renaming '{name}' to '{new_name}'");
            if self.options.dry_run {
                continue;
            }

            match self
                .remote
                .move_file(&remote_path(folder, name), &remote_path(folder, &new_name))
            {
                Ok(()) => stats.renamed += 1,
                Err(e) if e.is_vanished() => {
                    warn!("File '{name}' was deleted before we could rename it");
                    stats.vanished += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    fn download_new_files(
        &self,
        snapshot: &FolderSnapshot,
        watermark: &DateTime<Utc>,
        stats: &mut Statistics,
    ) -> Result<(), SyncError> {
        let folder = self.options.remote_folder.as_str();

        // Oldest first: an aborted cycle must not leave a gap below the
        // watermark of the next one.
        let mut new_files = Vec::new();
        for name in snapshot.file_names() {
            let Some(created) = naming::canonical_instant(name) else {
                debug!("Ignoring '{name}'");
                stats.ignored += 1;
                continue;
            };
            if created > *watermark {
                new_files.push((created, name));
            }
        }
        new_files.sort_unstable();

        for (created, name) in new_files {
            let target = archive::archive_path(&self.options.archive_dir, &created, name);
            info!("Downloading {name} to {}", target.display());
            if self.options.dry_run {
                continue;
            }

            let bytes = match self.remote.download(&remote_path(folder, name)) {
                Ok(bytes) => bytes,
                Err(e) if e.is_vanished() => {
                    warn!("File '{name}' was deleted before we could download it");
                    stats.vanished += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            archive::store(&target, &bytes)?;
            debug!("Done downloading {name} ({} bytes)", bytes.len());
            stats.downloaded += 1;
        }

        Ok(())
    }

    fn delete_old_files(
        &self,
        snapshot: &FolderSnapshot,
        horizon: &DateTime<Utc>,
        stats: &mut Statistics,
    ) -> Result<(), SyncError> {
        let folder = self.options.remote_folder.as_str();

        for name in snapshot.file_names() {
            let Some(created) = naming::canonical_instant(name) else {
                continue;
            };
            if created > *horizon {
                continue;
            }

            info!("Deleting file '{name}'");
            if self.options.dry_run {
                continue;
            }

            match self.remote.delete(&remote_path(folder, name)) {
                Ok(()) => stats.deleted += 1,
                Err(e) if e.is_vanished() => {
                    warn!("File '{name}' was already deleted");
                    stats.vanished += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = SyncError::from(RemoteError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn other_errors_are_not_transient() {
        let err = SyncError::from(RemoteError::Api {
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        });
        assert!(!err.is_transient());
        assert!(!SyncError::from(anyhow::anyhow!("disk full")).is_transient());
    }

    #[test]
    fn statistics_fit_on_one_line() {
        let stats = Statistics {
            renamed: 1,
            downloaded: 2,
            deleted: 3,
            vanished: 4,
            ignored: 5,
        };
        assert_eq!(
            stats.to_string(),
            "renamed 1, downloaded 2, deleted 3, vanished 4, ignored 5"
        );
    }
}
