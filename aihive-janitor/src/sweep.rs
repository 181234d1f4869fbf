//! The Janitor sweep: removes staged input files no longer referenced
//! by a live job, and deletes `manager` rows that have sat `pending` with no
//! task ever dispatched. Safe to run back to back, or overlap
//! with itself, since every step is a delete-if-condition-holds keyed by id.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use aihive_common::job_store::JobStore;
use aihive_common::staging::job_id_from_filename;

pub struct SweepConfig {
    pub staging_root: PathBuf,
    pub retention: Duration,
    pub stale_pending: Duration,
}

/// Runs one full sweep: the stale-`pending`-row cleanup first, then the
/// staged-file sweep (a row deleted in the first pass makes its staged file
/// an orphan that the second pass then removes).
pub async fn run_once(store: &JobStore, config: &SweepConfig) {
    let now = Utc::now();

    sweep_stale_pending(store, now - config.stale_pending).await;
    sweep_staging_files(store, &config.staging_root, now - config.retention).await;
}

async fn sweep_stale_pending(store: &JobStore, cutoff: DateTime<Utc>) {
    let stale = match store.stale_pending_before(cutoff).await {
        Ok(rows) => rows,
        Err(error) => {
            warn!(%error, "failed to list stale pending jobs");
            return;
        }
    };

    for job in stale {
        info!(id = %job.id, "deleting abandoned pending job, no task was ever dispatched");
        if let Err(error) = store.delete(job.id).await {
            warn!(%error, id = %job.id, "failed to delete abandoned pending job");
        }
    }
}

async fn sweep_staging_files(store: &JobStore, staging_root: &Path, retention_cutoff: DateTime<Utc>) {
    let expired_terminal: HashSet<Uuid> = match store.terminal_before(retention_cutoff).await {
        Ok(rows) => rows.into_iter().map(|job| job.id).collect(),
        Err(error) => {
            warn!(%error, "failed to list terminal jobs past retention");
            return;
        }
    };

    let files = match walk_staging_files(staging_root).await {
        Ok(files) => files,
        Err(error) => {
            warn!(%error, root = %staging_root.display(), "failed to walk staging root");
            return;
        }
    };

    for path in files {
        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        let Some(id) = job_id_from_filename(filename) else {
            warn!(path = %path.display(), "staged file name has no job id prefix, leaving in place");
            continue;
        };

        let should_remove = if expired_terminal.contains(&id) {
            true
        } else {
            match store.exists(id).await {
                Ok(exists) => !exists,
                Err(error) => {
                    warn!(%error, %id, "failed to check job existence, leaving file in place");
                    false
                }
            }
        };

        if should_remove {
            info!(path = %path.display(), %id, "removing staged file");
            if let Err(error) = tokio::fs::remove_file(&path).await {
                warn!(%error, path = %path.display(), "failed to remove staged file");
            }
        }
    }
}

async fn walk_staging_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut stack = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
            Err(error) => return Err(error),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    Ok(files)
}

/// Computes how long to sleep from `now` until `schedule`'s next fire time,
/// interpreted in `tz` (daily, configurable, default 02:00 in a fixed time
/// zone).
pub fn time_until_next_fire(
    schedule: &cron::Schedule,
    tz: chrono_tz::Tz,
    now: DateTime<Utc>,
) -> std::time::Duration {
    let local_now = now.with_timezone(&tz);
    let next = schedule
        .after(&local_now)
        .next()
        .unwrap_or_else(|| local_now + Duration::days(1));

    let delta = next.with_timezone(&Utc) - now;
    delta.to_std().unwrap_or(std::time::Duration::from_secs(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn schedule_fires_at_the_configured_hour() {
        let schedule = cron::Schedule::from_str("0 0 2 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 1, 0, 0).unwrap();
        let delay = time_until_next_fire(&schedule, chrono_tz::UTC, now);
        assert_eq!(delay.as_secs(), 3600);
    }

    #[test]
    fn schedule_rolls_over_to_the_next_day_once_past() {
        let schedule = cron::Schedule::from_str("0 0 2 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 3, 0, 0).unwrap();
        let delay = time_until_next_fire(&schedule, chrono_tz::UTC, now);
        assert_eq!(delay.as_secs(), 23 * 3600);
    }
}
