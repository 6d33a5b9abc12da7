//! Per-record exclusive locks backed by lock files.
//!
//! # Invariants
//! - At most one live `RecordLock` exists per id across threads and
//!   processes sharing the planning directory (`create_new` semantics).
//! - Dropping the guard releases the lock, unless the file no longer carries
//!   the guard's token.
//! - A lock file older than the stale window is considered abandoned and is
//!   broken once before retrying. Breaking renames the file aside first, so
//!   of two breakers only the one that moved the stale file proceeds.

use crate::model::id::ObjectId;
use crate::repo::{StoreError, StoreResult};
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Held lock on one record id.
#[derive(Debug)]
pub struct RecordLock {
    id: ObjectId,
    path: PathBuf,
    token: String,
}

impl RecordLock {
    pub fn id(&self) -> &ObjectId {
        &self.id
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if read_token(&self.path).as_deref() != Some(self.token.as_str()) {
            warn!(
                "event=record_unlock module=repo status=taken_over id={}",
                self.id
            );
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(
                "event=record_unlock module=repo status=error id={} error={}",
                self.id, err
            );
        }
    }
}

/// Attempts to take the lock for `id` inside `locks_dir`.
///
/// Returns `Ok(None)` when another holder owns a fresh lock.
pub fn try_lock(
    locks_dir: &Path,
    id: &ObjectId,
    stale_after: Duration,
) -> StoreResult<Option<RecordLock>> {
    fs::create_dir_all(locks_dir).map_err(StoreError::io("create lock dir"))?;
    let path = locks_dir.join(format!("{id}.lock"));

    for attempt in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let token = Uuid::new_v4().simple().to_string();
                // Second line (pid) is informational only.
                if let Err(err) = writeln!(file, "{token}\n{}", std::process::id()) {
                    let _ = fs::remove_file(&path);
                    return Err(StoreError::io("write lock")(err));
                }
                debug!("event=record_lock module=repo status=ok id={id}");
                return Ok(Some(RecordLock {
                    id: id.clone(),
                    path,
                    token,
                }));
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if attempt == 0 && is_stale(&path, stale_after) {
                    let observed = read_token(&path);
                    if break_stale(&path, observed.as_deref())? {
                        warn!("event=record_lock module=repo status=stale_broken id={id}");
                        continue;
                    }
                }
                debug!("event=record_lock module=repo status=busy id={id}");
                return Ok(None);
            }
            Err(err) => return Err(StoreError::io("create lock")(err)),
        }
    }
    Ok(None)
}

/// Moves the lock at `path` aside and deletes it if it still carries
/// `observed`. A fresh lock moved aside by mistake is linked back.
///
/// Returns `true` when the caller may retry `create_new`.
fn break_stale(path: &Path, observed: Option<&str>) -> StoreResult<bool> {
    let parked = path.with_extension(format!("lock.stale-{}", Uuid::new_v4().simple()));
    match fs::rename(path, &parked) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(StoreError::io("break stale lock")(err)),
    }

    if read_token(&parked).as_deref() == observed {
        remove_parked(&parked);
        return Ok(true);
    }

    let restored = fs::hard_link(&parked, path);
    remove_parked(&parked);
    match restored {
        Ok(()) => Ok(false),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            warn!("event=record_lock module=repo status=restore_lost");
            Ok(false)
        }
        Err(err) => Err(StoreError::io("restore lock")(err)),
    }
}

fn remove_parked(parked: &Path) {
    if let Err(err) = fs::remove_file(parked) {
        if err.kind() != ErrorKind::NotFound {
            warn!("event=record_lock module=repo status=error step=remove_parked error={err}");
        }
    }
}

fn read_token(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    Some(text.lines().next().unwrap_or_default().trim().to_string())
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > stale_after)
        .unwrap_or(false)
}
