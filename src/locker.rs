//! Single-instance lock files
//!
//! A script takes `<dir>/<name>.lock` before doing any work. The file holds
//! the owner's name, PID and creation time. A lock older than its TTL, or
//! one whose PID no longer exists, is stale and gets replaced.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use crate::crypto;
use crate::error::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default lock lifetime
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3600);

/// Contents of a lock file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    #[serde(rename = "Script_name")]
    pub script_name: String,
    #[serde(rename = "Pid")]
    pub pid: u32,
    #[serde(rename = "Date")]
    pub date: String,
}

impl LockInfo {
    fn current(script_name: &str) -> Self {
        Self {
            script_name: script_name.to_string(),
            pid: std::process::id(),
            date: Local::now().format(DATE_FORMAT).to_string(),
        }
    }

    /// Age of the lock according to its recorded date
    fn age(&self) -> Option<Duration> {
        let created = NaiveDateTime::parse_from_str(&self.date, DATE_FORMAT).ok()?;
        let elapsed = Local::now().naive_local() - created;
        // A date in the future counts as brand new
        Some(elapsed.to_std().unwrap_or(Duration::ZERO))
    }
}

/// Outcome of inspecting an existing lock file
#[derive(Debug, PartialEq)]
enum LockState {
    Held(String),
    Stale(String),
}

/// PID-file based locker
#[derive(Debug, Clone)]
pub struct Locker {
    path: PathBuf,
    script_name: String,
}

impl Locker {
    pub fn new(path: impl Into<PathBuf>, script_name: &str) -> Self {
        Self {
            path: path.into(),
            script_name: script_name.to_string(),
        }
    }

    /// Locker for `<dir>/<script_name>.lock`
    pub fn for_script(dir: &Path, script_name: &str) -> Self {
        Self::new(dir.join(format!("{}.lock", script_name)), script_name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Take the lock, replacing a stale one
    pub fn lock(&self, ttl: Duration) -> Result<()> {
        tracing::info!("Check exist lock file in: {}", self.path.display());

        // Later passes only happen after a stale lock was moved away
        for _ in 0..3 {
            match self.try_create() {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.inspect(ttl) {
                    None => continue,
                    Some((LockState::Held(reason), _)) => return Err(self.held(&reason)),
                    Some((LockState::Stale(reason), seen)) => {
                        tracing::warn!("Removing stale lock file {}: {}", self.path.display(), reason);
                        if !self.evict(&seen)? {
                            return Err(self.held("lock file was taken over while removing the stale one"));
                        }
                    }
                },
                Err(e) => {
                    return Err(Error::Locker(format!(
                        "Can't create lock file {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }

        Err(Error::Locker(format!(
            "Lock file {} keeps reappearing",
            self.path.display()
        )))
    }

    fn held(&self, reason: &str) -> Error {
        tracing::error!("Another script already work! {}", reason);
        Error::Locker(format!(
            "Another script already work! Lock file {}: {}",
            self.path.display(),
            reason
        ))
    }

    /// Move the stale lock aside and delete it, provided it still holds
    /// the bytes judged stale. A lock file written in between by another
    /// process is linked back and `false` is returned.
    fn evict(&self, seen: &[u8]) -> Result<bool> {
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".stale.{}.{}", std::process::id(), crypto::rand_string(8)));
        let aside = PathBuf::from(aside);

        match std::fs::rename(&self.path, &aside) {
            Ok(()) => {}
            // Another process got there first; its fresh lock decides
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(Error::Locker(format!(
                    "Can't move stale lock file {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }

        let moved = std::fs::read(&aside).ok();
        let same = moved.as_deref() == Some(seen);
        if !same {
            // hard_link refuses to overwrite a lock created meanwhile
            if let Err(e) = std::fs::hard_link(&aside, &self.path) {
                tracing::warn!("Can't restore lock file {}: {}", self.path.display(), e);
            }
        }
        if let Err(e) = std::fs::remove_file(&aside) {
            tracing::warn!("Can't remove {}: {}", aside.display(), e);
        }
        Ok(same)
    }

    /// Take the lock and release it when the guard drops
    pub fn acquire(&self, ttl: Duration) -> Result<LockGuard> {
        self.lock(ttl)?;
        Ok(LockGuard {
            locker: self.clone(),
            release: true,
        })
    }

    /// Remove the lock file; a missing file only warns
    pub fn unlock(&self) -> Result<()> {
        tracing::info!("Try remove lock file: {}", self.path.display());
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("Warning! Lock file not found: {}", self.path.display());
                Ok(())
            }
            Err(e) => Err(Error::Locker(format!(
                "Can't remove lock file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Read the current lock file, if any
    pub fn read(&self) -> Result<Option<LockInfo>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn try_create(&self) -> std::io::Result<()> {
        tracing::info!("Try create lock file: {}", self.path.display());
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;

        let info = LockInfo::current(&self.script_name);
        let json = serde_json::to_string(&info)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()
    }

    /// Judge the current lock file; `None` when it vanished meanwhile.
    /// Also returns the bytes the verdict is based on.
    fn inspect(&self, ttl: Duration) -> Option<(LockState, Vec<u8>)> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => return Some((self.judge_by_mtime(&e.to_string(), ttl), Vec::new())),
        };

        let state = match serde_json::from_slice::<LockInfo>(&content) {
            Ok(info) => classify(&info, ttl, process_alive(info.pid)),
            Err(e) => self.judge_by_mtime(&e.to_string(), ttl),
        };
        Some((state, content))
    }

    /// Possibly mid-write by its owner: trust the mtime
    fn judge_by_mtime(&self, problem: &str, ttl: Duration) -> LockState {
        let age = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .unwrap_or(Duration::ZERO);
        if age < ttl {
            LockState::Held(format!("unreadable lock file ({}), {:?} old", problem, age))
        } else {
            LockState::Stale(format!("unreadable lock file ({})", problem))
        }
    }
}

fn classify(info: &LockInfo, ttl: Duration, alive: bool) -> LockState {
    let age = match info.age() {
        Some(age) => age,
        None => return LockState::Stale(format!("bad date {:?}", info.date)),
    };

    if age >= ttl {
        LockState::Stale(format!("created at {}, older than {:?}", info.date, ttl))
    } else if !alive {
        LockState::Stale(format!("process {} is gone", info.pid))
    } else {
        LockState::Held(format!(
            "{:?} (pid {}) created it at {}, less than {:?} ago",
            info.script_name, info.pid, info.date, ttl
        ))
    }
}

fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    sys.refresh_process(pid) && sys.process(pid).is_some()
}

/// Releases the lock on drop
#[derive(Debug)]
pub struct LockGuard {
    locker: Locker,
    release: bool,
}

impl LockGuard {
    pub fn locker(&self) -> &Locker {
        &self.locker
    }

    /// Drop the guard but leave the lock file until its TTL runs out
    pub fn keep(mut self) {
        self.release = false;
        tracing::warn!("Lock file kept: {}", self.locker.path.display());
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.release {
            return;
        }
        if let Err(e) = self.locker.unlock() {
            tracing::error!("Failed to release lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_aged(secs: i64) -> LockInfo {
        LockInfo {
            script_name: "report".into(),
            pid: 1,
            date: (Local::now() - chrono::Duration::seconds(secs))
                .format(DATE_FORMAT)
                .to_string(),
        }
    }

    #[test]
    fn test_lock_and_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::for_script(dir.path(), "report");
        assert_eq!(locker.path(), dir.path().join("report.lock"));

        locker.lock(DEFAULT_LOCK_TTL).unwrap();
        let info = locker.read().unwrap().unwrap();
        assert_eq!(info.script_name, "report");
        assert_eq!(info.pid, std::process::id());

        let raw = std::fs::read_to_string(locker.path()).unwrap();
        assert!(raw.contains("\"Script_name\""));
        assert!(raw.contains("\"Pid\""));

        locker.unlock().unwrap();
        assert!(locker.read().unwrap().is_none());
        // Second unlock only warns
        locker.unlock().unwrap();
    }

    #[test]
    fn test_second_lock_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::for_script(dir.path(), "report");
        locker.lock(DEFAULT_LOCK_TTL).unwrap();

        let other = Locker::for_script(dir.path(), "report");
        let err = other.lock(DEFAULT_LOCK_TTL).unwrap_err();
        assert!(matches!(err, Error::Locker(_)));
        assert!(err.is_critical());
    }

    #[test]
    fn test_expired_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::for_script(dir.path(), "report");
        let old = info_aged(7200);
        std::fs::write(locker.path(), serde_json::to_string(&old).unwrap()).unwrap();

        locker.lock(DEFAULT_LOCK_TTL).unwrap();
        assert_eq!(locker.read().unwrap().unwrap().pid, std::process::id());
    }

    #[test]
    fn test_classify() {
        let ttl = Duration::from_secs(3600);
        assert!(matches!(classify(&info_aged(10), ttl, true), LockState::Held(_)));
        assert!(matches!(classify(&info_aged(10), ttl, false), LockState::Stale(_)));
        assert!(matches!(classify(&info_aged(4000), ttl, true), LockState::Stale(_)));

        let mut garbage = info_aged(0);
        garbage.date = "yesterday".into();
        assert!(matches!(classify(&garbage, ttl, true), LockState::Stale(_)));
    }

    #[test]
    fn test_corrupt_fresh_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::for_script(dir.path(), "report");
        std::fs::write(locker.path(), "{not json").unwrap();

        assert!(locker.lock(DEFAULT_LOCK_TTL).is_err());
        assert!(locker.lock(Duration::ZERO).is_ok());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::for_script(dir.path(), "report");
        {
            let guard = locker.acquire(DEFAULT_LOCK_TTL).unwrap();
            assert!(guard.locker().path().exists());
        }
        assert!(!locker.path().exists());
    }

    #[test]
    fn test_kept_guard_leaves_lock() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::for_script(dir.path(), "report");
        locker.acquire(DEFAULT_LOCK_TTL).unwrap().keep();
        assert!(locker.path().exists());
        assert!(locker.lock(DEFAULT_LOCK_TTL).is_err());
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".stale."))
            .collect()
    }

    #[test]
    fn test_stale_lock_taken_over_meanwhile_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::for_script(dir.path(), "report");
        std::fs::write(locker.path(), serde_json::to_string(&info_aged(7200)).unwrap()).unwrap();

        let (state, seen) = locker.inspect(DEFAULT_LOCK_TTL).unwrap();
        assert!(matches!(state, LockState::Stale(_)));

        // Another process replaces the stale lock before we remove it
        let fresh = LockInfo::current("report");
        std::fs::write(locker.path(), serde_json::to_string(&fresh).unwrap()).unwrap();

        assert!(!locker.evict(&seen).unwrap());
        assert_eq!(locker.read().unwrap(), Some(fresh));
        assert!(leftovers(dir.path()).is_empty());
        assert!(locker.lock(DEFAULT_LOCK_TTL).is_err());
    }

    #[test]
    fn test_evict_removes_unchanged_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::for_script(dir.path(), "report");
        std::fs::write(locker.path(), serde_json::to_string(&info_aged(7200)).unwrap()).unwrap();

        let (_, seen) = locker.inspect(DEFAULT_LOCK_TTL).unwrap();
        assert!(locker.evict(&seen).unwrap());
        assert!(!locker.path().exists());
        assert!(leftovers(dir.path()).is_empty());

        // Already gone: nothing to move, the caller just retries
        assert!(locker.evict(&seen).unwrap());
        assert!(locker.inspect(DEFAULT_LOCK_TTL).is_none());
    }
}
