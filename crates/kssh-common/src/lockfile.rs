//! Cross-process exclusive lock backed by a lock file.
//!
//! The lock is held while the file exists; it is created with
//! `create_new` and removed when the guard drops, on every exit path.
//! Lock files older than the stale threshold are treated as left behind
//! by a crashed holder and broken. Breaking renames the file aside first,
//! so two waiters that both saw it stale cannot remove each other's lock.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Pause between acquisition attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Age after which a lock file is considered abandoned.
const STALE_AFTER: Duration = Duration::from_secs(120);

/// Held lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Block until the lock at `path` is acquired or `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        break_stale(path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::WouldBlock,
                            format!("timed out waiting for lock {}", path.display()),
                        ));
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Move a stale lock aside and delete it. Only one waiter wins the rename;
/// if what it moved turns out to be fresh (re-created after our staleness
/// check), it is put back.
fn break_stale(path: &Path) {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".stale.{}.{}", std::process::id(), uuid::Uuid::now_v7().simple()));
    let aside = path.with_file_name(name);

    if std::fs::rename(path, &aside).is_err() {
        // Another waiter moved it first.
        return;
    }
    if !is_stale(&aside) {
        // `hard_link` refuses to overwrite, so a lock taken in between wins.
        let _ = std::fs::hard_link(&aside, path);
    }
    let _ = std::fs::remove_file(&aside);
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > STALE_AFTER)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");

        {
            let guard = LockFile::acquire(&path, Duration::from_secs(1)).unwrap();
            assert!(guard.path().exists());
        }
        assert!(!path.exists());
        let _again = LockFile::acquire(&path, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");

        let _held = LockFile::acquire(&path, Duration::from_secs(1)).unwrap();
        let err = LockFile::acquire(&path, Duration::from_millis(60)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    fn age(path: &Path, by: Duration) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn abandoned_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        std::fs::write(&path, "99999\n").unwrap();
        age(&path, STALE_AFTER * 2);

        let guard = LockFile::acquire(&path, Duration::from_millis(200)).unwrap();
        let owner = std::fs::read_to_string(guard.path()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
        // Nothing is left beside the lock.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn fresh_lock_moved_aside_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        std::fs::write(&path, "1\n").unwrap();

        // A waiter that judged the lock stale just before it was re-taken.
        break_stale(&path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn stale_lock_is_broken_once_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("x.lock"));
        std::fs::write(path.as_ref(), "99999\n").unwrap();
        age(&path, STALE_AFTER * 2);

        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = Arc::clone(&path);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    let _guard = LockFile::acquire(&path, Duration::from_secs(5)).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
    }

    #[test]
    fn lock_serializes_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("x.lock"));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = Arc::clone(&path);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    let _guard = LockFile::acquire(&path, Duration::from_secs(5)).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
