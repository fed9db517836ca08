//! Advisory exclusive locks on dedicated sibling lock files.
//!
//! Locks are taken with `flock(2)` on `<stem>.lock`, never on the data file
//! itself: the data file is replaced by rename on every write, so a lock held
//! on it would not survive the first update. `flock` locks belong to the open
//! file description, which makes them exclusive between processes as well as
//! between threads that open the lock file separately.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;

use super::error::{LockHolder, StoreError};

/// Default interval between non-blocking acquisition attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long a writer is willing to wait for a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// `None` blocks until the lock is free
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl LockPolicy {
    /// Bounded waiting with the default poll interval
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Exclusive lock held for as long as the guard lives.
///
/// The lock is released when the guard is dropped, whether the critical
/// section returned normally, bailed out early with `?`, or panicked.
pub struct LockGuard {
    _file: Flock<File>,
    path: PathBuf,
    acquired_at: Instant,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl LockGuard {
    /// Acquire an exclusive lock on `path`, creating the lock file if needed
    pub fn acquire(path: &Path, policy: &LockPolicy) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;

        let arg = match policy.timeout {
            None => FlockArg::LockExclusive,
            Some(_) => FlockArg::LockExclusiveNonblock,
        };

        let started = Instant::now();
        let mut lock = loop {
            let (returned, errno) = match Flock::lock(file, arg) {
                Ok(lock) => break lock,
                Err(failed) => failed,
            };
            file = returned;

            if errno == Errno::EINTR {
                continue;
            }
            let timeout = match policy.timeout {
                Some(timeout) if errno == Errno::EWOULDBLOCK => timeout,
                _ => return Err(StoreError::io(path, errno.into())),
            };

            let waited = started.elapsed();
            if waited >= timeout {
                let holder = read_holder(&mut file);
                warn!(
                    "Gave up on lock {} after {:?} ({:?})",
                    path.display(),
                    waited,
                    holder
                );
                return Err(StoreError::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                    holder,
                });
            }
            thread::sleep(policy.poll_interval.min(timeout - waited));
        };

        let waited = started.elapsed();
        if waited > Duration::from_secs(1) {
            warn!("Waited {:?} for lock {}", waited, path.display());
        } else {
            debug!("Acquired lock {} after {:?}", path.display(), waited);
        }

        // Record ourselves as holder so a starved waiter can report who to look at
        if let Err(e) = write_holder(&mut lock) {
            debug!("Could not record lock holder in {}: {}", path.display(), e);
        }

        Ok(Self {
            _file: lock,
            path: path.to_path_buf(),
            acquired_at: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    // `_file` unlocks on its own drop, right after this runs
    fn drop(&mut self) {
        debug!(
            "Released lock {} after {:?}",
            self.path.display(),
            self.acquired_at.elapsed()
        );
    }
}

/// Run `f` while holding the exclusive lock at `lock_path`
pub fn with_exclusive_lock<T, F>(lock_path: &Path, policy: &LockPolicy, f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError>,
{
    let _guard = LockGuard::acquire(lock_path, policy)?;
    f()
}

fn write_holder(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.flush()
}

fn read_holder(file: &mut File) -> Option<LockHolder> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    let pid: u32 = content.trim().parse().ok()?;
    Some(LockHolder {
        pid,
        alive: process_alive(pid),
    })
}

/// Signal-less `kill` checks existence; EPERM still means the process exists
fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(errno) => errno == Errno::EPERM,
    }
}
