//! PID File Lock
//!
//! The PID file carries the daemon's process id and an exclusive `flock(2)`
//! held for the daemon's whole life. The kernel drops the lock when the
//! process dies, so a leftover file without a lock is stale, never live.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::lifecycle::LifecycleError;

/// Interval between lock attempts while waiting for a previous owner
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// An exclusively locked PID file owned by this process
#[derive(Debug)]
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    /// Lock `path`, retrying until `timeout` elapses.
    ///
    /// Fails with [`LifecycleError::AlreadyRunning`] when another process
    /// keeps holding the lock. The file's contents are left untouched in that
    /// case.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LifecycleError> {
        // Detaching changes the working directory
        let path = std::path::absolute(path)?;
        let deadline = Instant::now() + timeout;
        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;

            if try_flock(&file, libc::LOCK_EX)? {
                // The previous owner unlinks the file before its lock drops,
                // so the inode we locked may no longer be the one at `path`
                if same_file(&file, &path)? {
                    debug!("Acquired PID lock {}", path.display());
                    return Ok(Self { file, path });
                }
                debug!("PID file {} was replaced while waiting, reopening", path.display());
                continue;
            }
            if Instant::now() >= deadline {
                return Err(LifecycleError::AlreadyRunning {
                    pid: read_pid(&path),
                    pid_file: path,
                });
            }
            std::thread::sleep(LOCK_RETRY_INTERVAL);
        }
    }

    /// Record `pid` as the lock owner, replacing any stale content
    pub fn write_pid(&mut self, pid: u32) -> Result<(), LifecycleError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", pid)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the PID file and drop the lock
    pub fn release(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove PID file {}: {}", self.path.display(), e);
        }
        // Closing the descriptor releases the flock
    }
}

/// Try to take a non-blocking flock of `operation` kind on `file`.
///
/// Returns `Ok(false)` when someone else holds a conflicting lock.
fn try_flock(file: &File, operation: libc::c_int) -> std::io::Result<bool> {
    let rc = unsafe { libc::flock(file.as_raw_fd(), operation | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

/// Whether `file` is still the inode linked at `path`
fn same_file(file: &File, path: &Path) -> std::io::Result<bool> {
    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(linked) => Ok(held.dev() == linked.dev() && held.ino() == linked.ino()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether some process currently holds the lock on `path`
pub fn is_locked(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return false,
    };
    match try_flock(&file, libc::LOCK_SH) {
        // We got it, so nobody holds an exclusive lock. Dropping the file
        // releases our probe lock.
        Ok(true) => false,
        Ok(false) => true,
        Err(e) => {
            warn!("Cannot probe lock on {}: {}", path.display(), e);
            false
        }
    }
}

/// PID recorded in `path`, if the file exists and holds a number
pub fn read_pid(path: &Path) -> Option<i32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok().filter(|pid| *pid > 0)
}

/// Check if a process with the given PID exists
pub fn process_exists(pid: i32) -> bool {
    // Signal 0 performs the permission and existence checks only
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// PID of the live lock owner, if any
pub fn running_pid(path: &Path) -> Option<i32> {
    if !is_locked(path) {
        return None;
    }
    read_pid(path).filter(|pid| process_exists(*pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pid_lock_acquire_release() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("test.pid");

        let mut lock = PidLock::acquire(&pid_path, Duration::ZERO).unwrap();
        lock.write_pid(std::process::id()).unwrap();
        assert!(pid_path.exists());
        assert!(is_locked(&pid_path));
        assert_eq!(read_pid(&pid_path), Some(std::process::id() as i32));
        assert_eq!(running_pid(&pid_path), Some(std::process::id() as i32));

        lock.release();
        assert!(!pid_path.exists());
        assert!(!is_locked(&pid_path));
    }

    #[test]
    fn second_acquire_fails_and_leaves_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("test.pid");

        let mut first = PidLock::acquire(&pid_path, Duration::ZERO).unwrap();
        first.write_pid(4242).unwrap();

        let started = Instant::now();
        let err = PidLock::acquire(&pid_path, Duration::from_millis(250)).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(250));
        match err {
            LifecycleError::AlreadyRunning { pid, .. } => assert_eq!(pid, Some(4242)),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "4242\n");

        first.release();
    }

    #[test]
    fn waiter_relocks_the_file_left_at_the_path() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("restart.pid");

        let mut old = PidLock::acquire(&pid_path, Duration::ZERO).unwrap();
        old.write_pid(1111).unwrap();

        let waiter_path = pid_path.clone();
        let waiter = std::thread::spawn(move || {
            let mut lock = PidLock::acquire(&waiter_path, Duration::from_secs(2)).unwrap();
            lock.write_pid(2222).unwrap();
            lock
        });

        // Let the waiter open the old file and start polling
        std::thread::sleep(Duration::from_millis(300));
        old.release();
        let new = waiter.join().unwrap();

        assert!(pid_path.exists());
        assert!(is_locked(&pid_path));
        assert_eq!(read_pid(&pid_path), Some(2222));
        assert!(matches!(
            PidLock::acquire(&pid_path, Duration::from_millis(200)),
            Err(LifecycleError::AlreadyRunning { pid: Some(2222), .. })
        ));

        new.release();
        assert!(!pid_path.exists());
    }

    #[test]
    fn stale_file_without_lock_is_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("stale.pid");
        std::fs::write(&pid_path, format!("{}\n", std::process::id())).unwrap();

        assert!(!is_locked(&pid_path));
        assert_eq!(running_pid(&pid_path), None);

        // A stale file is taken over and overwritten
        let mut lock = PidLock::acquire(&pid_path, Duration::ZERO).unwrap();
        lock.write_pid(7).unwrap();
        assert_eq!(read_pid(&pid_path), Some(7));
        lock.release();
    }

    #[test]
    fn read_pid_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("bad.pid");
        assert_eq!(read_pid(&pid_path), None);
        std::fs::write(&pid_path, "not a pid").unwrap();
        assert_eq!(read_pid(&pid_path), None);
        std::fs::write(&pid_path, "0").unwrap();
        assert_eq!(read_pid(&pid_path), None);
    }

    #[test]
    fn current_process_exists() {
        assert!(process_exists(std::process::id() as i32));
    }
}
