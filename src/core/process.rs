use anyhow::{Context, Result};

use crate::core::types::{Pid, Process};

pub trait ProcessRetry {
    fn new_with_retry(pid: Pid) -> Result<Process>;
}

impl ProcessRetry for remoteprocess::Process {
    // A process that was just started (or is being exec'd by a wrapper like rbenv) may not be
    // attachable yet, so retry for a few seconds before giving up.
    fn new_with_retry(pid: Pid) -> Result<Process> {
        let retry_interval = std::time::Duration::from_millis(10);
        let mut retries = 500;
        loop {
            match Process::new(pid) {
                Ok(p) => return Ok(p),
                Err(e) => {
                    if retries == 0 {
                        return Err(e)?;
                    }
                    std::thread::sleep(retry_interval);
                    retries -= 1;
                }
            }
        }
    }
}

/// Runs `f` with `process` stopped when `lock` is set. The process resumes when the lock guard
/// is dropped, which also happens if `f` panics.
pub fn with_process_locked<T, F: FnOnce() -> T>(process: &Process, lock: bool, f: F) -> Result<T> {
    if !lock {
        return Ok(f());
    }
    let mut retries = 20;
    let _lock = loop {
        match process.lock() {
            Ok(lock) => {
                debug!(
                    "Was able to lock process {}, {} retries remained",
                    process.pid, retries
                );
                break lock;
            }
            Err(e) => {
                if retries == 0 {
                    return Err(e).context(format!("locking process {}", process.pid));
                }
                debug!("Retrying lock of process {}: {}", process.pid, e);
                retries -= 1;
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
    };
    Ok(f())
}
