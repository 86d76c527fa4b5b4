//! Cross-process advisory mutex guarding ring metadata.
//!
//! POSIX gets an exclusive `flock(2)` on a lock file named after the ring,
//! kept open for the lifetime of the mutex. The lock file lives next to the
//! segments in the shared-memory directory. Acquisition is scoped: dropping
//! the guard releases the lock even on early return.
//!
//! Non-unix targets fall back to a process-wide lock keyed by name, which
//! serializes threads of one process only.

use std::fs::{File, OpenOptions};
use std::io;

use ivis_mmap::segment_path;

pub struct ShmMutex {
    file: File,
    #[cfg(not(unix))]
    name: String,
}

/// RAII guard; the lock is held until drop.
pub struct ShmMutexGuard<'a> {
    mutex: &'a ShmMutex,
}

impl ShmMutex {
    /// Opens (creating if needed) the lock file for the named ring.
    pub fn new(name: &str) -> io::Result<Self> {
        let path = segment_path(&format!("{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file,
            #[cfg(not(unix))]
            name: name.to_string(),
        })
    }

    /// Blocks until the exclusive lock is held.
    pub fn lock(&self) -> io::Result<ShmMutexGuard<'_>> {
        self.acquire()?;
        Ok(ShmMutexGuard { mutex: self })
    }

    #[cfg(unix)]
    fn acquire(&self) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(unix)]
    fn release(&self) {
        use std::os::unix::io::AsRawFd;
        // Best-effort; an unlock failure leaves the fd to be released on close.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }

    #[cfg(not(unix))]
    fn acquire(&self) -> io::Result<()> {
        fallback::acquire(&self.name);
        Ok(())
    }

    #[cfg(not(unix))]
    fn release(&self) {
        fallback::release(&self.name);
    }
}

impl Drop for ShmMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

#[cfg(not(unix))]
mod fallback {
    use std::collections::HashMap;
    use std::sync::{Condvar, Mutex, OnceLock};

    struct Table {
        held: Mutex<HashMap<String, bool>>,
        cv: Condvar,
    }

    fn table() -> &'static Table {
        static TABLE: OnceLock<Table> = OnceLock::new();
        TABLE.get_or_init(|| Table {
            held: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
        })
    }

    pub fn acquire(name: &str) {
        let t = table();
        let mut held = t.held.lock().unwrap();
        while *held.get(name).unwrap_or(&false) {
            held = t.cv.wait(held).unwrap();
        }
        held.insert(name.to_string(), true);
    }

    pub fn release(name: &str) {
        let t = table();
        t.held.lock().unwrap().insert(name.to_string(), false);
        t.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique(tag: &str) -> String {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("ivis_mutex_test_{tag}_{ts}")
    }

    #[test]
    fn lock_unlock_reacquire() {
        let name = unique("basic");
        let m = ShmMutex::new(&name).unwrap();
        {
            let _g = m.lock().unwrap();
        }
        // Released on drop; can be taken again.
        let _g = m.lock().unwrap();
        drop(_g);
        let _ = ivis_mmap::unlink_segment(&format!("{name}.lock"));
    }

    #[test]
    fn two_handles_serialize() {
        let name = unique("serial");
        let a = ShmMutex::new(&name).unwrap();
        let b = ShmMutex::new(&name).unwrap();
        let g = a.lock().unwrap();
        drop(g);
        let g = b.lock().unwrap();
        drop(g);
        let _ = ivis_mmap::unlink_segment(&format!("{name}.lock"));
    }
}
