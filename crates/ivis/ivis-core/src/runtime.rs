use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Cooperative stop flag shared by every loop in a process.
///
/// `install` registers interrupt/terminate handlers that flip the flag;
/// loops poll `should_continue` once per iteration. Clones share the flag,
/// so background threads can hold their own handle.
#[derive(Clone)]
pub struct Runtime {
    stop: Arc<AtomicBool>,
}

impl Runtime {
    /// Creates the runtime and installs signal handlers.
    ///
    /// May only be called once per process (the handler registration is
    /// global). Returns an error if a handler is already installed.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            info!("stop signal received");
            flag.store(true, Ordering::SeqCst);
        })?;
        Ok(Self { stop })
    }

    /// A runtime without signal handlers, for tests and embedded use.
    pub fn manual() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_stop_flag() {
        let rt = Runtime::manual();
        assert!(rt.should_continue());
        let clone = rt.clone();
        clone.request_stop();
        assert!(!rt.should_continue());
    }
}
