//! FunctionFS descriptor monitor
//!
//! User-space daemons (adbd, MtpServer) write their USB descriptors into a
//! FunctionFS mount; the kernel then creates the endpoint files. The gadget
//! may only be pulled up once every endpoint exists, and it drops off the
//! bus again when a daemon dies and its endpoints vanish.
//!
//! The watcher runs on its own thread, blocked in `poll()` on an inotify
//! instance plus a stop pipe. It performs the pull-up write itself and then
//! signals waiters through a `watch` channel, which is independent of the
//! controller's request lock.

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use parking_lot::Mutex;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::configfs::ConfigFs;
use crate::error::{AppError, Result};

/// Observer invoked on every applied/not-applied transition
///
/// Runs on the watcher thread; it must not block or take the controller lock.
pub type FunctionsAppliedCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// State shared between the monitor handle and its watcher thread
struct Shared {
    pulled_up: watch::Sender<bool>,
    callback: Mutex<Option<FunctionsAppliedCallback>>,
}

impl Shared {
    /// Observer runs before waiters wake, so a returned wait always sees
    /// the updated gadget state
    fn set_applied(&self, applied: bool) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(applied);
        }
        self.pulled_up.send_replace(applied);
    }
}

struct Worker {
    handle: JoinHandle<()>,
    stop_tx: File,
}

/// Monitor session for the FunctionFS functions of one setup attempt
pub struct FfsMonitor {
    configfs: ConfigFs,
    pullup_delay: Duration,
    inotify: Option<Inotify>,
    watch_dirs: Vec<PathBuf>,
    endpoints: Vec<PathBuf>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl FfsMonitor {
    pub fn new(configfs: ConfigFs, pullup_delay: Duration) -> Self {
        let (pulled_up, _) = watch::channel(false);
        Self {
            configfs,
            pullup_delay,
            inotify: None,
            watch_dirs: Vec::new(),
            endpoints: Vec::new(),
            shared: Arc::new(Shared {
                pulled_up,
                callback: Mutex::new(None),
            }),
            worker: None,
        }
    }

    /// Watch a FunctionFS mount for descriptor activity
    pub fn add_watch(&mut self, dir: &Path) -> Result<()> {
        if self.worker.is_some() {
            return Err(AppError::Internal(
                "Cannot add FunctionFS watch while monitor is running".to_string(),
            ));
        }

        let inotify = match self.inotify.take() {
            Some(inotify) => inotify,
            None => Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK).map_err(|e| {
                AppError::Internal(format!("Failed to create inotify instance: {}", e))
            })?,
        };

        let result = inotify.add_watch(dir, AddWatchFlags::IN_ALL_EVENTS);
        self.inotify = Some(inotify);
        result.map_err(|e| {
            AppError::Internal(format!("Failed to watch {}: {}", dir.display(), e))
        })?;

        self.watch_dirs.push(dir.to_path_buf());
        Ok(())
    }

    /// Require an endpoint file before the gadget is pulled up
    pub fn add_endpoint(&mut self, endpoint: impl Into<PathBuf>) {
        self.endpoints.push(endpoint.into());
    }

    /// Install the applied-state observer, replacing any previous one
    pub fn register_functions_applied_callback(&self, callback: FunctionsAppliedCallback) {
        *self.shared.callback.lock() = Some(callback);
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    #[cfg(test)]
    fn watch_dirs(&self) -> &[PathBuf] {
        &self.watch_dirs
    }

    #[cfg(test)]
    fn endpoints(&self) -> &[PathBuf] {
        &self.endpoints
    }

    /// Start the watcher thread
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            info!("FunctionFS monitor already running");
            return Ok(());
        }

        let inotify = match self.inotify.take() {
            Some(inotify) => inotify,
            None => Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK).map_err(|e| {
                AppError::Internal(format!("Failed to create inotify instance: {}", e))
            })?,
        };

        let (stop_rx, stop_tx) = nix::unistd::pipe()
            .map_err(|e| AppError::Internal(format!("Failed to create stop pipe: {}", e)))?;

        let watcher = Watcher {
            inotify,
            stop_rx,
            endpoints: self.endpoints.clone(),
            configfs: self.configfs.clone(),
            pullup_delay: self.pullup_delay,
            shared: self.shared.clone(),
        };

        let handle = thread::Builder::new()
            .name("ffs-monitor".to_string())
            .spawn(move || watcher.run())?;

        self.worker = Some(Worker {
            handle,
            stop_tx: File::from(stop_tx),
        });
        info!(
            "FunctionFS monitor started ({} endpoints)",
            self.endpoints.len()
        );
        Ok(())
    }

    /// Wait until the watcher has pulled the gadget up
    ///
    /// Returns false on timeout; the watcher keeps running so descriptors
    /// written later still bring the gadget up.
    pub async fn wait_for_pull_up(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.pulled_up.subscribe();
        let pulled_up = tokio::time::timeout(timeout, rx.wait_for(|up| *up))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

        if pulled_up {
            info!("FunctionFS monitor signalled pull-up");
        } else {
            warn!("FunctionFS monitor did not pull up within {:?}", timeout);
        }
        pulled_up
    }

    /// Whether the watcher currently has the gadget pulled up
    pub fn is_pulled_up(&self) -> bool {
        *self.shared.pulled_up.borrow()
    }

    /// Stop the watcher and release every watch
    ///
    /// Safe to call when not running.
    pub fn reset(&mut self) {
        // A watcher finishing its pull-up while we join must not report
        // to the next request
        *self.shared.callback.lock() = None;

        if let Some(mut worker) = self.worker.take() {
            if let Err(e) = worker.stop_tx.write_all(&[1]) {
                error!("Failed to signal FunctionFS monitor: {}", e);
            }
            drop(worker.stop_tx);
            if worker.handle.join().is_err() {
                error!("FunctionFS monitor thread panicked");
            }
            info!("FunctionFS monitor stopped");
        } else {
            debug!("FunctionFS monitor not running");
        }

        // Dropping the inotify instance removes its watches
        self.inotify = None;
        self.watch_dirs.clear();
        self.endpoints.clear();
        self.shared.pulled_up.send_replace(false);
    }
}

impl Drop for FfsMonitor {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Watcher thread context
struct Watcher {
    inotify: Inotify,
    stop_rx: OwnedFd,
    endpoints: Vec<PathBuf>,
    configfs: ConfigFs,
    pullup_delay: Duration,
    shared: Arc<Shared>,
}

impl Watcher {
    fn endpoints_present(&self) -> bool {
        match self.endpoints.iter().find(|ep| !ep.exists()) {
            Some(missing) => {
                debug!("{} absent", missing.display());
                false
            }
            None => true,
        }
    }

    /// Sleep for the pull-up delay unless stopped first
    ///
    /// Returns true when the stop pipe fired.
    fn delay_interrupted(&self) -> bool {
        let deadline = Instant::now() + self.pullup_delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let timeout_ms = remaining.as_millis().clamp(1, u16::MAX as u128) as u16;
            let mut fds = [PollFd::new(self.stop_rx.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Ok(0) => {}
                Ok(_) => return true,
                Err(Errno::EINTR) => {}
                Err(e) => {
                    warn!("FunctionFS monitor delay poll failed: {}", e);
                    thread::sleep(remaining);
                    return false;
                }
            }
        }
    }

    fn pull_up(&self) -> bool {
        match self.configfs.pull_up() {
            Ok(()) => {
                info!("Gadget pulled up");
                self.shared.set_applied(true);
                true
            }
            Err(e) => {
                error!("FunctionFS endpoints ready but pull-up failed: {}", e);
                false
            }
        }
    }

    fn run(self) {
        let mut pulled_up = false;
        let mut disconnected_at: Option<Instant> = None;

        // Descriptors may already be written (daemon started earlier)
        if self.endpoints_present() {
            if self.delay_interrupted() {
                debug!("FunctionFS monitor stopped during pull-up delay");
                return;
            }
            pulled_up = self.pull_up();
        }

        loop {
            let mut fds = [
                PollFd::new(self.inotify.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.stop_rx.as_fd(), PollFlags::POLLIN),
            ];

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("FunctionFS monitor poll failed: {}", e);
                    break;
                }
            }

            let stop = fds[1].revents().is_some_and(|r| !r.is_empty());
            let ready = fds[0]
                .revents()
                .is_some_and(|r| r.contains(PollFlags::POLLIN));

            if stop {
                debug!("FunctionFS monitor signalled to exit");
                break;
            }
            if !ready {
                continue;
            }

            let events = match self.inotify.read_events() {
                Ok(events) => events,
                Err(Errno::EAGAIN) => continue,
                Err(e) => {
                    warn!("Failed to read inotify events: {}", e);
                    continue;
                }
            };
            for event in &events {
                debug!("inotify {:?} {:?}", event.mask, event.name);
            }

            let present = self.endpoints_present();
            if !present && pulled_up {
                info!("FunctionFS endpoints went away, gadget no longer applied");
                pulled_up = false;
                disconnected_at = Some(Instant::now());
                self.shared.set_applied(false);
            } else if present && !pulled_up {
                if disconnected_at.is_some_and(|at| at.elapsed() < self.pullup_delay)
                    && self.delay_interrupted()
                {
                    debug!("FunctionFS monitor stopped during pull-up delay");
                    break;
                }
                pulled_up = self.pull_up();
            }
        }
    }
}
