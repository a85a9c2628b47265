//! Gadget controller
//!
//! Every function change runs the same sequence under one request lock:
//!
//! ```text
//! teardown ─► settle ─► validate (VID/PID) ─► link ─┬─► pull up now
//!                                                   └─► start monitor ─► wait for pull-up
//! ```
//!
//! The FunctionFS monitor session lives inside the request lock so a new
//! request always tears down whatever the previous one left running. The
//! gadget state sits behind a separate light lock: readers never wait on an
//! in-flight request and the monitor's observer can update it from its own
//! thread.

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::configfs::{read_usb_speed, ConfigFs};
use super::function::{parse_vendor_functions, FunctionSet};
use super::monitor::{FfsMonitor, FunctionsAppliedCallback};
use super::types::{GadgetState, UsbSpeed};
use super::vidpid::select_vid_pid;
use crate::config::{ConfigStore, GadgetConfig, VendorConfig};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

/// Endpoints the MTP/PTP responder exposes once its descriptors are written
const MTP_ENDPOINTS: &[&str] = &["ep1", "ep2", "ep3"];

/// Endpoints adbd exposes once its descriptors are written
const ADB_ENDPOINTS: &[&str] = &["ep1", "ep2"];

/// Functions linked from a fixed configfs directory, in link order
const FIXED_FUNCTIONS: &[(FunctionSet, &str)] = &[
    (FunctionSet::MIDI, "midi.gs5"),
    (FunctionSet::ACCESSORY, "accessory.gs2"),
    (FunctionSet::AUDIO_SOURCE, "audio_source.gs3"),
];

/// Owns the gadget and serializes function changes
pub struct GadgetController {
    configfs: ConfigFs,
    ffs_root: PathBuf,
    speed_path: PathBuf,
    disconnect_wait: Duration,
    config: ConfigStore,
    events: Arc<EventBus>,
    /// Request lock; also owns the monitor session of the last request
    monitor: Mutex<FfsMonitor>,
    state: Arc<RwLock<Tracked>>,
}

/// Gadget state tagged with the request that owns it
#[derive(Debug, Default)]
struct Tracked {
    state: GadgetState,
    generation: u64,
}

impl GadgetController {
    /// Create the controller for the gadget described by `gadget`
    ///
    /// Fails when the gadget skeleton (`os_desc/b.1`) is missing.
    pub fn new(gadget: &GadgetConfig, config: ConfigStore, events: Arc<EventBus>) -> Result<Self> {
        let configfs = ConfigFs::new(&gadget.configfs_path, &gadget.udc_name);
        if !configfs.is_available() {
            return Err(AppError::Config(format!(
                "ConfigFS gadget not found at {}",
                configfs.gadget_path().display()
            )));
        }

        let monitor = FfsMonitor::new(
            configfs.clone(),
            Duration::from_millis(gadget.pullup_delay_ms),
        );

        info!(
            "Gadget controller ready (gadget={}, udc={})",
            configfs.gadget_path().display(),
            configfs.udc_name()
        );

        Ok(Self {
            configfs,
            ffs_root: PathBuf::from(&gadget.ffs_path),
            speed_path: gadget.speed_path(),
            disconnect_wait: Duration::from_millis(gadget.disconnect_wait_ms),
            config,
            events,
            monitor: Mutex::new(monitor),
            state: Arc::new(RwLock::new(Tracked::default())),
        })
    }

    /// Snapshot of the requested functions and whether they are applied
    pub fn current_functions(&self) -> GadgetState {
        self.state.read().state
    }

    /// Link speed, read at call time
    pub fn usb_speed(&self) -> UsbSpeed {
        read_usb_speed(&self.speed_path)
    }

    /// Switch the gadget to `functions`
    ///
    /// Returns once the gadget is pulled up, or with `Timeout` when
    /// FunctionFS descriptors did not arrive in time. In that case the
    /// monitor stays armed and pulls up as soon as they do.
    pub async fn set_current_functions(&self, functions: FunctionSet, timeout: Duration) -> Result<()> {
        let mut monitor = self.monitor.lock().await;

        let generation = {
            let mut tracked = self.state.write();
            tracked.generation += 1;
            tracked.state = GadgetState {
                current_functions: functions,
                functions_applied: false,
            };
            tracked.generation
        };
        info!("Requested USB functions: {}", functions);
        self.events.publish(SystemEvent::FunctionsChanging { functions });

        let result = self.apply(&mut monitor, functions, generation, timeout).await;
        if let Err(e) = &result {
            error!("Failed to set USB functions {}: {}", functions, e);
            self.events.publish(SystemEvent::FunctionsFailed {
                functions,
                reason: e.to_string(),
            });
        }
        result
    }

    async fn apply(
        &self,
        monitor: &mut FfsMonitor,
        functions: FunctionSet,
        generation: u64,
        timeout: Duration,
    ) -> Result<()> {
        self.teardown(monitor)?;

        // Give the host time to notice the disconnect
        tokio::time::sleep(self.disconnect_wait).await;

        if functions.is_none() {
            info!("USB functions cleared, gadget left detached");
            return Ok(());
        }

        let vendor = self.config.get().vendor.clone();
        let vendor_functions = self.resolve_vendor_functions(&vendor).await?;

        let ids = select_vid_pid(functions, &vendor_functions, vendor.uvc_enabled)
            .map_err(|e| AppError::NotSupported(e.to_string()))?;
        self.configfs.set_vid_pid(ids)?;
        debug!("Using IDs {} for {}", ids, functions);

        let mut index = 0;
        let mut ffs_enabled = self.add_generic_android_functions(
            monitor,
            functions,
            &vendor,
            &vendor_functions,
            &mut index,
        )?;
        ffs_enabled |= self.add_adb(monitor, functions, &mut index)?;

        if !ffs_enabled {
            self.configfs.pull_up()?;
            info!("Gadget pulled up with {} functions", index);
            self.set_applied(functions, true);
            return Ok(());
        }

        monitor.register_functions_applied_callback(self.applied_observer(functions, generation));
        monitor.start()?;

        if monitor.wait_for_pull_up(timeout).await {
            // The observer has normally recorded this already
            self.state.write().state.functions_applied = true;
            Ok(())
        } else {
            Err(AppError::Timeout(timeout))
        }
    }

    /// Detach the gadget and drop everything the previous request set up
    fn teardown(&self, monitor: &mut FfsMonitor) -> Result<()> {
        // Also drops watches left by a request that failed before start()
        monitor.reset();
        self.configfs.reset_gadget()
    }

    /// Vendor function string for this boot, persisting it when required
    async fn resolve_vendor_functions(&self, vendor: &VendorConfig) -> Result<String> {
        let resolved = vendor.resolve_functions();
        if resolved.persist {
            info!("Persisting vendor USB config: {}", resolved.functions);
            let value = resolved.functions.clone();
            self.config
                .update(move |c| c.vendor.usb_config = value)
                .await?;
        }
        Ok(resolved.functions)
    }

    /// Link every function except ADB
    ///
    /// Returns whether a FunctionFS function (MTP or PTP) was linked.
    fn add_generic_android_functions(
        &self,
        monitor: &mut FfsMonitor,
        functions: FunctionSet,
        vendor: &VendorConfig,
        vendor_functions: &str,
        index: &mut usize,
    ) -> Result<bool> {
        let mut ffs_enabled = false;

        let ffs_name = if functions.contains(FunctionSet::MTP) {
            Some("mtp")
        } else if functions.contains(FunctionSet::PTP) {
            Some("ptp")
        } else {
            None
        };

        if let Some(name) = ffs_name {
            self.configfs.set_os_desc_use(true)?;
            self.watch_ffs(monitor, name, MTP_ENDPOINTS)?;
            self.link(&format!("ffs.{}", name), index)?;
            ffs_enabled = true;
        }

        for (flag, function) in FIXED_FUNCTIONS {
            if functions.contains(*flag) {
                self.link(function, index)?;
            }
        }

        if functions.contains(FunctionSet::RNDIS) {
            self.link(&vendor.rndis_function, index)?;
        }

        if functions.contains(FunctionSet::UVC) {
            self.link("uvc.0", index)?;
        }

        for function in parse_vendor_functions(vendor_functions) {
            self.link(function.configfs_name, index)?;
        }

        Ok(ffs_enabled)
    }

    /// ADB always takes the last link index
    fn add_adb(&self, monitor: &mut FfsMonitor, functions: FunctionSet, index: &mut usize) -> Result<bool> {
        if !functions.contains(FunctionSet::ADB) {
            return Ok(false);
        }

        self.watch_ffs(monitor, "adb", ADB_ENDPOINTS)?;
        self.link("ffs.adb", index)?;
        Ok(true)
    }

    fn watch_ffs(&self, monitor: &mut FfsMonitor, name: &str, endpoints: &[&str]) -> Result<()> {
        let dir = self.ffs_root.join(name);
        monitor.add_watch(&dir)?;
        for ep in endpoints {
            monitor.add_endpoint(dir.join(ep));
        }
        Ok(())
    }

    fn link(&self, function: &str, index: &mut usize) -> Result<()> {
        self.configfs.link_function(function, *index)?;
        *index += 1;
        Ok(())
    }

    fn set_applied(&self, functions: FunctionSet, applied: bool) {
        self.state.write().state.functions_applied = applied;
        self.events
            .publish(SystemEvent::FunctionsApplied { functions, applied });
    }

    /// Observer run on the monitor thread for every pull-up transition
    ///
    /// Only the request that registered it may touch the state. A later
    /// request, even for the same functions, bumps the generation first.
    fn applied_observer(&self, functions: FunctionSet, generation: u64) -> FunctionsAppliedCallback {
        let state = self.state.clone();
        let events = self.events.clone();
        Arc::new(move |applied| {
            {
                let mut tracked = state.write();
                if tracked.generation != generation {
                    debug!("Ignoring pull-up report from superseded request {}", generation);
                    return;
                }
                tracked.state.functions_applied = applied;
            }
            info!("Functions {} applied: {}", functions, applied);
            events.publish(SystemEvent::FunctionsApplied { functions, applied });
        })
    }

    /// Pull the gadget down and up again without touching its functions
    ///
    /// Does not take the request lock.
    pub async fn reset(&self) -> Result<()> {
        info!("USB gadget reset");

        self.configfs.pull_down().map_err(|e| {
            error!("Gadget cannot be pulled down: {}", e);
            AppError::PullDown
        })?;

        tokio::time::sleep(self.disconnect_wait).await;

        self.configfs.pull_up().map_err(|e| {
            error!("Gadget cannot be pulled up: {}", e);
            AppError::PullUp
        })?;

        self.events.publish(SystemEvent::GadgetReset);
        Ok(())
    }

    /// Stop the FunctionFS monitor before process exit
    pub async fn shutdown(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_running() {
            warn!("Stopping FunctionFS monitor on shutdown");
        }
        monitor.reset();
    }
}
