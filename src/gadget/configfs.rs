//! ConfigFS file operations for the USB gadget
//!
//! All paths hang off a single gadget directory (`/config/usb_gadget/g1` on
//! the target) so the whole layer can be pointed at a scratch tree.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::types::UsbSpeed;
use super::vidpid::VidPid;
use crate::error::{AppError, Result};

/// Configuration directory holding the function links
const CONFIG_NAME: &str = "configs/b.1";

/// Prefix of every function link inside the configuration
const FUNCTION_LINK_PREFIX: &str = "function";

/// Value written to `UDC` to detach the gadget
pub const PULL_DOWN_SENTINEL: &str = "none";

/// Handle on one gadget directory in ConfigFS
#[derive(Debug, Clone)]
pub struct ConfigFs {
    gadget_path: PathBuf,
    config_path: PathBuf,
    functions_path: PathBuf,
    udc_name: String,
}

impl ConfigFs {
    pub fn new(gadget_path: impl Into<PathBuf>, udc_name: &str) -> Self {
        let gadget_path = gadget_path.into();
        Self {
            config_path: gadget_path.join(CONFIG_NAME),
            functions_path: gadget_path.join("functions"),
            gadget_path,
            udc_name: udc_name.to_string(),
        }
    }

    /// Init scripts create `os_desc/b.1` once the gadget skeleton exists
    pub fn is_available(&self) -> bool {
        self.gadget_path.join("os_desc/b.1").exists()
    }

    pub fn gadget_path(&self) -> &Path {
        &self.gadget_path
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn udc_name(&self) -> &str {
        &self.udc_name
    }

    fn udc_path(&self) -> PathBuf {
        self.gadget_path.join("UDC")
    }

    /// Attach the gadget to the UDC
    pub fn pull_up(&self) -> Result<()> {
        write_file(&self.udc_path(), &self.udc_name)?;
        debug!("Gadget pulled up on {}", self.udc_name);
        Ok(())
    }

    /// Detach the gadget from the UDC
    pub fn pull_down(&self) -> Result<()> {
        write_file(&self.udc_path(), PULL_DOWN_SENTINEL)?;
        debug!("Gadget pulled down");
        Ok(())
    }

    /// Current content of the `UDC` attribute
    pub fn udc(&self) -> Result<String> {
        read_file(&self.udc_path())
    }

    /// Detach the gadget and remove every linked function
    ///
    /// The pull-down may fail when the gadget is already detached, so that
    /// failure is only logged.
    pub fn reset_gadget(&self) -> Result<()> {
        info!("setCurrentUsbFunctions None");

        if let Err(e) = self.pull_down() {
            warn!("Gadget cannot be pulled down: {}", e);
        }

        write_file(&self.gadget_path.join("bDeviceClass"), "0")?;
        write_file(&self.gadget_path.join("bDeviceSubClass"), "0")?;
        write_file(&self.gadget_path.join("bDeviceProtocol"), "0")?;
        self.set_os_desc_use(false)?;
        self.unlink_functions()
    }

    /// Remove every `function*` link from the configuration
    pub fn unlink_functions(&self) -> Result<()> {
        let entries = fs::read_dir(&self.config_path).map_err(|e| {
            AppError::Internal(format!(
                "Failed to read configuration {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().contains(FUNCTION_LINK_PREFIX) {
                continue;
            }
            remove_file(&entry.path())?;
        }

        Ok(())
    }

    /// Link `functions/<function>` into the configuration as `function<index>`
    pub fn link_function(&self, function: &str, index: usize) -> Result<()> {
        let src = self.functions_path.join(function);
        let dest = self
            .config_path
            .join(format!("{}{}", FUNCTION_LINK_PREFIX, index));
        create_symlink(&src, &dest)?;
        debug!("Linked {} as function{}", function, index);
        Ok(())
    }

    /// Names of the currently linked functions, ordered by link index
    pub fn linked_functions(&self) -> Result<Vec<String>> {
        let mut links: Vec<(usize, String)> = fs::read_dir(&self.config_path)?
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let index = name.strip_prefix(FUNCTION_LINK_PREFIX)?.parse().ok()?;
                let target = fs::read_link(entry.path()).ok()?;
                let target = target.file_name()?.to_string_lossy().to_string();
                Some((index, target))
            })
            .collect();
        links.sort_by_key(|(index, _)| *index);
        Ok(links.into_iter().map(|(_, target)| target).collect())
    }

    /// Write the vendor and product IDs
    pub fn set_vid_pid(&self, ids: VidPid) -> Result<()> {
        let (vid, pid) = ids.to_sysfs();
        write_file(&self.gadget_path.join("idVendor"), &vid)?;
        write_file(&self.gadget_path.join("idProduct"), &pid)?;
        Ok(())
    }

    /// Toggle Microsoft OS descriptors (needed by MTP/PTP on Windows hosts)
    pub fn set_os_desc_use(&self, enabled: bool) -> Result<()> {
        write_file(
            &self.gadget_path.join("os_desc/use"),
            if enabled { "1" } else { "0" },
        )
    }
}

/// Read the UDC link speed attribute
///
/// Unreadable files report `Unknown`.
pub fn read_usb_speed(path: &Path) -> UsbSpeed {
    match read_file(path) {
        Ok(value) => {
            info!("current USB speed is {}", value);
            UsbSpeed::from_sysfs(&value)
        }
        Err(e) => {
            warn!("Fail to read current speed: {}", e);
            UsbSpeed::Unknown
        }
    }
}

/// Write string content to a file
///
/// sysfs and configfs attributes are processed on the first write(), so the
/// complete buffer (including newline) goes out in a single call.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    // Plain O_WRONLY: O_TRUNC is rejected by some attributes
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .or_else(|e| {
            if path.exists() {
                Err(e)
            } else {
                File::create(path)
            }
        })
        .map_err(|e| AppError::Internal(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut buf = content.as_bytes().to_vec();
    if !content.ends_with('\n') {
        buf.push(b'\n');
    }

    file.write_all(&buf)
        .map_err(|e| AppError::Internal(format!("Failed to write to {}: {}", path.display(), e)))?;

    file.flush()
        .map_err(|e| AppError::Internal(format!("Failed to flush {}: {}", path.display(), e)))?;

    Ok(())
}

/// Read a single-line attribute
///
/// Only the first line counts. A configfs attribute holds one value, and a
/// shorter value written over a longer one in a plain file leaves a tail.
pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().next().unwrap_or_default().trim().to_string())
        .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", path.display(), e)))
}

/// Remove a file or symlink
pub fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| {
        AppError::Internal(format!("Unable to remove file {}: {}", path.display(), e))
    })
}

/// Create symlink
pub fn create_symlink(src: &Path, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dest).map_err(|e| {
        AppError::Internal(format!(
            "Cannot create symlink {} -> {}: {}",
            dest.display(),
            src.display(),
            e
        ))
    })
}

/// Scratch gadget tree for tests
#[cfg(test)]
pub(crate) fn scratch_gadget(root: &Path) -> ConfigFs {
    let gadget = root.join("g1");
    fs::create_dir_all(gadget.join("configs/b.1")).unwrap();
    fs::create_dir_all(gadget.join("functions")).unwrap();
    fs::create_dir_all(gadget.join("os_desc/b.1")).unwrap();
    ConfigFs::new(gadget, "dummy_udc.0")
}
