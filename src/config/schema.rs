use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Boot modes that bring up the radio debug functions by default
const RADIO_BOOT_MODES: &[&str] = &["usbradio", "factory", "ffbm-00", "ffbm-01", "usbuwb"];

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Gadget paths and timings
    pub gadget: GadgetConfig,
    /// Vendor properties (build type, boot mode, vendor function list)
    pub vendor: VendorConfig,
    /// Web server settings
    pub web: WebConfig,
}

/// Gadget paths and timings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GadgetConfig {
    /// UDC name written to the `UDC` attribute to pull the gadget up
    pub udc_name: String,
    /// Gadget directory in ConfigFS
    pub configfs_path: String,
    /// FunctionFS mount root
    pub ffs_path: String,
    /// Link speed attribute (defaults to the UDC's `current_speed`)
    pub speed_path: Option<String>,
    /// Time the gadget stays pulled down so the host notices the disconnect
    pub disconnect_wait_ms: u64,
    /// Delay between FunctionFS endpoints appearing and the pull-up
    pub pullup_delay_ms: u64,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            udc_name: "a600000.dwc3".to_string(),
            configfs_path: "/config/usb_gadget/g1".to_string(),
            ffs_path: "/dev/usb-ffs".to_string(),
            speed_path: None,
            disconnect_wait_ms: 100,
            pullup_delay_ms: 500,
        }
    }
}

impl GadgetConfig {
    pub fn speed_path(&self) -> PathBuf {
        match &self.speed_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("/sys/class/udc")
                .join(&self.udc_name)
                .join("current_speed"),
        }
    }
}

/// Vendor properties consulted on every function change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VendorConfig {
    /// Build type ("user", "userdebug", "eng")
    pub build_type: String,
    /// Boot mode reported by the bootloader
    pub boot_mode: String,
    /// Current vendor function list (e.g., "diag,serial_cdev")
    pub usb_config: String,
    /// Persisted vendor function list used in radio boot modes
    pub persist_usb_config: String,
    /// ConfigFS function linked for RNDIS
    pub rndis_function: String,
    /// Whether the UVC function may be exposed
    pub uvc_enabled: bool,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            build_type: "userdebug".to_string(),
            boot_mode: String::new(),
            usb_config: String::new(),
            persist_usb_config: String::new(),
            rndis_function: "gsi.rndis".to_string(),
            uvc_enabled: false,
        }
    }
}

/// Resolved vendor function string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVendorFunctions {
    pub functions: String,
    /// Set when the value must be written back to `usb_config`
    pub persist: bool,
}

impl VendorConfig {
    /// Work out the vendor function list for the current boot
    pub fn resolve_functions(&self) -> ResolvedVendorFunctions {
        if self.build_type == "user" {
            return ResolvedVendorFunctions {
                functions: "user".to_string(),
                persist: false,
            };
        }

        if !self.usb_config.is_empty() {
            return ResolvedVendorFunctions {
                functions: self.usb_config.clone(),
                persist: false,
            };
        }

        if RADIO_BOOT_MODES.contains(&self.boot_mode.as_str()) {
            let functions = if self.persist_usb_config.is_empty() {
                "diag".to_string()
            } else {
                self.persist_usb_config.clone()
            };
            return ResolvedVendorFunctions {
                functions,
                persist: true,
            };
        }

        ResolvedVendorFunctions {
            functions: String::new(),
            persist: false,
        }
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_build_hides_vendor_functions() {
        let vendor = VendorConfig {
            build_type: "user".to_string(),
            usb_config: "diag".to_string(),
            ..Default::default()
        };
        assert_eq!(vendor.resolve_functions().functions, "user");
    }

    #[test]
    fn test_explicit_usb_config_wins() {
        let vendor = VendorConfig {
            usb_config: "diag,serial_cdev".to_string(),
            boot_mode: "factory".to_string(),
            ..Default::default()
        };
        let resolved = vendor.resolve_functions();
        assert_eq!(resolved.functions, "diag,serial_cdev");
        assert!(!resolved.persist);
    }

    #[test]
    fn test_radio_boot_mode() {
        let mut vendor = VendorConfig {
            boot_mode: "usbradio".to_string(),
            ..Default::default()
        };
        assert_eq!(
            vendor.resolve_functions(),
            ResolvedVendorFunctions {
                functions: "diag".to_string(),
                persist: true
            }
        );

        vendor.persist_usb_config = "diag,serial_cdev,rmnet_gsi".to_string();
        assert_eq!(vendor.resolve_functions().functions, "diag,serial_cdev,rmnet_gsi");
    }

    #[test]
    fn test_normal_boot_has_no_vendor_functions() {
        let vendor = VendorConfig::default();
        assert_eq!(vendor.resolve_functions().functions, "");
    }

    #[test]
    fn test_speed_path_default() {
        let gadget = GadgetConfig::default();
        assert_eq!(
            gadget.speed_path(),
            PathBuf::from("/sys/class/udc/a600000.dwc3/current_speed")
        );
    }
}
