//! Vendor/Product ID selection for supported function combinations
//!
//! The table is matched top to bottom. A row either names an exact vendor
//! function string, accepts the default vendor string (empty or "user"), or
//! accepts any vendor string. The IDs must stay bit-exact because host side
//! drivers bind on them.

use std::fmt;
use tracing::{error, warn};

use super::function::FunctionSet;

/// Google vendor ID used for stock combinations
pub const GOOGLE_VID: u16 = 0x18d1;

/// Qualcomm vendor ID used when diagnostic functions are linked
pub const QUALCOMM_VID: u16 = 0x05c6;

/// USB vendor/product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VidPid {
    pub vid: u16,
    pub pid: u16,
}

impl VidPid {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }

    /// Values as written to `idVendor` / `idProduct`
    pub fn to_sysfs(self) -> (String, String) {
        (format!("0x{:04x}", self.vid), format!("0x{:04x}", self.pid))
    }
}

impl fmt::Display for VidPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// Why a combination has no ID pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsupported {
    /// Vendor function string not valid for this combination
    VendorFunctions(String),
    /// UVC requested but disabled by configuration
    UvcDisabled,
    /// Function combination not in the table
    Combination(FunctionSet),
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VendorFunctions(v) => write!(f, "invalid vendor functions: {:?}", v),
            Self::UvcDisabled => f.write_str("UVC function not enabled by config"),
            Self::Combination(set) => write!(f, "function combination {} not supported", set),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum VendorMatch {
    Exact(&'static str),
    Default,
    Any,
}

impl VendorMatch {
    fn matches(self, vendor: &str) -> bool {
        match self {
            Self::Exact(s) => s == vendor,
            Self::Default => is_default_vendor(vendor),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    functions: FunctionSet,
    vendor: VendorMatch,
    requires_uvc: bool,
    ids: VidPid,
}

const fn rule(functions: FunctionSet, vendor: VendorMatch, vid: u16, pid: u16) -> Rule {
    Rule {
        functions,
        vendor,
        requires_uvc: false,
        ids: VidPid::new(vid, pid),
    }
}

const fn uvc_rule(functions: FunctionSet, pid: u16) -> Rule {
    Rule {
        functions,
        vendor: VendorMatch::Default,
        requires_uvc: true,
        ids: VidPid::new(GOOGLE_VID, pid),
    }
}

use FunctionSet as F;
use VendorMatch::{Any, Default as Dflt, Exact};

const ADB_MTP: FunctionSet = F::ADB.union(F::MTP);
const ADB_RNDIS: FunctionSet = F::ADB.union(F::RNDIS);
const ADB_PTP: FunctionSet = F::ADB.union(F::PTP);
const ADB_MIDI: FunctionSet = F::ADB.union(F::MIDI);
const ADB_ACCESSORY: FunctionSet = F::ADB.union(F::ACCESSORY);
const ADB_AUDIO: FunctionSet = F::ADB.union(F::AUDIO_SOURCE);
const ACCESSORY_AUDIO: FunctionSet = F::ACCESSORY.union(F::AUDIO_SOURCE);
const ADB_ACCESSORY_AUDIO: FunctionSet = ADB_ACCESSORY.union(F::AUDIO_SOURCE);
const ADB_UVC: FunctionSet = F::ADB.union(F::UVC);

const RADIO_FULL: &str = "diag,diag_mdm,qdss,qdss_mdm,serial_cdev,dpl_gsi";

const VID_PID_TABLE: &[Rule] = &[
    rule(F::MTP, Exact("diag"), QUALCOMM_VID, 0x901b),
    rule(F::MTP, Dflt, GOOGLE_VID, 0x4ee1),
    rule(ADB_MTP, Exact("diag"), QUALCOMM_VID, 0x903a),
    rule(ADB_MTP, Dflt, GOOGLE_VID, 0x4ee2),
    rule(F::RNDIS, Exact("diag"), QUALCOMM_VID, 0x902c),
    rule(F::RNDIS, Exact("serial_cdev,diag"), QUALCOMM_VID, 0x90b5),
    rule(F::RNDIS, Exact(RADIO_FULL), QUALCOMM_VID, 0x90e6),
    rule(F::RNDIS, Dflt, GOOGLE_VID, 0x4ee3),
    rule(ADB_RNDIS, Exact("diag"), QUALCOMM_VID, 0x902d),
    rule(ADB_RNDIS, Exact("serial_cdev,diag"), QUALCOMM_VID, 0x90b6),
    rule(ADB_RNDIS, Exact(RADIO_FULL), QUALCOMM_VID, 0x90e7),
    rule(ADB_RNDIS, Dflt, GOOGLE_VID, 0x4ee4),
    rule(F::PTP, Dflt, GOOGLE_VID, 0x4ee5),
    rule(ADB_PTP, Dflt, GOOGLE_VID, 0x4ee6),
    rule(F::ADB, Exact("diag"), QUALCOMM_VID, 0x901d),
    rule(F::ADB, Exact("diag,serial_cdev,rmnet_gsi"), QUALCOMM_VID, 0x9091),
    rule(F::ADB, Exact("diag,serial_cdev"), QUALCOMM_VID, 0x901f),
    rule(F::ADB, Exact("diag,serial_cdev,rmnet_gsi,dpl_gsi,qdss"), QUALCOMM_VID, 0x90db),
    rule(
        F::ADB,
        Exact("diag,diag_mdm,qdss,qdss_mdm,serial_cdev,dpl_gsi,rmnet_gsi"),
        QUALCOMM_VID,
        0x90e5,
    ),
    rule(F::ADB, Dflt, GOOGLE_VID, 0x4ee7),
    rule(F::MIDI, Dflt, GOOGLE_VID, 0x4ee8),
    rule(ADB_MIDI, Dflt, GOOGLE_VID, 0x4ee9),
    // Accessory and audio source keep their IDs whatever vendor functions are set
    rule(F::ACCESSORY, Any, GOOGLE_VID, 0x2d00),
    rule(ADB_ACCESSORY, Any, GOOGLE_VID, 0x2d01),
    rule(F::AUDIO_SOURCE, Any, GOOGLE_VID, 0x2d02),
    rule(ADB_AUDIO, Any, GOOGLE_VID, 0x2d03),
    rule(ACCESSORY_AUDIO, Any, GOOGLE_VID, 0x2d04),
    rule(ADB_ACCESSORY_AUDIO, Any, GOOGLE_VID, 0x2d05),
    uvc_rule(F::UVC, 0x4eed),
    uvc_rule(ADB_UVC, 0x4eee),
];

/// Empty or "user" means no vendor functions are configured
pub fn is_default_vendor(vendor: &str) -> bool {
    vendor.is_empty() || vendor == "user"
}

/// Select the ID pair for a function combination
///
/// Pure lookup: identical inputs always give identical results.
pub fn select_vid_pid(
    functions: FunctionSet,
    vendor_functions: &str,
    uvc_enabled: bool,
) -> Result<VidPid, Unsupported> {
    let mut rows = VID_PID_TABLE
        .iter()
        .filter(|r| r.functions == functions)
        .peekable();

    if rows.peek().is_none() {
        error!("Combination not supported: {}", functions);
        return Err(Unsupported::Combination(functions));
    }

    let rule = rows.find(|r| r.vendor.matches(vendor_functions)).ok_or_else(|| {
        error!("Invalid vendorFunctions set: {}", vendor_functions);
        Unsupported::VendorFunctions(vendor_functions.to_string())
    })?;

    if rule.requires_uvc && !uvc_enabled {
        error!("UVC function not enabled by config");
        return Err(Unsupported::UvcDisabled);
    }

    if matches!(rule.vendor, VendorMatch::Any) && !is_default_vendor(vendor_functions) {
        warn!("Invalid vendorFunctions set: {}", vendor_functions);
    }

    Ok(rule.ids)
}
