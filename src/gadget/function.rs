//! USB gadget function sets and vendor function lists

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

bitflags! {
    /// Set of requested USB functions
    ///
    /// Bit values match the platform gadget HAL so that masks coming from
    /// other components can be passed through unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FunctionSet: u64 {
        const ADB = 1;
        const ACCESSORY = 1 << 1;
        const MTP = 1 << 2;
        const MIDI = 1 << 3;
        const PTP = 1 << 4;
        const RNDIS = 1 << 5;
        const AUDIO_SOURCE = 1 << 6;
        const UVC = 1 << 7;
    }
}

impl FunctionSet {
    pub const NONE: Self = Self::empty();

    /// Name table in link order
    const NAMES: [(Self, &'static str); 8] = [
        (Self::ADB, "adb"),
        (Self::ACCESSORY, "accessory"),
        (Self::MTP, "mtp"),
        (Self::MIDI, "midi"),
        (Self::PTP, "ptp"),
        (Self::RNDIS, "rndis"),
        (Self::AUDIO_SOURCE, "audio_source"),
        (Self::UVC, "uvc"),
    ];

    pub const fn is_none(self) -> bool {
        self.is_empty()
    }

    /// Names of the requested functions
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(f, _)| self.contains(*f))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl Default for FunctionSet {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for FunctionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join(","))
    }
}

impl FromStr for FunctionSet {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::NONE;
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let token = token.to_ascii_lowercase();
            if token == "none" {
                continue;
            }
            let func = Self::NAMES
                .iter()
                .find(|(_, name)| *name == token)
                .map(|(f, _)| *f)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown USB function: {}", token)))?;
            set |= func;
        }
        Ok(set)
    }
}

impl Serialize for FunctionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FunctionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Mask(u64),
            Names(Vec<String>),
            List(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Mask(bits) => Self::from_bits(bits)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid function mask {:#x}", bits))),
            Repr::Names(names) => names.join(",").parse().map_err(serde::de::Error::custom),
            Repr::List(list) => list.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Vendor-specific function and the configfs function it links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorFunction {
    /// Name used in the vendor function list (e.g., "diag")
    pub name: &'static str,
    /// Function directory under `functions/` (e.g., "diag.diag")
    pub configfs_name: &'static str,
}

const VENDOR_FUNCTIONS: &[VendorFunction] = &[
    VendorFunction { name: "diag", configfs_name: "diag.diag" },
    VendorFunction { name: "diag_mdm", configfs_name: "diag.diag_mdm" },
    VendorFunction { name: "qdss", configfs_name: "qdss.qdss" },
    VendorFunction { name: "qdss_mdm", configfs_name: "qdss.qdss_mdm" },
    VendorFunction { name: "serial_cdev", configfs_name: "cser.dun.0" },
    VendorFunction { name: "dpl_gsi", configfs_name: "gsi.dpl" },
    VendorFunction { name: "rmnet_gsi", configfs_name: "gsi.rmnet" },
];

impl VendorFunction {
    pub fn lookup(name: &str) -> Option<Self> {
        VENDOR_FUNCTIONS.iter().find(|f| f.name == name).copied()
    }
}

/// Parse a comma separated vendor function string into linkable functions
///
/// Order is preserved. Names without a configfs mapping (including the
/// "user" marker) are skipped.
pub fn parse_vendor_functions(list: &str) -> Vec<VendorFunction> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(VendorFunction::lookup)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_match_hal() {
        assert_eq!(FunctionSet::ADB.bits(), 1);
        assert_eq!(FunctionSet::MTP.bits(), 4);
        assert_eq!(FunctionSet::RNDIS.bits(), 32);
        assert_eq!(FunctionSet::UVC.bits(), 128);
        assert!(FunctionSet::from_bits(1 << 10).is_none());
    }

    #[test]
    fn test_parse_and_display() {
        let set: FunctionSet = "mtp, ADB".parse().unwrap();
        assert_eq!(set, FunctionSet::ADB | FunctionSet::MTP);
        assert_eq!(set.to_string(), "adb,mtp");

        assert_eq!("none".parse::<FunctionSet>().unwrap(), FunctionSet::NONE);
        assert_eq!("".parse::<FunctionSet>().unwrap(), FunctionSet::NONE);
        assert_eq!(FunctionSet::NONE.to_string(), "none");
        assert!("adb,ncm".parse::<FunctionSet>().is_err());
    }

    #[test]
    fn test_contains() {
        let set = FunctionSet::ADB | FunctionSet::RNDIS;
        assert!(set.contains(FunctionSet::ADB));
        assert!(!set.contains(FunctionSet::MTP));
        assert!(!set.contains(FunctionSet::ADB | FunctionSet::MTP));
    }

    #[test]
    fn test_serde_forms() {
        let set = FunctionSet::ADB | FunctionSet::PTP;
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["adb","ptp"]"#);

        let back: FunctionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        let from_mask: FunctionSet = serde_json::from_str("17").unwrap();
        assert_eq!(from_mask, set);
        let from_list: FunctionSet = serde_json::from_str(r#""ptp,adb""#).unwrap();
        assert_eq!(from_list, set);
    }

    #[test]
    fn test_vendor_function_order() {
        let funcs = parse_vendor_functions("serial_cdev,diag,user,bogus,rmnet_gsi");
        let names: Vec<_> = funcs.iter().map(|f| f.configfs_name).collect();
        assert_eq!(names, vec!["cser.dun.0", "diag.diag", "gsi.rmnet"]);
        assert!(parse_vendor_functions("").is_empty());
    }
}
