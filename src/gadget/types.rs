//! Gadget data types shared by the controller, monitor and service

use serde::{Deserialize, Serialize};

use super::function::FunctionSet;

/// Status codes reported through gadget callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GadgetStatus {
    Success,
    Error,
    FunctionsApplied,
    FunctionsNotApplied,
    ConfigurationNotSupported,
}

impl GadgetStatus {
    /// Numeric code as used by the platform HAL
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
            Self::FunctionsApplied => 2,
            Self::FunctionsNotApplied => 3,
            Self::ConfigurationNotSupported => 4,
        }
    }

    pub fn from_applied(applied: bool) -> Self {
        if applied {
            Self::FunctionsApplied
        } else {
            Self::FunctionsNotApplied
        }
    }
}

/// USB link speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsbSpeed {
    #[default]
    Unknown,
    Low,
    Full,
    High,
    Super,
    SuperPlus,
}

impl UsbSpeed {
    /// Map the text of the UDC `current_speed` attribute
    pub fn from_sysfs(value: &str) -> Self {
        match value.trim() {
            "low-speed" => Self::Low,
            "full-speed" => Self::Full,
            "high-speed" => Self::High,
            "super-speed" => Self::Super,
            "super-speed-plus" => Self::SuperPlus,
            _ => Self::Unknown,
        }
    }

    /// Numeric code as used by the platform HAL
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::Low => 0,
            Self::Full => 1,
            Self::High => 2,
            Self::Super => 3,
            Self::SuperPlus => 4,
        }
    }
}

/// Requested functions and whether the host can currently see them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GadgetState {
    pub current_functions: FunctionSet,
    pub functions_applied: bool,
}
