//! USB gadget management
//!
//! Composes the single ConfigFS gadget from the requested function set:
//!
//! - `configfs`: attribute writes, function links and UDC pull-up/down
//! - `vidpid`: vendor/product IDs for every supported combination
//! - `monitor`: waits for FunctionFS daemons before pulling up
//! - `controller`: teardown, link and re-enable under one request lock
//! - `service`: callback-style façade used by the web layer

pub mod configfs;
pub mod controller;
pub mod function;
pub mod monitor;
pub mod service;
pub mod types;
pub mod vidpid;

pub use configfs::ConfigFs;
pub use controller::GadgetController;
pub use function::{FunctionSet, VendorFunction};
pub use monitor::{FfsMonitor, FunctionsAppliedCallback};
pub use service::{GadgetCallback, UsbGadgetService};
pub use types::{GadgetState, GadgetStatus, UsbSpeed};
pub use vidpid::VidPid;
