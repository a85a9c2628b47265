//! Persistent configuration
//!
//! Gadget paths, timings and vendor properties live in a single JSON document
//! stored in SQLite and cached in memory for lock-free reads.

mod schema;
mod store;

pub use schema::{AppConfig, GadgetConfig, ResolvedVendorFunctions, VendorConfig, WebConfig};
pub use store::ConfigStore;
