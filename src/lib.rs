//! usb-gadgetd - USB gadget function controller
//!
//! Composes a Linux ConfigFS USB gadget from a requested set of functions,
//! waits for FunctionFS daemons before presenting it to the host, and exposes
//! the result over an HTTP/WebSocket API.

pub mod config;
pub mod error;
pub mod events;
pub mod gadget;
pub mod state;
pub mod web;

pub use error::{AppError, Result};
