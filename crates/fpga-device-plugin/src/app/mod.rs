//! Application module
//!
//! Wires the inventory source and the plugin configuration into the
//! reconciler task and supervises it until shutdown.

pub mod core;
pub mod tasks;

pub use core::Application;
