//! Kubelet device plugin endpoints

pub mod server;
pub mod service;
pub mod types;
pub mod uds;

#[cfg(test)]
pub(crate) mod testing;

pub use server::DeviceTypeServer;
pub use types::ServerError;
pub use types::ServerState;
