use derive_more::Display;
use thiserror::Error;

/// Lifecycle of a device type server. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ServerState {
    Created,
    Starting,
    Serving,
    Stopped,
}

/// Errors that can occur while running a device type server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to remove stale socket {path}")]
    StaleSocket { path: String },
    #[error("failed to bind device plugin socket {path}")]
    Bind { path: String },
    #[error("device plugin server at {path} did not become ready")]
    NotReady { path: String },
    #[error("failed to register {resource_name} with kubelet at {kubelet_socket}")]
    Registration {
        resource_name: String,
        kubelet_socket: String,
    },
    #[error("device plugin server for {device_type} is already stopped")]
    Stopped { device_type: String },
    #[error("failed to remove socket {path}")]
    Cleanup { path: String },
}
