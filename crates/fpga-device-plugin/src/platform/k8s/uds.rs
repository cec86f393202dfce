//! gRPC over Unix domain sockets

use std::path::Path;
use std::time::Duration;

use error_stack::Report;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tower::service_fn;
use tracing::debug;

use crate::platform::k8s::types::ServerError;

const PROBE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Open a gRPC channel to the server listening on `socket_path`.
pub async fn connect(socket_path: &Path) -> Result<Channel, tonic::transport::Error> {
    let socket_path = socket_path.to_path_buf();

    // The URI is a placeholder, the connector always dials the socket.
    Endpoint::from_static("http://[::]:50051")
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move { UnixStream::connect(socket_path).await.map(TokioIo::new) }
        }))
        .await
}

/// Block until a gRPC connection to `socket_path` succeeds or `timeout` expires.
pub async fn wait_for_server(socket_path: &Path, timeout: Duration) -> Result<(), Report<ServerError>> {
    let probe = async {
        loop {
            match connect(socket_path).await {
                Ok(_channel) => return,
                Err(err) => {
                    debug!("server at {} not ready yet: {err}", socket_path.display());
                    tokio::time::sleep(PROBE_RETRY_INTERVAL).await;
                }
            }
        }
    };

    tokio::time::timeout(timeout, probe).await.map_err(|_| {
        Report::new(ServerError::NotReady {
            path: socket_path.display().to_string(),
        })
        .attach_printable(format!("no connection within {timeout:?}"))
    })
}
