//! In-process kubelet stand-in for socket level tests

use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use device_plugin_pb::api::device_plugin_client::DevicePluginClient;
use device_plugin_pb::api::registration_server::Registration;
use device_plugin_pb::api::registration_server::RegistrationServer;
use device_plugin_pb::api::Empty;
use device_plugin_pb::api::RegisterRequest;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Request;
use tonic::Response;
use tonic::Status;

use crate::config::PluginConfig;
use crate::platform::k8s::uds;

pub(crate) const KUBELET_SOCKET: &str = "kubelet.sock";

/// Plugin configuration rooted at `dir` with short timeouts.
pub(crate) fn test_config(dir: &Path) -> PluginConfig {
    PluginConfig {
        kubelet_socket: dir.join(KUBELET_SOCKET),
        plugin_dir: dir.to_path_buf(),
        poll_interval: Duration::from_millis(50),
        retry_backoff: Duration::from_millis(50),
        inventory_timeout: Duration::from_secs(1),
        readiness_timeout: Duration::from_secs(2),
        stop_timeout: Duration::from_secs(2),
        ..PluginConfig::default()
    }
}

pub(crate) async fn plugin_client(socket_path: &Path) -> DevicePluginClient<Channel> {
    let channel = uds::connect(socket_path)
        .await
        .expect("should connect to plugin socket");
    DevicePluginClient::new(channel)
}

#[derive(Default)]
struct RegistrationLog {
    requests: Mutex<Vec<RegisterRequest>>,
    reject: AtomicBool,
}

struct FakeRegistration {
    log: Arc<RegistrationLog>,
}

#[tonic::async_trait]
impl Registration for FakeRegistration {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<Empty>, Status> {
        if self.log.reject.load(Ordering::SeqCst) {
            return Err(Status::invalid_argument("registration rejected"));
        }
        self.log.requests.lock().unwrap().push(request.into_inner());
        Ok(Response::new(Empty {}))
    }
}

/// Registration listener bound to `<dir>/kubelet.sock`. Shuts down on drop.
pub(crate) struct FakeKubelet {
    socket_path: PathBuf,
    log: Arc<RegistrationLog>,
    shutdown: CancellationToken,
}

impl FakeKubelet {
    pub(crate) async fn start(dir: &Path) -> Self {
        let socket_path = dir.join(KUBELET_SOCKET);
        let listener = UnixListener::bind(&socket_path).expect("should bind kubelet socket");
        let log = Arc::new(RegistrationLog::default());
        let shutdown = CancellationToken::new();

        let service = RegistrationServer::new(FakeRegistration { log: log.clone() });
        let token = shutdown.clone();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(
                    UnixListenerStream::new(listener),
                    token.cancelled_owned(),
                )
                .await
        });

        uds::wait_for_server(&socket_path, Duration::from_secs(2))
            .await
            .expect("fake kubelet should come up");

        Self {
            socket_path,
            log,
            shutdown,
        }
    }

    pub(crate) fn set_reject(&self, reject: bool) {
        self.log.reject.store(reject, Ordering::SeqCst);
    }

    pub(crate) fn registrations(&self) -> Vec<RegisterRequest> {
        self.log.requests.lock().unwrap().clone()
    }

    pub(crate) fn registered_resources(&self) -> Vec<String> {
        self.registrations()
            .into_iter()
            .map(|r| r.resource_name)
            .collect()
    }
}

impl Drop for FakeKubelet {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
