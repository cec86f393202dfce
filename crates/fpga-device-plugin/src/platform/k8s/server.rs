//! Per device type kubelet endpoint
//!
//! Each [`DeviceTypeServer`] owns one Unix socket in the device plugin
//! directory, a serving task and the ListAndWatch stream tasks spawned on
//! behalf of the kubelet. Device snapshots are handed over through a watch
//! slot holding immutable maps, so a reader always sees one complete
//! snapshot and pending updates coalesce into the latest one.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use device_plugin_pb::api::device_plugin_server::DevicePluginServer;
use device_plugin_pb::api::registration_client::RegistrationClient;
use device_plugin_pb::api::DevicePluginOptions;
use device_plugin_pb::api::ListAndWatchResponse;
use device_plugin_pb::api::RegisterRequest;
use error_stack::Report;
use error_stack::ResultExt;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::Request;
use tonic::Status;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::PluginConfig;
use crate::domain::CoLocationPolicy;
use crate::domain::DeviceMap;
use crate::domain::DeviceType;
use crate::platform::k8s::service::list_and_watch_response;
use crate::platform::k8s::service::DevicePluginService;
use crate::platform::k8s::types::ServerError;
use crate::platform::k8s::types::ServerState;
use crate::platform::k8s::uds;

type ServeResult = Result<(), tonic::transport::Error>;

enum Lifecycle {
    Created,
    Starting,
    Serving(JoinHandle<ServeResult>),
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> ServerState {
        match self {
            Self::Created => ServerState::Created,
            Self::Starting => ServerState::Starting,
            Self::Serving(_) => ServerState::Serving,
            Self::Stopped => ServerState::Stopped,
        }
    }
}

/// Kubelet endpoint serving the devices of one [`DeviceType`].
#[derive(Clone)]
pub struct DeviceTypeServer {
    shared: Arc<ServerShared>,
}

pub(crate) struct ServerShared {
    device_type: DeviceType,
    socket_path: PathBuf,
    resource_name: String,
    kubelet_socket: PathBuf,
    readiness_timeout: Duration,
    stop_timeout: Duration,
    pub(crate) policy: CoLocationPolicy,
    snapshot: watch::Sender<Option<Arc<DeviceMap>>>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
    streams: TaskTracker,
}

impl DeviceTypeServer {
    pub fn new(device_type: DeviceType, config: &PluginConfig) -> Self {
        let socket_path = config.plugin_dir.join(device_type.socket_name());
        let resource_name = device_type.resource_name(&config.resource_prefix);
        let (snapshot, _) = watch::channel(None);

        Self {
            shared: Arc::new(ServerShared {
                device_type,
                socket_path,
                resource_name,
                kubelet_socket: config.kubelet_socket.clone(),
                readiness_timeout: config.readiness_timeout,
                stop_timeout: config.stop_timeout,
                policy: CoLocationPolicy::new(config.placeholder_serial.clone()),
                snapshot,
                lifecycle: Mutex::new(Lifecycle::Created),
                shutdown: CancellationToken::new(),
                streams: TaskTracker::new(),
            }),
        }
    }

    pub fn device_type(&self) -> &DeviceType {
        &self.shared.device_type
    }

    pub fn socket_path(&self) -> &Path {
        &self.shared.socket_path
    }

    pub fn resource_name(&self) -> &str {
        &self.shared.resource_name
    }

    pub async fn state(&self) -> ServerState {
        self.shared.lifecycle.lock().await.state()
    }

    /// Most recently published snapshot, `None` until the first publication.
    pub fn snapshot(&self) -> Option<Arc<DeviceMap>> {
        self.shared.current_snapshot()
    }

    /// Bind the endpoint socket, spawn the serving task and wait until the
    /// endpoint accepts gRPC connections.
    #[tracing::instrument(skip(self), fields(device_type = %self.shared.device_type))]
    pub async fn start(&self) -> Result<(), Report<ServerError>> {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        match &*lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Stopped => {
                return Err(Report::new(ServerError::Stopped {
                    device_type: self.shared.device_type.to_string(),
                }));
            }
            Lifecycle::Starting | Lifecycle::Serving(_) => {
                debug!("device plugin server already started");
                return Ok(());
            }
        }
        *lifecycle = Lifecycle::Starting;

        if let Err(err) = self.shared.bind_and_serve(&mut lifecycle).await {
            error!("could not start device plugin server: {err:?}");
            if let Err(stop_err) = self.shared.stop_locked(&mut lifecycle, true).await {
                warn!("cleanup after failed start failed: {stop_err:?}");
            }
            return Err(err);
        }

        info!(
            "starting to serve on {}",
            self.shared.socket_path.display()
        );
        Ok(())
    }

    /// Announce the endpoint to the kubelet. A failed registration stops the
    /// server before the error is returned.
    #[tracing::instrument(skip(self), fields(device_type = %self.shared.device_type))]
    pub async fn register(&self) -> Result<(), Report<ServerError>> {
        match self.shared.register_with_kubelet().await {
            Ok(()) => {
                info!(
                    "registered device plugin with kubelet as {}",
                    self.shared.resource_name
                );
                Ok(())
            }
            Err(err) => {
                error!("could not register device plugin: {err:?}");
                if let Err(stop_err) = self.stop().await {
                    warn!("stopping unregistered server failed: {stop_err:?}");
                }
                Err(err)
            }
        }
    }

    /// Start, register and publish the initial snapshot. The initial snapshot
    /// is dropped when an update arrived while the launch was in flight.
    pub async fn launch(&self, initial: DeviceMap) -> Result<(), Report<ServerError>> {
        self.start().await?;
        self.register().await?;
        self.shared.publish_initial(initial);
        Ok(())
    }

    /// Publish a new snapshot. Returns false when it equals the current one.
    pub fn update(&self, devices: DeviceMap) -> bool {
        self.shared.snapshot.send_if_modified(move |current| {
            if current.as_deref() == Some(&devices) {
                return false;
            }
            *current = Some(Arc::new(devices));
            true
        })
    }

    /// Close the listener, end every stream and remove the socket. Stopping
    /// a stopped or never started server succeeds without side effects.
    #[tracing::instrument(skip(self), fields(device_type = %self.shared.device_type))]
    pub async fn stop(&self) -> Result<(), Report<ServerError>> {
        self.shared.stop(true).await
    }
}

impl ServerShared {
    pub(crate) fn current_snapshot(&self) -> Option<Arc<DeviceMap>> {
        self.snapshot.borrow().clone()
    }

    fn publish_initial(&self, initial: DeviceMap) {
        let published = self.snapshot.send_if_modified(move |current| {
            if current.is_some() {
                return false;
            }
            *current = Some(Arc::new(initial));
            true
        });
        if !published {
            debug!("newer snapshot already published, skipping initial snapshot");
        }
    }

    async fn bind_and_serve(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
    ) -> Result<(), Report<ServerError>> {
        let path = self.socket_path.display().to_string();

        remove_socket(&self.socket_path)
            .await
            .change_context_lazy(|| ServerError::StaleSocket { path: path.clone() })?;

        let listener = UnixListener::bind(&self.socket_path)
            .change_context_lazy(|| ServerError::Bind { path: path.clone() })?;

        let service = DevicePluginServer::new(DevicePluginService::new(self.clone()));
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(
                    UnixListenerStream::new(listener),
                    shutdown.cancelled_owned(),
                )
                .await
        });
        *lifecycle = Lifecycle::Serving(handle);

        uds::wait_for_server(&self.socket_path, self.readiness_timeout).await
    }

    async fn register_with_kubelet(&self) -> Result<(), Report<ServerError>> {
        let context = || ServerError::Registration {
            resource_name: self.resource_name.clone(),
            kubelet_socket: self.kubelet_socket.display().to_string(),
        };
        let request = RegisterRequest {
            version: device_plugin_pb::VERSION.to_string(),
            endpoint: self
                .socket_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            resource_name: self.resource_name.clone(),
            options: Some(DevicePluginOptions::default()),
        };

        let call = async {
            let channel = uds::connect(&self.kubelet_socket)
                .await
                .change_context_lazy(context)?;
            RegistrationClient::new(channel)
                .register(Request::new(request))
                .await
                .change_context_lazy(context)?;
            Ok::<_, Report<ServerError>>(())
        };

        tokio::time::timeout(self.readiness_timeout, call)
            .await
            .map_err(|_| {
                Report::new(context()).attach_printable(format!(
                    "kubelet did not answer within {:?}",
                    self.readiness_timeout
                ))
            })?
    }

    /// Track a ListAndWatch stream task feeding `tx`.
    pub(crate) fn spawn_stream(
        self: &Arc<Self>,
        tx: mpsc::Sender<Result<ListAndWatchResponse, Status>>,
    ) -> Result<(), Status> {
        if self.shutdown.is_cancelled() || self.streams.is_closed() {
            return Err(Status::unavailable("device plugin server is stopping"));
        }
        let shared = self.clone();
        self.streams.spawn(async move { shared.stream_devices(tx).await });
        Ok(())
    }

    /// Send every published snapshot to the kubelet until the server stops.
    /// Losing the kubelet stops the whole server.
    async fn stream_devices(self: Arc<Self>, tx: mpsc::Sender<Result<ListAndWatchResponse, Status>>) {
        let mut snapshots = self.snapshot.subscribe();

        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            if let Some(devices) = snapshot {
                let response = list_and_watch_response(&self.policy, &devices);
                info!(
                    device_type = %self.device_type,
                    "sending {} device(s) {:?} to kubelet",
                    response.devices.len(),
                    response.devices.iter().map(|d| d.id.as_str()).collect::<Vec<_>>()
                );

                let sent = tokio::select! {
                    sent = tx.send(Ok(response)) => sent.is_ok(),
                    _ = self.shutdown.cancelled() => return,
                };
                if !sent {
                    self.stop_after_stream_loss().await;
                    return;
                }
            }

            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tx.closed() => {
                    self.stop_after_stream_loss().await;
                    return;
                }
                _ = self.shutdown.cancelled() => {
                    debug!(device_type = %self.device_type, "ListAndWatch stream ended by shutdown");
                    return;
                }
            }
        }
    }

    async fn stop_after_stream_loss(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        warn!(
            device_type = %self.device_type,
            "cannot update device list, kubelet went away; stopping server"
        );

        // a concurrent stop holds the lock while it waits for this task
        let mut lifecycle = tokio::select! {
            guard = self.lifecycle.lock() => guard,
            _ = self.shutdown.cancelled() => return,
        };
        if self.shutdown.is_cancelled() {
            return;
        }
        if let Err(err) = self.stop_locked(&mut lifecycle, false).await {
            error!(device_type = %self.device_type, "failed to stop server: {err:?}");
        }
    }

    async fn stop(&self, join_streams: bool) -> Result<(), Report<ServerError>> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle, join_streams).await
    }

    async fn stop_locked(
        &self,
        lifecycle: &mut Lifecycle,
        join_streams: bool,
    ) -> Result<(), Report<ServerError>> {
        match std::mem::replace(lifecycle, Lifecycle::Stopped) {
            Lifecycle::Stopped => return Ok(()),
            Lifecycle::Created => {
                debug!("stopping a server that was never started");
                self.shutdown.cancel();
                self.streams.close();
                return Ok(());
            }
            Lifecycle::Starting => self.shutdown.cancel(),
            Lifecycle::Serving(handle) => {
                self.shutdown.cancel();
                self.join_serve_task(handle).await;
            }
        }

        self.streams.close();
        if join_streams
            && tokio::time::timeout(self.stop_timeout, self.streams.wait())
                .await
                .is_err()
        {
            warn!(
                "ListAndWatch streams did not finish within {:?}",
                self.stop_timeout
            );
        }

        remove_socket(&self.socket_path)
            .await
            .change_context_lazy(|| ServerError::Cleanup {
                path: self.socket_path.display().to_string(),
            })?;
        info!(device_type = %self.device_type, "device plugin server stopped");
        Ok(())
    }

    async fn join_serve_task(&self, handle: JoinHandle<ServeResult>) {
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(Ok(()))) => debug!("serving task finished"),
            Ok(Ok(Err(err))) => warn!("serving task failed: {err}"),
            Ok(Err(err)) => warn!("serving task did not complete: {err}"),
            Err(_) => {
                warn!(
                    "serving task did not finish within {:?}, aborting it",
                    self.stop_timeout
                );
                abort.abort();
            }
        }
    }
}

async fn remove_socket(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
