use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use device_plugin_pb::api::device_plugin_server::DevicePlugin;
use device_plugin_pb::api::AllocateRequest;
use device_plugin_pb::api::AllocateResponse;
use device_plugin_pb::api::ContainerAllocateResponse;
use device_plugin_pb::api::DeviceSpec;
use device_plugin_pb::api::DevicePluginOptions;
use device_plugin_pb::api::Empty;
use device_plugin_pb::api::ListAndWatchResponse;
use device_plugin_pb::api::Mount;
use device_plugin_pb::api::PreStartContainerRequest;
use device_plugin_pb::api::PreStartContainerResponse;
use device_plugin_pb::api::PreferredAllocationRequest;
use device_plugin_pb::api::PreferredAllocationResponse;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::domain::CoLocationPolicy;
use crate::domain::Device;
use crate::domain::DeviceMap;
use crate::platform::k8s::server::ServerShared;

const DEVICE_PERMISSIONS: &str = "rwm";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("invalid allocation request: unknown device {id}")]
    DeviceNotFound { id: String },
}

/// Kubelet facing gRPC service of one device type server.
pub struct DevicePluginService {
    shared: Arc<ServerShared>,
}

impl DevicePluginService {
    pub(crate) fn new(shared: Arc<ServerShared>) -> Self {
        Self { shared }
    }
}

/// Advertised device list for one snapshot.
pub fn list_and_watch_response(policy: &CoLocationPolicy, devices: &DeviceMap) -> ListAndWatchResponse {
    ListAndWatchResponse {
        devices: policy
            .advertised(devices)
            .into_iter()
            .map(|device| device_plugin_pb::api::Device {
                id: device.id.clone(),
                health: device.health().to_string(),
                ..Default::default()
            })
            .collect(),
    }
}

/// Resolve every container request against `devices`.
///
/// All requests are expanded and validated before any response is built, so
/// one unknown id fails the whole batch.
pub fn allocate_response(
    policy: &CoLocationPolicy,
    devices: &DeviceMap,
    request: &AllocateRequest,
) -> Result<AllocateResponse, AllocationError> {
    let resolved = request
        .container_requests
        .iter()
        .map(|container| {
            policy
                .expand(&container.devices_ids, devices)
                .into_iter()
                .map(|id| {
                    devices
                        .get(&id)
                        .ok_or(AllocationError::DeviceNotFound { id })
                })
                .collect::<Result<Vec<&Device>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let container_responses = resolved
        .into_iter()
        .map(|granted| {
            let paths: Vec<&str> = granted.iter().flat_map(|d| d.node_paths()).collect();
            ContainerAllocateResponse {
                devices: paths
                    .iter()
                    .map(|path| DeviceSpec {
                        container_path: path.to_string(),
                        host_path: path.to_string(),
                        permissions: DEVICE_PERMISSIONS.to_string(),
                    })
                    .collect(),
                mounts: paths
                    .iter()
                    .map(|path| Mount {
                        container_path: path.to_string(),
                        host_path: path.to_string(),
                        read_only: false,
                    })
                    .collect(),
                envs: HashMap::new(),
                annotations: HashMap::new(),
                cdi_devices: Vec::new(),
            }
        })
        .collect();

    Ok(AllocateResponse {
        container_responses,
    })
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");
        Ok(Response::new(DevicePluginOptions::default()))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!("kubelet opened ListAndWatch stream");

        // one slot: the stream task always sends the latest snapshot
        let (tx, rx) = mpsc::channel(1);
        self.shared.spawn_stream(tx)?;

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        debug!("getting preferred allocation: {:?}", request.into_inner());
        Ok(Response::new(PreferredAllocationResponse::default()))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let request = request.into_inner();
        let Some(devices) = self.shared.current_snapshot() else {
            return Err(Status::failed_precondition(
                "no devices have been published yet",
            ));
        };

        match allocate_response(&self.shared.policy, &devices, &request) {
            Ok(response) => {
                for (container, granted) in request
                    .container_requests
                    .iter()
                    .zip(&response.container_responses)
                {
                    info!(
                        "allocated {:?}, granting {} device node(s)",
                        container.devices_ids,
                        granted.devices.len()
                    );
                }
                Ok(Response::new(response))
            }
            Err(err) => {
                warn!("rejecting allocation: {err}");
                Err(Status::not_found(err.to_string()))
            }
        }
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        Err(Status::unimplemented(
            "PreStartContainer() should not be called",
        ))
    }
}
