//! Generated bindings for the kubelet device plugin API (`v1beta1`).

#![allow(clippy::doc_markdown)]

pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

/// Device plugin API version announced during registration.
pub const VERSION: &str = "v1beta1";

/// Health value reported for a usable device.
pub const HEALTHY: &str = "Healthy";

/// Health value reported for a device that must not be scheduled.
pub const UNHEALTHY: &str = "Unhealthy";
