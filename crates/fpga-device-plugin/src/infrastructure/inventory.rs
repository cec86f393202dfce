//! Sources of FPGA device records

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::domain::Device;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory file {path}")]
    Read { path: String },
    #[error("failed to parse inventory file {path}")]
    Parse { path: String },
    #[error("invalid device record: {message}")]
    InvalidDevice { message: String },
    #[error("inventory read timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("inventory unavailable: {message}")]
    Unavailable { message: String },
}

/// Produces the flat list of devices currently present on the node.
#[async_trait::async_trait]
pub trait InventoryProvider: Send + Sync {
    async fn devices(&self) -> Result<Vec<Device>, Report<InventoryError>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InventoryDocument {
    List(Vec<Device>),
    Wrapped { devices: Vec<Device> },
}

impl InventoryDocument {
    fn into_devices(self) -> Vec<Device> {
        match self {
            Self::List(devices) | Self::Wrapped { devices } => devices,
        }
    }
}

/// Reads device records from a YAML or JSON file maintained by a node-local
/// hardware scanner. The file is re-read on every call.
#[derive(Debug, Clone)]
pub struct FileInventoryProvider {
    path: PathBuf,
}

impl FileInventoryProvider {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, contents: &str) -> Result<Vec<Device>, Report<InventoryError>> {
        let path = self.path.display().to_string();
        let is_json = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let document: InventoryDocument = if is_json {
            serde_json::from_str(contents).change_context(InventoryError::Parse { path })?
        } else {
            serde_yaml::from_str(contents).change_context(InventoryError::Parse { path })?
        };

        let devices = document.into_devices();
        validate(&devices)?;
        Ok(devices)
    }
}

#[async_trait::async_trait]
impl InventoryProvider for FileInventoryProvider {
    async fn devices(&self) -> Result<Vec<Device>, Report<InventoryError>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .change_context(InventoryError::Read {
                path: self.path.display().to_string(),
            })?;
        let devices = self.parse(&contents)?;
        debug!(path = %self.path.display(), count = devices.len(), "read device inventory");
        Ok(devices)
    }
}

fn validate(devices: &[Device]) -> Result<(), Report<InventoryError>> {
    let mut ids = HashSet::new();
    for device in devices {
        if device.id.is_empty() {
            return Err(Report::new(InventoryError::InvalidDevice {
                message: "device without an id".to_string(),
            }));
        }
        if device.nodes.user.is_empty() {
            return Err(Report::new(InventoryError::InvalidDevice {
                message: format!("device {} has no user node", device.id),
            }));
        }
        if !ids.insert(device.id.as_str()) {
            return Err(Report::new(InventoryError::InvalidDevice {
                message: format!("device {} is listed twice", device.id),
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::DeviceType;

    fn write_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("should create temp file");
        file.write_all(contents.as_bytes())
            .expect("should write inventory");
        file
    }

    #[test(tokio::test)]
    async fn read_yaml_inventory() {
        let file = write_file(
            ".yaml",
            r#"
devices:
  - id: "0000:01:00.0"
    serial_number: "X1"
    shell_version: "xilinx_u250"
    firmware_timestamp: "1586197180"
    nodes:
      management: /dev/xclmgmt256
      user: /dev/dri/renderD128
  - id: "0000:01:00.1"
    serial_number: "X1"
    shell_version: "xilinx_u250"
    firmware_timestamp: "1586197180"
    healthy: false
    nodes:
      user: /dev/dri/renderD129
      dma: /dev/qdma01001
"#,
        );

        let devices = FileInventoryProvider::new(file.path())
            .devices()
            .await
            .expect("should read inventory");

        assert_eq!(devices.len(), 2);
        assert_eq!(
            devices[0].device_type(),
            DeviceType::from("xilinx_u250-1586197180")
        );
        assert!(devices[0].healthy, "health should default to true");
        assert_eq!(
            devices[0].nodes.management.as_deref(),
            Some("/dev/xclmgmt256")
        );
        assert!(!devices[1].healthy);
        assert_eq!(devices[1].nodes.management, None);
        assert_eq!(devices[1].nodes.dma.as_deref(), Some("/dev/qdma01001"));
    }

    #[test(tokio::test)]
    async fn read_json_list_inventory() {
        let file = write_file(
            ".json",
            r#"[{"id": "0000:02:00.1", "shell_version": "v1", "firmware_timestamp": "t1",
                 "nodes": {"user": "/dev/dri/renderD130"}}]"#,
        );

        let devices = FileInventoryProvider::new(file.path())
            .devices()
            .await
            .expect("should read json inventory");

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial_number, "");
    }

    #[test(tokio::test)]
    async fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let err = FileInventoryProvider::new(dir.path().join("absent.yaml"))
            .devices()
            .await
            .expect_err("missing file should fail");

        assert!(matches!(
            err.current_context(),
            InventoryError::Read { .. }
        ));
    }

    #[test(tokio::test)]
    async fn garbage_is_a_parse_error() {
        let file = write_file(".yaml", "devices: [ {id: ");
        let err = FileInventoryProvider::new(file.path())
            .devices()
            .await
            .expect_err("garbage should fail");

        assert!(matches!(
            err.current_context(),
            InventoryError::Parse { .. }
        ));
    }

    #[test(tokio::test)]
    async fn duplicate_ids_are_rejected() {
        let file = write_file(
            ".yaml",
            r#"
- {id: "0000:01:00.0", shell_version: v1, firmware_timestamp: t1, nodes: {user: /dev/a}}
- {id: "0000:01:00.0", shell_version: v1, firmware_timestamp: t1, nodes: {user: /dev/b}}
"#,
        );
        let err = FileInventoryProvider::new(file.path())
            .devices()
            .await
            .expect_err("duplicates should fail");

        assert!(matches!(
            err.current_context(),
            InventoryError::InvalidDevice { .. }
        ));
    }

    #[test(tokio::test)]
    async fn empty_user_node_is_rejected() {
        let file = write_file(
            ".yaml",
            r#"[{id: "0000:01:00.0", shell_version: v1, firmware_timestamp: t1, nodes: {user: ""}}]"#,
        );

        assert!(FileInventoryProvider::new(file.path())
            .devices()
            .await
            .is_err());
    }
}
