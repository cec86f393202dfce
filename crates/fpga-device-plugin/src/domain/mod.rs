//! Device model and the pure policies applied to it

pub mod colocation;
pub mod device;
pub mod diff;

pub use colocation::CoLocationPolicy;
pub use device::Device;
pub use device::DeviceMap;
pub use device::DeviceNodes;
pub use device::DeviceType;
pub use device::Inventory;
pub use diff::InventoryDiff;
