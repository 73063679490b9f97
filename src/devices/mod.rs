//! Device metadata per user.

mod registry;

pub use registry::DeviceRegistry;
