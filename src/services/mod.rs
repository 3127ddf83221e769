pub mod registry;

pub use registry::{MediaRegistry, RegistryError, RegistrySettings};
