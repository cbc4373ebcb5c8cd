pub mod registry;
pub mod types;

#[cfg(test)]
mod tests;

pub use registry::{RegistryConfig, RunnerBackend, RunnerRegistry};
pub use types::RegistryError;
