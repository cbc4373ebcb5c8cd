pub mod model;
pub mod runtime;
pub mod template;

pub use model::{digest, DigestError, Embedding, Model, RunnerIdentity};
pub use runtime::{RegistryConfig, RegistryError, RunnerBackend, RunnerRegistry};
pub use template::{render, Template, TemplateError};
