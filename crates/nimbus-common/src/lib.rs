pub mod deployment_spec;
pub mod error;
pub mod model_entry;
pub mod readiness;
pub mod telemetry;

pub use deployment_spec::{AccessToken, DeploymentSpec, Quantization, StorageSpec};
pub use error::{DeployError, FailureCategory};
pub use model_entry::{ModelEntry, ModelParams, RegistrationParams};
pub use readiness::ReadinessState;
