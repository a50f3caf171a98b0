pub mod manifest;
pub mod orchestrator;
pub mod report;
pub mod staging;
pub mod teardown;
pub mod validator;

pub use manifest::{owned_resources, DeploymentManifests};
pub use orchestrator::{CleanupPolicy, Orchestrator, OrchestratorConfig, Phase};
pub use report::{DeploymentReport, InputResult, Outcome};
pub use staging::{stage, StagedArtifacts};
pub use teardown::{teardown, teardown_deployment, TeardownSummary};
pub use validator::{
    builtin_sample, load_sample, DryRunValidator, HttpValidator, InferenceValidator, Ingress,
};
