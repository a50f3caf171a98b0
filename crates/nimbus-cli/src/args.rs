use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "nimbus")]
#[command(about = "Deploy LLMs as KServe inference services", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Model registry JSON (defaults to the built-in table)
    #[arg(long, env = "NIMBUS_MODEL_CONFIG", global = true)]
    pub model_config: Option<PathBuf>,

    /// OTLP/HTTP endpoint for trace export
    #[arg(long, env = "NIMBUS_OTLP_ENDPOINT", global = true)]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP endpoint
    #[arg(long, env = "NIMBUS_OTLP_TOKEN", global = true, hide_env_values = true)]
    pub otlp_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Args)]
pub struct ClusterArgs {
    /// Kubernetes API server URL (defaults to kubeconfig, then the in-cluster service account)
    #[arg(long, env = "NIMBUS_API_SERVER", global = true)]
    pub api_server: Option<String>,

    /// Kubeconfig context (defaults to the current context)
    #[arg(long, env = "NIMBUS_KUBE_CONTEXT", global = true)]
    pub kube_context: Option<String>,

    /// Bearer token for the API server
    #[arg(long, env = "NIMBUS_KUBE_TOKEN", global = true, hide_env_values = true)]
    pub kube_token: Option<String>,

    #[arg(long, global = true)]
    pub insecure_skip_tls_verify: bool,

    /// Use an in-memory cluster instead of a real one
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Attempts per cluster write before giving up on transient errors
    #[arg(long, default_value_t = 5, global = true)]
    pub apply_max_attempts: u32,

    /// Seconds between readiness checks
    #[arg(long, default_value_t = 10, global = true)]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a registered model and validate it
    Deploy(DeployArgs),
    /// Delete a deployment's cluster objects and its staged config
    Teardown {
        #[arg(long)]
        deploy_name: String,
        #[arg(long, default_value = "default")]
        namespace: String,
        /// Local mount of the model share; staged config there is removed too
        #[arg(long)]
        mount_path: Option<PathBuf>,
    },
    /// List registered models
    Models,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deploy(_) => "deploy",
            Self::Teardown { .. } => "teardown",
            Self::Models => "models",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CleanupArg {
    Always,
    AfterApply,
    Never,
}

#[derive(Debug, clap::Args)]
pub struct DeployArgs {
    /// Registry key of the model, e.g. mpt_7b
    #[arg(long)]
    pub model_name: String,

    /// Name for the inference service, volume and claim
    #[arg(long)]
    pub deploy_name: String,

    #[arg(long)]
    pub namespace: Option<String>,

    /// Number of GPUs (0 for CPU-only)
    #[arg(long, default_value_t = 0)]
    pub gpu: u32,

    /// CPU cores (default 8)
    #[arg(long)]
    pub cpu: Option<u32>,

    /// Container memory with a binary unit, e.g. 32Gi
    #[arg(long)]
    pub mem: Option<String>,

    /// NFS server and export as <address>:<share_path>
    #[arg(long)]
    pub nfs: Option<String>,

    /// Local mount point of the same NFS share
    #[arg(long)]
    pub mount_path: Option<PathBuf>,

    /// Seconds to wait for the service to become ready (default 1500)
    #[arg(long)]
    pub model_timeout: Option<u64>,

    /// Commit of the model repository (defaults to the pinned revision)
    #[arg(long)]
    pub repo_version: Option<String>,

    /// HuggingFace token, required for gated models
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Quantization bits (4 or 8); needs at least one GPU
    #[arg(long)]
    pub quantize: Option<u8>,

    /// Directory of JSON inputs to run after validation
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Leave the deployment running after validation
    #[arg(long)]
    pub keep_alive: bool,

    /// When a failed run deletes what it created
    #[arg(long, value_enum, default_value_t = CleanupArg::AfterApply)]
    pub cleanup: CleanupArg,

    /// Ingress gateway host for inference requests
    #[arg(long, env = "INGRESS_HOST")]
    pub ingress_host: Option<String>,

    #[arg(long, env = "INGRESS_PORT", default_value_t = 80)]
    pub ingress_port: u16,

    #[arg(long, default_value = "http")]
    pub ingress_scheme: String,

    /// JSON request body for validation (defaults to a built-in sample)
    #[arg(long)]
    pub sample_input: Option<PathBuf>,

    /// Timeout in seconds for each inference request
    #[arg(long, default_value_t = 120)]
    pub validation_timeout_secs: u64,
}
