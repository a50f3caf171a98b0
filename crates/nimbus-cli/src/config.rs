use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use nimbus_cluster::{
    ClusterResourceClient, KubeClient, KubeSettings, MemoryCluster, ReadinessScript, ResourceKind,
    RetryPolicy, Retrying,
};
use nimbus_common::DeployError;
use nimbus_deploy::{
    CleanupPolicy, DryRunValidator, HttpValidator, InferenceValidator, Ingress, OrchestratorConfig,
};
use nimbus_planner::{ModelRegistry, UserOverrides};

use crate::args::{CleanupArg, ClusterArgs, DeployArgs};

pub type Cluster = Retrying<Arc<dyn ClusterResourceClient>>;

pub fn load_registry(path: Option<&Path>) -> Result<ModelRegistry, DeployError> {
    match path {
        Some(p) => ModelRegistry::from_path(p),
        None => ModelRegistry::builtin(),
    }
}

pub async fn connect(args: &ClusterArgs) -> anyhow::Result<Cluster> {
    let policy = RetryPolicy::with_max_attempts(args.apply_max_attempts);

    if args.simulate {
        tracing::info!("using simulated in-memory cluster");
        let memory = MemoryCluster::new()
            .with_readiness(ResourceKind::InferenceService, ReadinessScript::AfterPolls(2));
        let client: Arc<dyn ClusterResourceClient> = Arc::new(memory);
        return Ok(Retrying::new(client, policy));
    }

    let client: Arc<dyn ClusterResourceClient> =
        Arc::new(KubeClient::connect(&kube_settings(args)).await?);
    Ok(Retrying::new(client, policy))
}

pub fn kube_settings(args: &ClusterArgs) -> KubeSettings {
    KubeSettings {
        api_server: args.api_server.clone(),
        context: args.kube_context.clone(),
        token: args.kube_token.clone(),
        insecure_skip_tls_verify: args.insecure_skip_tls_verify,
        request_timeout: Some(Duration::from_secs(30)),
    }
}

pub fn validator(cluster: &ClusterArgs, deploy: &DeployArgs) -> Arc<dyn InferenceValidator> {
    if cluster.simulate {
        return Arc::new(DryRunValidator);
    }
    let ingress = deploy.ingress_host.as_ref().map(|host| Ingress {
        scheme: deploy.ingress_scheme.clone(),
        host: host.clone(),
        port: deploy.ingress_port,
    });
    Arc::new(HttpValidator::new(ingress))
}

pub fn user_overrides(d: &DeployArgs) -> UserOverrides {
    UserOverrides {
        deployment_name: d.deploy_name.clone(),
        namespace: d.namespace.clone(),
        gpu_count: Some(d.gpu),
        cpu_cores: d.cpu,
        memory: d.mem.clone(),
        nfs: d.nfs.clone(),
        mount_path: d.mount_path.clone(),
        storage_capacity: None,
        timeout_seconds: d.model_timeout,
        revision: d.repo_version.clone(),
        access_token: d.hf_token.clone(),
        quantization_bits: d.quantize,
        input_data_path: d.data.clone(),
    }
}

pub fn orchestrator_config(
    cluster: &ClusterArgs,
    d: &DeployArgs,
    sample_input: Value,
) -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval: Duration::from_secs(cluster.poll_interval_secs.max(1)),
        validation_timeout: Duration::from_secs(d.validation_timeout_secs.max(1)),
        keep_alive: d.keep_alive,
        cleanup: match d.cleanup {
            CleanupArg::Always => CleanupPolicy::Always,
            CleanupArg::AfterApply => CleanupPolicy::AfterApplyAttempt,
            CleanupArg::Never => CleanupPolicy::Never,
        },
        sample_input,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Args, Command};
    use clap::Parser;

    fn deploy_args(extra: &[&str]) -> (Args, DeployArgs) {
        let mut argv = vec![
            "nimbus",
            "deploy",
            "--model-name",
            "mpt_7b",
            "--deploy-name",
            "mpt-demo",
            "--nfs",
            "10.0.0.5:/exports/llm",
            "--mount-path",
            "/mnt/llm",
        ];
        argv.extend_from_slice(extra);
        let mut args = Args::try_parse_from(argv).unwrap();
        let command = std::mem::replace(&mut args.command, Command::Models);
        match command {
            Command::Deploy(d) => (args, d),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_overrides_from_flags() {
        let (_, d) = deploy_args(&["--gpu", "2", "--quantize", "8", "--mem", "48Gi", "--keep-alive"]);
        let o = user_overrides(&d);
        assert_eq!(o.deployment_name, "mpt-demo");
        assert_eq!(o.gpu_count, Some(2));
        assert_eq!(o.quantization_bits, Some(8));
        assert_eq!(o.memory.as_deref(), Some("48Gi"));
        assert_eq!(o.cpu_cores, None);
        assert!(d.keep_alive);
    }

    #[test]
    fn test_orchestrator_defaults() {
        let (args, d) = deploy_args(&[]);
        let cfg = orchestrator_config(&args.cluster, &d, nimbus_deploy::builtin_sample());
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.cleanup, CleanupPolicy::AfterApplyAttempt);
        assert!(!cfg.keep_alive);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let (args, d) = deploy_args(&[
            "--simulate",
            "--cleanup",
            "never",
            "--apply-max-attempts",
            "3",
            "--poll-interval-secs",
            "2",
        ]);
        assert!(args.cluster.simulate);
        assert_eq!(args.cluster.apply_max_attempts, 3);
        let cfg = orchestrator_config(&args.cluster, &d, Value::Null);
        assert_eq!(cfg.cleanup, CleanupPolicy::Never);
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_simulated_cluster() {
        let (args, _) = deploy_args(&["--simulate"]);
        let cluster = connect(&args.cluster).await.unwrap();
        assert_eq!(cluster.policy().max_attempts, 5);
    }

    #[test]
    fn test_kube_settings_from_flags() {
        let (args, _) = deploy_args(&["--kube-context", "gpu-lab", "--kube-token", "sekret"]);
        let settings = kube_settings(&args.cluster);
        assert_eq!(settings.api_server, None);
        assert_eq!(settings.context.as_deref(), Some("gpu-lab"));
        assert_eq!(settings.token.as_deref(), Some("sekret"));
        assert!(!settings.insecure_skip_tls_verify);
    }

    #[tokio::test]
    async fn test_explicit_api_server_connects_without_kubeconfig() {
        let (args, _) = deploy_args(&["--api-server", "https://k8s.internal:6443"]);
        let cluster = connect(&args.cluster).await.unwrap();
        assert_eq!(cluster.policy().max_attempts, 5);
    }

    #[test]
    fn test_registry_selection() {
        assert!(load_registry(None).unwrap().resolve("mpt_7b").is_ok());
        assert!(matches!(
            load_registry(Some(Path::new("/nonexistent/models.json"))),
            Err(DeployError::InvalidConfig(_))
        ));
    }
}
