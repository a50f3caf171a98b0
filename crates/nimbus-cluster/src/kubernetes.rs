use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::config::{Config, KubeConfigOptions};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;

use crate::status::status_from_object;
use crate::types::{
    ClusterError, ClusterResourceClient, ClusterResult, DeleteOutcome, ResourceDoc,
    ResourceHandle, ResourceRef, ResourceStatus,
};

pub const FIELD_MANAGER: &str = "nimbus";

/// How to reach the API server.
///
/// With nothing set, settings come from `kube::Config::infer`: the local
/// kubeconfig, then the pod's service account.
#[derive(Clone, Default)]
pub struct KubeSettings {
    /// Explicit server URL; skips kubeconfig entirely.
    pub api_server: Option<String>,
    /// Kubeconfig context to use instead of the current one.
    pub context: Option<String>,
    pub token: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub request_timeout: Option<Duration>,
}

impl std::fmt::Debug for KubeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSettings")
            .field("api_server", &self.api_server)
            .field("context", &self.context)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl KubeSettings {
    pub async fn resolve(&self) -> anyhow::Result<Config> {
        let mut config = match (&self.api_server, &self.context) {
            (Some(url), _) => {
                Config::new(url.parse().with_context(|| format!("invalid API server URL {url}"))?)
            }
            (None, Some(context)) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..Default::default()
                };
                Config::from_kubeconfig(&options)
                    .await
                    .with_context(|| format!("failed to load kubeconfig context {context}"))?
            }
            (None, None) => Config::infer()
                .await
                .context("no kubeconfig or in-cluster service account found; pass --api-server")?,
        };

        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            config.auth_info.token = Some(token.to_string().into());
        }
        if self.insecure_skip_tls_verify {
            tracing::warn!(api_server = %config.cluster_url, "TLS verification disabled");
            config.accept_invalid_certs = true;
        }
        if let Some(timeout) = self.request_timeout {
            config.read_timeout = Some(timeout);
        }
        Ok(config)
    }
}

/// [`ClusterResourceClient`] backed by a `kube::Client`.
///
/// Apply is server-side apply, so re-applying identical content leaves the
/// object (and its generation) untouched and a changed manifest updates the
/// existing object in place.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    field_manager: String,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KubeClient {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        tracing::debug!(api_server = %config.cluster_url, "connecting to cluster");
        let client = Client::try_from(config).context("failed to build Kubernetes client")?;
        Ok(Self::from_client(client))
    }

    pub async fn connect(settings: &KubeSettings) -> anyhow::Result<Self> {
        Self::new(settings.resolve().await?)
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            field_manager: FIELD_MANAGER.to_string(),
        }
    }

    fn api_for(&self, target: &ResourceRef) -> Api<DynamicObject> {
        let resource = api_resource(target);
        match &target.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn api_resource(target: &ResourceRef) -> ApiResource {
    let api_version = target.kind.api_version();
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: api_version.to_string(),
        kind: target.kind.kind().to_string(),
        plural: target.kind.plural().to_string(),
    }
}

fn classify(err: kube::Error, target: &ResourceRef) -> ClusterError {
    match err {
        kube::Error::Api(ae) => match ae.code {
            404 => ClusterError::NotFound(target.to_string()),
            408 | 409 | 429 | 500..=599 => {
                ClusterError::Transient(format!("{target}: {} {}: {}", ae.code, ae.reason, ae.message))
            }
            _ => ClusterError::Permanent(format!("{target}: {} {}: {}", ae.code, ae.reason, ae.message)),
        },
        // The request never completed: connect failures, timeouts, resets.
        e @ (kube::Error::HyperError(_) | kube::Error::Service(_)) => {
            ClusterError::Transient(format!("{target}: {e}"))
        }
        e => ClusterError::Permanent(format!("{target}: {e}")),
    }
}

#[async_trait]
impl ClusterResourceClient for KubeClient {
    async fn apply(&self, doc: &ResourceDoc) -> ClusterResult<ResourceHandle> {
        let params = PatchParams::apply(&self.field_manager).force();
        let obj = self
            .api_for(&doc.target)
            .patch(&doc.target.name, &params, &Patch::Apply(&doc.body))
            .await
            .map_err(|e| classify(e, &doc.target))?;

        Ok(ResourceHandle {
            target: doc.target.clone(),
            uid: obj.metadata.uid.unwrap_or_default(),
            generation: obj
                .metadata
                .generation
                .and_then(|g| u64::try_from(g).ok())
                .unwrap_or(0),
        })
    }

    async fn get(&self, target: &ResourceRef) -> ClusterResult<ResourceStatus> {
        let obj = self
            .api_for(target)
            .get(&target.name)
            .await
            .map_err(|e| classify(e, target))?;
        let value = serde_json::to_value(&obj)
            .map_err(|e| ClusterError::Permanent(format!("{target}: unreadable object: {e}")))?;
        Ok(status_from_object(target.kind, &value))
    }

    async fn patch(&self, target: &ResourceRef, fields: &Value) -> ClusterResult<()> {
        self.api_for(target)
            .patch(&target.name, &PatchParams::default(), &Patch::Merge(fields))
            .await
            .map_err(|e| classify(e, target))?;
        Ok(())
    }

    async fn delete(&self, target: &ResourceRef) -> ClusterResult<DeleteOutcome> {
        match self
            .api_for(target)
            .delete(&target.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(classify(e, target)),
        }
    }
}
