//! Resource documents for one deployment.
//!
//! Every deployment owns a PersistentVolume, a PersistentVolumeClaim and an
//! InferenceService, all named after the deployment. The namespace is applied
//! too so that a fresh namespace is created on first use, but it is never
//! deleted by teardown.

use serde_json::{json, Map, Value};

use nimbus_cluster::{ResourceDoc, ResourceKind, ResourceRef};
use nimbus_common::DeploymentSpec;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const DEPLOYMENT_LABEL: &str = "nimbus.io/deployment";
/// Recorded on the inference service so a later teardown can find the
/// staged files without the original command line.
pub const MODEL_ANNOTATION: &str = "nimbus.io/model";
pub const REVISION_ANNOTATION: &str = "nimbus.io/revision";
const MANAGER: &str = "nimbus";
const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Documents in apply order.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentManifests {
    pub namespace: ResourceDoc,
    pub volume: ResourceDoc,
    pub claim: ResourceDoc,
    pub inference_service: ResourceDoc,
}

impl DeploymentManifests {
    pub fn build(spec: &DeploymentSpec) -> Self {
        Self {
            namespace: namespace_doc(&spec.namespace),
            volume: volume_doc(spec),
            claim: claim_doc(spec),
            inference_service: inference_service_doc(spec),
        }
    }

    pub fn in_apply_order(&self) -> [&ResourceDoc; 4] {
        [
            &self.namespace,
            &self.volume,
            &self.claim,
            &self.inference_service,
        ]
    }
}

/// Objects owned by a deployment, in deletion order: the serving resource
/// first, then the claim, then the volume it was bound to.
pub fn owned_resources(deployment_name: &str, namespace: &str) -> [ResourceRef; 3] {
    [
        ResourceRef::new(ResourceKind::InferenceService, deployment_name, Some(namespace)),
        ResourceRef::new(ResourceKind::PersistentVolumeClaim, deployment_name, Some(namespace)),
        ResourceRef::new(ResourceKind::PersistentVolume, deployment_name, None),
    ]
}

fn labels(deployment_name: &str) -> Value {
    json!({
        MANAGED_BY_LABEL: MANAGER,
        DEPLOYMENT_LABEL: deployment_name,
    })
}

/// Labels the claim selects its volume by. The deployment label keeps claims
/// from binding to another deployment's volume.
fn volume_selector(deployment_name: &str) -> Value {
    json!({
        "storage": "nfs",
        DEPLOYMENT_LABEL: deployment_name,
    })
}

fn namespace_doc(namespace: &str) -> ResourceDoc {
    ResourceDoc::new(
        ResourceRef::new(ResourceKind::Namespace, namespace, None),
        json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": namespace},
        }),
    )
}

fn volume_doc(spec: &DeploymentSpec) -> ResourceDoc {
    let name = &spec.deployment_name;
    let mut labels = labels(name);
    if let (Some(l), Some(sel)) = (labels.as_object_mut(), volume_selector(name).as_object()) {
        l.extend(sel.clone());
    }

    ResourceDoc::new(
        ResourceRef::new(ResourceKind::PersistentVolume, name.as_str(), None),
        json!({
            "apiVersion": "v1",
            "kind": "PersistentVolume",
            "metadata": {"name": name, "labels": labels},
            "spec": {
                "capacity": {"storage": spec.storage.capacity},
                "accessModes": ["ReadWriteMany"],
                "persistentVolumeReclaimPolicy": "Retain",
                "nfs": {
                    "server": spec.storage.remote_address,
                    "path": spec.storage.share_path,
                },
            },
        }),
    )
}

fn claim_doc(spec: &DeploymentSpec) -> ResourceDoc {
    let name = &spec.deployment_name;
    ResourceDoc::new(
        ResourceRef::new(
            ResourceKind::PersistentVolumeClaim,
            name.as_str(),
            Some(spec.namespace.as_str()),
        ),
        json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": name, "namespace": spec.namespace, "labels": labels(name)},
            "spec": {
                "storageClassName": "",
                "accessModes": ["ReadWriteMany"],
                "resources": {"requests": {"storage": spec.storage.capacity}},
                "selector": {"matchLabels": volume_selector(name)},
            },
        }),
    )
}

fn env_var(name: &str, value: impl ToString) -> Value {
    json!({"name": name, "value": value.to_string()})
}

fn predictor_env(spec: &DeploymentSpec) -> Vec<Value> {
    let params = &spec.model_params;
    let mut env = vec![
        env_var("TS_SERVICE_ENVELOPE", "body"),
        env_var("TS_NUMBER_OF_GPU", spec.gpu_count),
    ];
    if let Some(v) = params.temperature {
        env.push(env_var("NAI_TEMPERATURE", v));
    }
    if let Some(v) = params.repetition_penalty {
        env.push(env_var("NAI_REP_PENALTY", v));
    }
    if let Some(v) = params.top_p {
        env.push(env_var("NAI_TOP_P", v));
    }
    if let Some(v) = params.max_new_tokens {
        env.push(env_var("NAI_MAX_TOKENS", v));
    }
    if let Some(q) = spec.quantization {
        env.push(env_var("NAI_QUANTIZATION", q.bits()));
    }
    env
}

fn resource_list(spec: &DeploymentSpec) -> Value {
    let mut list = Map::new();
    list.insert("cpu".into(), json!(spec.cpu_cores.to_string()));
    list.insert("memory".into(), json!(spec.memory_quantity()));
    if spec.gpu_count > 0 {
        list.insert(GPU_RESOURCE.into(), json!(spec.gpu_count.to_string()));
    }
    Value::Object(list)
}

fn inference_service_doc(spec: &DeploymentSpec) -> ResourceDoc {
    let name = &spec.deployment_name;
    let resources = resource_list(spec);
    ResourceDoc::new(
        ResourceRef::new(
            ResourceKind::InferenceService,
            name.as_str(),
            Some(spec.namespace.as_str()),
        ),
        json!({
            "apiVersion": ResourceKind::InferenceService.api_version(),
            "kind": ResourceKind::InferenceService.kind(),
            "metadata": {
                "name": name,
                "namespace": spec.namespace,
                "labels": labels(name),
                "annotations": {
                    MODEL_ANNOTATION: spec.model_name,
                    REVISION_ANNOTATION: spec.revision,
                },
            },
            "spec": {
                "predictor": {
                    "pytorch": {
                        "protocolVersion": "v2",
                        "storageUri": spec.storage_uri(),
                        "env": predictor_env(spec),
                        "resources": {
                            "limits": resources.clone(),
                            "requests": resources,
                        },
                    },
                },
            },
        }),
    )
}
