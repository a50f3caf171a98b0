use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::status::status_from_object;
use crate::types::{
    ClusterError, ClusterResourceClient, ClusterResult, DeleteOutcome, ResourceDoc,
    ResourceHandle, ResourceKind, ResourceRef, ResourceStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Apply,
    Get,
    Patch,
    Delete,
}

/// How quickly objects of a kind report readiness, counted in status reads
/// since the last content change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessScript {
    Immediate,
    AfterPolls(u32),
    Never,
    FailAfterPolls(u32, String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub apply: u32,
    pub get: u32,
    pub patch: u32,
    pub delete: u32,
}

impl CallCounts {
    pub fn total(&self) -> u32 {
        self.apply + self.get + self.patch + self.delete
    }
}

/// In-process cluster with deterministic readiness and fault injection.
///
/// Cloning shares state, so a test can keep one clone for assertions and hand
/// another to the orchestrator.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct StoredObject {
    body: Value,
    uid: String,
    generation: u64,
    polls: u32,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ResourceRef, StoredObject>,
    scripts: HashMap<ResourceKind, ReadinessScript>,
    faults: HashMap<Operation, VecDeque<ClusterError>>,
    calls: CallCounts,
    deleted: Vec<ResourceRef>,
}

impl MemoryCluster {
    /// A cluster with the `default` namespace already present, where every
    /// object is ready on first read.
    pub fn new() -> Self {
        let mut inner = Inner::default();
        let default_ns = ResourceRef::new(ResourceKind::Namespace, "default", None);
        inner.objects.insert(
            default_ns,
            StoredObject {
                body: json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "default"}}),
                uid: uuid::Uuid::new_v4().to_string(),
                generation: 1,
                polls: 0,
            },
        );
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_readiness(self, kind: ResourceKind, script: ReadinessScript) -> Self {
        self.set_readiness(kind, script);
        self
    }

    pub fn set_readiness(&self, kind: ResourceKind, script: ReadinessScript) {
        self.lock().scripts.insert(kind, script);
    }

    /// Queue an error returned by the next call of `op`. Errors queue up and
    /// are consumed one per call.
    pub fn inject_fault(&self, op: Operation, err: ClusterError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Every successful delete, in order.
    pub fn deleted(&self) -> Vec<ResourceRef> {
        self.lock().deleted.clone()
    }

    pub fn contains(&self, target: &ResourceRef) -> bool {
        self.lock().objects.contains_key(target)
    }

    pub fn object(&self, target: &ResourceRef) -> Option<Value> {
        self.lock().objects.get(target).map(|o| o.body.clone())
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    fn begin(inner: &mut Inner, op: Operation) -> ClusterResult<()> {
        match op {
            Operation::Apply => inner.calls.apply += 1,
            Operation::Get => inner.calls.get += 1,
            Operation::Patch => inner.calls.patch += 1,
            Operation::Delete => inner.calls.delete += 1,
        }
        match inner.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// RFC 7396 JSON merge patch.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

fn synthesize_status(target: &ResourceRef, script: &ReadinessScript, polls: u32) -> Value {
    let (ready, failure) = match script {
        ReadinessScript::Immediate => (true, None),
        ReadinessScript::AfterPolls(n) => (polls >= *n, None),
        ReadinessScript::Never => (false, None),
        ReadinessScript::FailAfterPolls(n, msg) => (false, (polls >= *n).then(|| msg.clone())),
    };

    match target.kind {
        ResourceKind::Namespace => json!({"phase": if ready { "Active" } else { "Pending" }}),
        ResourceKind::PersistentVolume => match failure {
            Some(msg) => json!({"phase": "Failed", "message": msg}),
            None => json!({"phase": if ready { "Bound" } else { "Pending" }}),
        },
        ResourceKind::PersistentVolumeClaim => match failure {
            Some(_) => json!({"phase": "Lost"}),
            None => json!({"phase": if ready { "Bound" } else { "Pending" }}),
        },
        ResourceKind::InferenceService => {
            let ns = target.namespace.as_deref().unwrap_or("default");
            let mut status = json!({
                "conditions": [{
                    "type": "Ready",
                    "status": if ready { "True" } else { "False" },
                    "reason": if ready { "Ready" } else { "PredictorNotReady" },
                }],
            });
            if ready {
                status["url"] = json!(format!("http://{}.{}.example.com", target.name, ns));
            }
            if let Some(msg) = failure {
                status["modelStatus"] = json!({
                    "transitionStatus": "BlockedByFailedLoad",
                    "lastFailureInfo": {"message": msg},
                });
            }
            status
        }
    }
}

#[async_trait]
impl ClusterResourceClient for MemoryCluster {
    async fn apply(&self, doc: &ResourceDoc) -> ClusterResult<ResourceHandle> {
        let mut inner = self.lock();
        Self::begin(&mut inner, Operation::Apply)?;

        if let Some(ns) = doc.target.namespace.as_deref() {
            let ns_ref = ResourceRef::new(ResourceKind::Namespace, ns, None);
            if !inner.objects.contains_key(&ns_ref) {
                return Err(ClusterError::NotFound(ns_ref.to_string()));
            }
        }

        let obj = inner
            .objects
            .entry(doc.target.clone())
            .or_insert_with(|| StoredObject {
                body: Value::Null,
                uid: uuid::Uuid::new_v4().to_string(),
                generation: 0,
                polls: 0,
            });

        if obj.body != doc.body {
            obj.body = doc.body.clone();
            obj.generation += 1;
            obj.polls = 0;
        }

        Ok(ResourceHandle {
            target: doc.target.clone(),
            uid: obj.uid.clone(),
            generation: obj.generation,
        })
    }

    async fn get(&self, target: &ResourceRef) -> ClusterResult<ResourceStatus> {
        let mut inner = self.lock();
        Self::begin(&mut inner, Operation::Get)?;

        let script = inner
            .scripts
            .get(&target.kind)
            .cloned()
            .unwrap_or(ReadinessScript::Immediate);
        let obj = inner
            .objects
            .get_mut(target)
            .ok_or_else(|| ClusterError::NotFound(target.to_string()))?;
        obj.polls += 1;

        let mut view = obj.body.clone();
        view["metadata"]["generation"] = json!(obj.generation);
        view["status"] = synthesize_status(target, &script, obj.polls);
        view["status"]["observedGeneration"] = json!(obj.generation);
        Ok(status_from_object(target.kind, &view))
    }

    async fn patch(&self, target: &ResourceRef, fields: &Value) -> ClusterResult<()> {
        let mut inner = self.lock();
        Self::begin(&mut inner, Operation::Patch)?;

        let obj = inner
            .objects
            .get_mut(target)
            .ok_or_else(|| ClusterError::NotFound(target.to_string()))?;
        let before = obj.body.clone();
        merge_patch(&mut obj.body, fields);
        if obj.body != before {
            obj.generation += 1;
            obj.polls = 0;
        }
        Ok(())
    }

    async fn delete(&self, target: &ResourceRef) -> ClusterResult<DeleteOutcome> {
        let mut inner = self.lock();
        Self::begin(&mut inner, Operation::Delete)?;

        match inner.objects.remove(target) {
            Some(_) => {
                inner.deleted.push(target.clone());
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_common::ReadinessState;

    fn isvc(name: &str, ns: &str, gpus: u32) -> ResourceDoc {
        ResourceDoc::new(
            ResourceRef::new(ResourceKind::InferenceService, name, Some(ns)),
            json!({
                "apiVersion": "serving.kserve.io/v1beta1",
                "kind": "InferenceService",
                "metadata": {"name": name, "namespace": ns},
                "spec": {"predictor": {"pytorch": {"resources": {"limits": {"nvidia.com/gpu": gpus}}}}}
            }),
        )
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent() {
        let cluster = MemoryCluster::new();
        let doc = isvc("llm", "default", 1);
        let h1 = cluster.apply(&doc).await.unwrap();
        let h2 = cluster.apply(&doc).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.generation, 1);
        // default namespace + the service
        assert_eq!(cluster.object_count(), 2);
    }

    #[tokio::test]
    async fn test_changed_apply_updates_in_place() {
        let cluster = MemoryCluster::new();
        let h1 = cluster.apply(&isvc("llm", "default", 1)).await.unwrap();
        let h2 = cluster.apply(&isvc("llm", "default", 2)).await.unwrap();
        assert_eq!(h1.uid, h2.uid);
        assert_eq!(h2.generation, 2);
        assert_eq!(cluster.object_count(), 2);
    }

    #[tokio::test]
    async fn test_apply_into_missing_namespace() {
        let cluster = MemoryCluster::new();
        let err = cluster.apply(&isvc("llm", "serving", 1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_readiness_script() {
        let cluster = MemoryCluster::new()
            .with_readiness(ResourceKind::InferenceService, ReadinessScript::AfterPolls(3));
        let h = cluster.apply(&isvc("llm", "default", 1)).await.unwrap();

        let s1 = cluster.get(&h.target).await.unwrap();
        assert_eq!(s1.readiness(), ReadinessState::Provisioning);
        assert_eq!(s1.endpoint, None);
        let _ = cluster.get(&h.target).await.unwrap();
        let s3 = cluster.get(&h.target).await.unwrap();
        assert_eq!(s3.readiness(), ReadinessState::Ready);
        assert_eq!(s3.endpoint.as_deref(), Some("http://llm.default.example.com"));
    }

    #[tokio::test]
    async fn test_failure_script() {
        let cluster = MemoryCluster::new().with_readiness(
            ResourceKind::InferenceService,
            ReadinessScript::FailAfterPolls(1, "CUDA out of memory".into()),
        );
        let h = cluster.apply(&isvc("llm", "default", 1)).await.unwrap();
        let s = cluster.get(&h.target).await.unwrap();
        assert_eq!(s.readiness(), ReadinessState::Failed);
        assert!(s.failure.unwrap().contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_patch_bumps_generation_only_on_change() {
        let cluster = MemoryCluster::new();
        let h = cluster.apply(&isvc("llm", "default", 1)).await.unwrap();
        let patch = json!({"metadata": {"labels": {"team": "ml"}}});
        cluster.patch(&h.target, &patch).await.unwrap();
        cluster.patch(&h.target, &patch).await.unwrap();
        let again = cluster.apply(&isvc("llm", "default", 1)).await.unwrap();
        // the patched body differs from the doc, so the re-apply is an update
        assert_eq!(again.generation, 3);
        let body = cluster.object(&h.target).unwrap();
        assert!(body["metadata"].get("labels").is_none());
    }

    #[tokio::test]
    async fn test_delete_absent_is_not_an_error() {
        let cluster = MemoryCluster::new();
        let target = ResourceRef::new(ResourceKind::PersistentVolume, "nope", None);
        assert_eq!(cluster.delete(&target).await, Ok(DeleteOutcome::AlreadyAbsent));
        assert!(cluster.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_in_order() {
        let cluster = MemoryCluster::new();
        cluster.inject_fault(Operation::Apply, ClusterError::Transient("503".into()));
        let doc = isvc("llm", "default", 1);
        assert!(cluster.apply(&doc).await.unwrap_err().is_transient());
        assert!(cluster.apply(&doc).await.is_ok());
        assert_eq!(cluster.calls().apply, 2);
    }

    #[test]
    fn test_merge_patch_removes_nulls() {
        let mut v = json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge_patch(&mut v, &json!({"a": null, "b": {"c": 5}}));
        assert_eq!(v, json!({"b": {"c": 5, "d": 3}}));
    }
}
