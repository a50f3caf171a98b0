use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use nimbus_common::{DeployError, ReadinessState};

/// Declarative object kinds the orchestrator manages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    PersistentVolume,
    PersistentVolumeClaim,
    InferenceService,
}

impl ResourceKind {
    pub fn api_version(self) -> &'static str {
        match self {
            Self::Namespace | Self::PersistentVolume | Self::PersistentVolumeClaim => "v1",
            Self::InferenceService => "serving.kserve.io/v1beta1",
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::PersistentVolume => "PersistentVolume",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::InferenceService => "InferenceService",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            Self::Namespace => "namespaces",
            Self::PersistentVolume => "persistentvolumes",
            Self::PersistentVolumeClaim => "persistentvolumeclaims",
            Self::InferenceService => "inferenceservices",
        }
    }

    pub fn is_namespaced(self) -> bool {
        matches!(self, Self::PersistentVolumeClaim | Self::InferenceService)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Identity of a named object, independent of whether it exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    /// `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>, namespace: Option<&str>) -> Self {
        let namespace = if kind.is_namespaced() {
            namespace.map(str::to_string)
        } else {
            None
        };
        Self {
            kind,
            name: name.into(),
            namespace,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A full object definition ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDoc {
    pub target: ResourceRef,
    /// Complete manifest including apiVersion, kind, and metadata.
    pub body: Value,
}

impl ResourceDoc {
    pub fn new(target: ResourceRef, body: Value) -> Self {
        Self { target, body }
    }
}

/// Returned by apply. Stable across idempotent re-applies; `generation`
/// moves forward when the object content changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceHandle {
    pub target: ResourceRef,
    pub uid: String,
    pub generation: u64,
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (uid={}, generation={})", self.target, self.uid, self.generation)
    }
}

/// Typed view of an object's status block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceStatus {
    pub ready: bool,
    /// Set when the cluster reports a condition that will not resolve on its own.
    pub failure: Option<String>,
    /// Externally reachable URL, once the cluster has assigned one.
    pub endpoint: Option<String>,
    /// Latest human-readable condition message, if any.
    pub message: Option<String>,
    /// True when the controller has not yet observed the latest generation,
    /// so `ready` describes an older revision of the object.
    pub stale: bool,
    /// `metadata.annotations` of the object.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ResourceStatus {
    pub fn readiness(&self) -> ReadinessState {
        if self.failure.is_some() {
            ReadinessState::Failed
        } else if self.ready && !self.stale {
            ReadinessState::Ready
        } else {
            ReadinessState::Provisioning
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing to delete. Callers treat this as success.
    AlreadyAbsent,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// Connection failures, timeouts, throttling and 5xx responses.
    #[error("transient: {0}")]
    Transient(String),

    /// The request was understood and rejected.
    #[error("permanent: {0}")]
    Permanent(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl ClusterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ClusterError> for DeployError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Transient(msg) => DeployError::Transient(msg),
            ClusterError::Permanent(msg) => DeployError::Permanent(msg),
            ClusterError::NotFound(what) => DeployError::Permanent(format!("{what} not found")),
        }
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Declarative resource API: create-or-update, read status, partial update,
/// delete.
#[async_trait]
pub trait ClusterResourceClient: Send + Sync {
    async fn apply(&self, doc: &ResourceDoc) -> ClusterResult<ResourceHandle>;

    async fn get(&self, target: &ResourceRef) -> ClusterResult<ResourceStatus>;

    /// JSON merge patch of a subset of fields.
    async fn patch(&self, target: &ResourceRef, fields: &Value) -> ClusterResult<()>;

    async fn delete(&self, target: &ResourceRef) -> ClusterResult<DeleteOutcome>;
}

#[async_trait]
impl<C: ClusterResourceClient + ?Sized> ClusterResourceClient for std::sync::Arc<C> {
    async fn apply(&self, doc: &ResourceDoc) -> ClusterResult<ResourceHandle> {
        (**self).apply(doc).await
    }

    async fn get(&self, target: &ResourceRef) -> ClusterResult<ResourceStatus> {
        (**self).get(target).await
    }

    async fn patch(&self, target: &ResourceRef, fields: &Value) -> ClusterResult<()> {
        (**self).patch(target, fields).await
    }

    async fn delete(&self, target: &ResourceRef) -> ClusterResult<DeleteOutcome> {
        (**self).delete(target).await
    }
}
