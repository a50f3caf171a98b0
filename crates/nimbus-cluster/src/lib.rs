pub mod kubernetes;
pub mod memory;
pub mod retry;
pub mod status;
pub mod types;

pub use kubernetes::{KubeClient, KubeSettings};
pub use memory::{CallCounts, MemoryCluster, Operation, ReadinessScript};
pub use retry::{retry_transient, RetryPolicy, Retrying};
pub use status::status_from_object;
pub use types::{
    ClusterError, ClusterResourceClient, ClusterResult, DeleteOutcome, ResourceDoc,
    ResourceHandle, ResourceKind, ResourceRef, ResourceStatus,
};
