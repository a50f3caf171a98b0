use std::path::Path;

use tracing::{info, warn};

use nimbus_cluster::{ClusterError, ClusterResourceClient, DeleteOutcome, ResourceKind, ResourceRef};
use nimbus_common::deployment_spec::check_path_segment;
use nimbus_common::DeployError;

use crate::manifest::{owned_resources, MODEL_ANNOTATION, REVISION_ANNOTATION};
use crate::staging::StagedArtifacts;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    pub deleted: Vec<ResourceRef>,
    pub already_absent: Vec<ResourceRef>,
}

/// Delete everything a deployment owns, then release staged files.
///
/// Works from the deployment name alone, so it also cleans up after a run
/// that crashed. Every step is attempted even if an earlier one fails; the
/// first error is returned.
pub async fn teardown<C: ClusterResourceClient + ?Sized>(
    cluster: &C,
    deployment_name: &str,
    namespace: &str,
    staged: Option<&StagedArtifacts>,
) -> Result<TeardownSummary, DeployError> {
    let mut summary = TeardownSummary::default();
    let mut first_error: Option<DeployError> = None;

    for target in owned_resources(deployment_name, namespace) {
        match cluster.delete(&target).await {
            Ok(DeleteOutcome::Deleted) => {
                info!(deployment = %deployment_name, resource = %target, "deleted");
                summary.deleted.push(target);
            }
            Ok(DeleteOutcome::AlreadyAbsent) => {
                info!(deployment = %deployment_name, resource = %target, "already absent");
                summary.already_absent.push(target);
            }
            Err(e) => {
                warn!(deployment = %deployment_name, resource = %target, error = %e, "delete failed");
                first_error.get_or_insert_with(|| e.into());
            }
        }
    }

    if let Some(staged) = staged {
        if let Err(e) = staged.release().await {
            warn!(deployment = %deployment_name, error = %e, "failed to release staged files");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}

/// Teardown by name for a deployment staged by an earlier process.
///
/// With a mount path, the staged config under `<mount>/<model>/<revision>`
/// is located through the annotations on the inference service, so the
/// service is read before anything is deleted. A service that is already
/// gone leaves nothing to locate and only the cluster objects are removed.
pub async fn teardown_deployment<C: ClusterResourceClient + ?Sized>(
    cluster: &C,
    deployment_name: &str,
    namespace: &str,
    mount_path: Option<&Path>,
) -> Result<TeardownSummary, DeployError> {
    let staged = match mount_path {
        Some(mount) => locate_staged(cluster, deployment_name, namespace, mount).await?,
        None => None,
    };
    teardown(cluster, deployment_name, namespace, staged.as_ref()).await
}

async fn locate_staged<C: ClusterResourceClient + ?Sized>(
    cluster: &C,
    deployment_name: &str,
    namespace: &str,
    mount: &Path,
) -> Result<Option<StagedArtifacts>, DeployError> {
    let target = ResourceRef::new(ResourceKind::InferenceService, deployment_name, Some(namespace));
    let status = match cluster.get(&target).await {
        Ok(status) => status,
        Err(ClusterError::NotFound(_)) => {
            info!(deployment = %deployment_name, "inference service absent, no staged files to locate");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let (Some(model), Some(revision)) = (
        status.annotations.get(MODEL_ANNOTATION),
        status.annotations.get(REVISION_ANNOTATION),
    ) else {
        warn!(deployment = %deployment_name, "inference service carries no model annotations, leaving staged files");
        return Ok(None);
    };
    check_path_segment("model name", model)?;
    check_path_segment("revision", revision)?;

    Ok(Some(StagedArtifacts::discovered(mount, model, revision)))
}
