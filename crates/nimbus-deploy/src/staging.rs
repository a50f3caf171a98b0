//! Serving configuration written next to the staged model archive.
//!
//! The model directory `<mount>/<model>/<revision>` is produced by the
//! download step and must already contain `model-store/<model>.mar`. Staging
//! adds `config/config.properties`, which the serving runtime reads at
//! startup to register the model.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{debug, info, warn};

use nimbus_common::{DeployError, DeploymentSpec};

pub const MODEL_STORE_DIR: &str = "model-store";
pub const CONFIG_DIR: &str = "config";
pub const CONFIG_FILE: &str = "config.properties";

/// Where the claim is mounted inside the serving container.
const CONTAINER_MODEL_STORE: &str = "/mnt/models/model-store";

/// Paths written for one deployment. Only paths this run created are ever
/// removed again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedArtifacts {
    pub model_dir: PathBuf,
    pub config_path: PathBuf,
    created: Vec<PathBuf>,
}

impl StagedArtifacts {
    /// Config paths of a deployment staged by an earlier run, so teardown by
    /// name can release them. Nothing is checked on disk here.
    pub fn discovered(mount: &Path, model_name: &str, revision: &str) -> Self {
        let model_dir = nimbus_common::deployment_spec::model_dir(mount, model_name, revision);
        let config_dir = model_dir.join(CONFIG_DIR);
        let config_path = config_dir.join(CONFIG_FILE);
        Self {
            model_dir,
            config_path: config_path.clone(),
            created: vec![config_dir, config_path],
        }
    }

    /// Paths created by this run, in creation order.
    pub fn created(&self) -> &[PathBuf] {
        &self.created
    }

    /// Remove what this run created, newest first. Missing paths are fine;
    /// directories that gained other content are left in place.
    pub async fn release(&self) -> Result<(), DeployError> {
        for path in self.created.iter().rev() {
            let result = if path.is_dir() {
                tokio::fs::remove_dir(path).await
            } else {
                tokio::fs::remove_file(path).await
            };
            match result {
                Ok(()) => debug!(path = %path.display(), "released staged path"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) if path.is_dir() => {
                    warn!(path = %path.display(), error = %e, "staged directory not empty, leaving it");
                }
                Err(e) => {
                    return Err(DeployError::Staging(format!(
                        "failed to remove {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }
}

pub fn archive_path(spec: &DeploymentSpec) -> PathBuf {
    spec.model_dir()
        .join(MODEL_STORE_DIR)
        .join(format!("{}.mar", spec.model_name))
}

/// Contents of `config.properties` for `spec`.
pub fn render_config_properties(spec: &DeploymentSpec) -> String {
    let reg = &spec.registration;
    let workers = reg.initial_workers();
    let snapshot = json!({
        "name": "startup.cfg",
        "modelCount": 1,
        "models": {
            spec.model_name.as_str(): {
                spec.revision.as_str(): {
                    "defaultVersion": true,
                    "marName": format!("{}.mar", spec.model_name),
                    "minWorkers": workers,
                    "maxWorkers": workers,
                    "batchSize": reg.batch_size(),
                    "maxBatchDelay": reg.max_batch_delay_ms(),
                    "responseTimeout": reg.response_timeout_ms(),
                }
            }
        }
    });

    format!(
        "inference_address=http://0.0.0.0:8085\n\
         management_address=http://0.0.0.0:8085\n\
         metrics_address=http://0.0.0.0:8082\n\
         enable_metrics_api=true\n\
         metrics_format=prometheus\n\
         enable_envvars_config=true\n\
         install_py_dep_per_model=true\n\
         model_store={CONTAINER_MODEL_STORE}\n\
         model_snapshot={snapshot}\n"
    )
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> DeployError {
    DeployError::Staging(format!("failed to {action} {}: {e}", path.display()))
}

/// Verify the model archive and write the serving config. Safe to repeat:
/// existing identical content is left untouched.
pub async fn stage(spec: &DeploymentSpec) -> Result<StagedArtifacts, DeployError> {
    let archive = archive_path(spec);
    if !tokio::fs::try_exists(&archive).await.unwrap_or(false) {
        return Err(DeployError::invalid_config(format!(
            "model archive for '{}' revision {} not found at {}; download and package the model first",
            spec.model_name,
            spec.revision,
            archive.display()
        )));
    }

    if let Some(dir) = &spec.input_data_path {
        if !dir.is_dir() {
            return Err(DeployError::invalid_config(format!(
                "input data directory {} does not exist",
                dir.display()
            )));
        }
    }

    let model_dir = spec.model_dir();
    let config_dir = model_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);
    let mut created = Vec::new();

    match tokio::fs::create_dir(&config_dir).await {
        Ok(()) => created.push(config_dir.clone()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => return Err(io_error("create", &config_dir, e)),
    }

    let contents = render_config_properties(spec);
    match tokio::fs::read_to_string(&config_path).await {
        Ok(existing) if existing == contents => {
            debug!(path = %config_path.display(), "serving config already up to date");
        }
        Ok(_) => {
            tokio::fs::write(&config_path, &contents)
                .await
                .map_err(|e| io_error("write", &config_path, e))?;
            info!(path = %config_path.display(), "serving config updated");
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tokio::fs::write(&config_path, &contents)
                .await
                .map_err(|e| io_error("write", &config_path, e))?;
            created.push(config_path.clone());
            info!(path = %config_path.display(), "serving config written");
        }
        Err(e) => return Err(io_error("read", &config_path, e)),
    }

    Ok(StagedArtifacts {
        model_dir,
        config_path,
        created,
    })
}
