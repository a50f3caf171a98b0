use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use nimbus_common::{DeployError, ModelEntry, ModelParams, RegistrationParams};

/// Starter table. Its pinned revisions are placeholders, not verified
/// commits; real deployments pass `--repo-version` or their own table.
const BUILTIN_CONFIG: &str = include_str!("../model_config.json");

/// On-disk shape of one entry. Required fields are optional here so that a
/// missing value is reported by name instead of as a serde error.
#[derive(Debug, Deserialize)]
struct RawEntry {
    repo_id: Option<String>,
    repo_version: Option<String>,
    #[serde(default)]
    handler: Option<String>,
    #[serde(default)]
    gated: Option<bool>,
    #[serde(default)]
    model_params: ModelParams,
    #[serde(default)]
    registration_params: RegistrationParams,
}

/// Read-only model table, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    entries: BTreeMap<String, Arc<ModelEntry>>,
}

impl ModelRegistry {
    /// The table compiled into the binary; its pinned revisions are placeholders.
    pub fn builtin() -> Result<Self, DeployError> {
        Self::from_json_str(BUILTIN_CONFIG)
    }

    pub fn from_path(path: &Path) -> Result<Self, DeployError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeployError::invalid_config(format!(
                "failed to read model config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, DeployError> {
        let parsed: BTreeMap<String, RawEntry> = serde_json::from_str(raw)
            .map_err(|e| DeployError::invalid_config(format!("malformed model config: {e}")))?;
        if parsed.is_empty() {
            return Err(DeployError::invalid_config("model config has no entries"));
        }

        let mut entries = BTreeMap::new();
        for (name, raw) in parsed {
            let entry = validate_entry(&name, raw)?;
            entries.insert(name, Arc::new(entry));
        }
        tracing::debug!(models = entries.len(), "model registry loaded");
        Ok(Self { entries })
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<ModelEntry>, DeployError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| DeployError::UnknownModel {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    /// Registered model names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<ModelEntry>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_entry(name: &str, raw: RawEntry) -> Result<ModelEntry, DeployError> {
    let required = |field: &str, value: Option<String>| -> Result<String, DeployError> {
        match value {
            Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => Err(DeployError::invalid_config(format!(
                "model '{name}' is missing {field}"
            ))),
        }
    };

    Ok(ModelEntry {
        name: name.to_string(),
        repo_id: required("repo_id", raw.repo_id)?,
        repo_version: required("repo_version", raw.repo_version)?,
        handler: raw.handler.filter(|h| !h.trim().is_empty()),
        gated: raw.gated,
        model_params: raw.model_params,
        registration_params: raw.registration_params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_models() {
        let registry = ModelRegistry::builtin().unwrap();
        assert_eq!(
            registry.names(),
            vec!["codellama_7b_python", "falcon_7b", "llama2_7b", "mpt_7b"]
        );

        let mpt = registry.resolve("mpt_7b").unwrap();
        assert_eq!(mpt.repo_id, "mosaicml/mpt-7b");
        assert!(!mpt.repo_version.is_empty());

        let llama = registry.resolve("llama2_7b").unwrap();
        assert_eq!(llama.gated, Some(true));
    }

    #[test]
    fn test_resolve_is_shared() {
        let registry = ModelRegistry::builtin().unwrap();
        let a = registry.resolve("falcon_7b").unwrap();
        let b = registry.resolve("falcon_7b").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_model_lists_available() {
        let registry = ModelRegistry::builtin().unwrap();
        match registry.resolve("gpt2") {
            Err(DeployError::UnknownModel { name, available }) => {
                assert_eq!(name, "gpt2");
                assert!(available.contains("mpt_7b"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_fields_rejected_at_load() {
        let err = ModelRegistry::from_json_str(r#"{"m": {"repo_id": "org/m"}}"#).unwrap_err();
        assert_eq!(
            err,
            DeployError::InvalidConfig("model 'm' is missing repo_version".into())
        );

        let err = ModelRegistry::from_json_str(r#"{"m": {"repo_id": " ", "repo_version": "abc"}}"#)
            .unwrap_err();
        assert_eq!(
            err,
            DeployError::InvalidConfig("model 'm' is missing repo_id".into())
        );
    }

    #[test]
    fn test_malformed_and_empty_configs() {
        assert!(matches!(
            ModelRegistry::from_json_str("[1, 2]"),
            Err(DeployError::InvalidConfig(_))
        ));
        assert!(matches!(
            ModelRegistry::from_json_str("{}"),
            Err(DeployError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(
            &path,
            r#"{"tiny": {"repo_id": "org/tiny", "repo_version": "v1",
                "registration_params": {"batch_size": 8}}}"#,
        )
        .unwrap();

        let registry = ModelRegistry::from_path(&path).unwrap();
        let tiny = registry.resolve("tiny").unwrap();
        assert_eq!(tiny.registration_params.batch_size(), 8);
        assert_eq!(tiny.registration_params.response_timeout_ms(), 2000);

        drop(dir);
        assert!(matches!(
            ModelRegistry::from_path(&path),
            Err(DeployError::InvalidConfig(_))
        ));
    }
}
