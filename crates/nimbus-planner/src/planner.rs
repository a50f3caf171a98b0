//! Turns a registry entry plus command-line overrides into a validated
//! [`DeploymentSpec`].
//!
//! Precedence for every field is: user value, then the model entry, then the
//! fallbacks in [`PlannerDefaults`]. Planning never touches the cluster or
//! the filesystem.

use std::path::PathBuf;

use nimbus_common::deployment_spec::{check_dns_label, check_path_segment, parse_binary_quantity};
use nimbus_common::{AccessToken, DeployError, DeploymentSpec, ModelEntry, Quantization, StorageSpec};

/// Source organizations whose models require an access token unless the
/// registry entry says otherwise.
const GATED_ORGANIZATIONS: [&str; 1] = ["meta-llama/"];

/// Values supplied by the caller. `None` means "not given".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserOverrides {
    pub deployment_name: String,
    pub namespace: Option<String>,
    pub gpu_count: Option<u32>,
    pub cpu_cores: Option<u32>,
    /// Binary quantity, e.g. "32Gi".
    pub memory: Option<String>,
    /// `<address>:<share_path>`.
    pub nfs: Option<String>,
    pub mount_path: Option<PathBuf>,
    pub storage_capacity: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub revision: Option<String>,
    pub access_token: Option<String>,
    pub quantization_bits: Option<u8>,
    pub input_data_path: Option<PathBuf>,
}

/// Hardcoded fallbacks used when neither the user nor the model entry
/// supplies a value.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerDefaults {
    pub cpu_cores: u32,
    pub memory: String,
    pub timeout_seconds: u64,
    pub namespace: String,
    pub storage_capacity: String,
}

impl Default for PlannerDefaults {
    fn default() -> Self {
        Self {
            cpu_cores: 8,
            memory: "32Gi".to_string(),
            timeout_seconds: 1500,
            namespace: "default".to_string(),
            storage_capacity: "100Gi".to_string(),
        }
    }
}

impl PlannerDefaults {
    pub fn plan(
        &self,
        entry: &ModelEntry,
        overrides: &UserOverrides,
    ) -> Result<DeploymentSpec, DeployError> {
        let deployment_name = overrides.deployment_name.trim().to_string();
        check_dns_label("deployment name", &deployment_name)?;

        let namespace = non_blank(overrides.namespace.as_deref())
            .unwrap_or(self.namespace.as_str())
            .to_string();
        check_dns_label("namespace", &namespace)?;

        let gpu_count = overrides.gpu_count.unwrap_or(0);

        let cpu_cores = overrides.cpu_cores.unwrap_or(self.cpu_cores);
        if cpu_cores == 0 {
            return Err(DeployError::invalid_config("cpu cores must be greater than 0"));
        }

        let memory = non_blank(overrides.memory.as_deref()).unwrap_or(self.memory.as_str());
        let memory_bytes = parse_binary_quantity(memory).ok_or_else(|| {
            DeployError::invalid_config(format!(
                "memory '{memory}' must be a positive quantity with one of the units Ei, Pi, Ti, Gi, Mi, Ki"
            ))
        })?;

        let timeout_seconds = overrides.timeout_seconds.unwrap_or(self.timeout_seconds);
        if timeout_seconds == 0 {
            return Err(DeployError::invalid_config("model timeout must be greater than 0"));
        }

        let quantization = match overrides.quantization_bits {
            None => None,
            Some(bits) => Some(Quantization::from_bits(bits).ok_or_else(|| {
                DeployError::invalid_config(format!("quantization must be 4 or 8 bits, got {bits}"))
            })?),
        };
        if quantization.is_some() && gpu_count == 0 {
            return Err(DeployError::invalid_config(
                "quantization requires at least one GPU",
            ));
        }

        let storage = self.storage(overrides)?;

        let revision = non_blank(overrides.revision.as_deref())
            .unwrap_or(entry.repo_version.as_str())
            .to_string();
        check_path_segment("revision", &revision)?;

        let access_token = non_blank(overrides.access_token.as_deref()).map(AccessToken::new);
        if access_token.is_none() && is_gated(entry) {
            return Err(DeployError::missing_credential(format!(
                "model '{}' ({}) is gated and needs an access token (--hf-token or HF_TOKEN)",
                entry.name, entry.repo_id
            )));
        }

        tracing::debug!(
            model = %entry.name,
            deployment = %deployment_name,
            %revision,
            gpu_count,
            "deployment planned"
        );

        let spec = DeploymentSpec {
            model_name: entry.name.clone(),
            repo_id: entry.repo_id.clone(),
            revision,
            handler: entry.handler.clone(),
            gpu_count,
            cpu_cores,
            memory_bytes,
            storage,
            deployment_name,
            namespace,
            timeout_seconds,
            access_token,
            quantization,
            input_data_path: overrides.input_data_path.clone(),
            model_params: entry.model_params.clone(),
            registration: entry.registration_params.clone(),
        };
        spec.validate()?;
        Ok(spec)
    }

    fn storage(&self, overrides: &UserOverrides) -> Result<StorageSpec, DeployError> {
        let nfs = non_blank(overrides.nfs.as_deref())
            .ok_or_else(|| DeployError::invalid_config("remote storage is required as <address>:<share_path>"))?;
        let (address, share) = nfs
            .split_once(':')
            .map(|(a, s)| (a.trim(), s.trim()))
            .filter(|(a, s)| !a.is_empty() && !s.is_empty())
            .ok_or_else(|| {
                DeployError::invalid_config(format!(
                    "remote storage '{nfs}' is not in the format <address>:<share_path>"
                ))
            })?;

        let local_mount_path = overrides
            .mount_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| DeployError::invalid_config("mount path is required"))?;

        let capacity = non_blank(overrides.storage_capacity.as_deref())
            .unwrap_or(self.storage_capacity.as_str())
            .to_string();
        if parse_binary_quantity(&capacity).is_none() {
            return Err(DeployError::invalid_config(format!(
                "storage capacity '{capacity}' is not a binary quantity"
            )));
        }

        Ok(StorageSpec {
            remote_address: address.to_string(),
            share_path: share.to_string(),
            local_mount_path,
            capacity,
        })
    }
}

/// Plan with the standard fallbacks.
pub fn plan(entry: &ModelEntry, overrides: &UserOverrides) -> Result<DeploymentSpec, DeployError> {
    PlannerDefaults::default().plan(entry, overrides)
}

/// Whether deploying `entry` needs an access token.
pub fn is_gated(entry: &ModelEntry) -> bool {
    entry.gated.unwrap_or_else(|| {
        GATED_ORGANIZATIONS
            .iter()
            .any(|org| entry.repo_id.starts_with(org))
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelRegistry;

    fn overrides(deploy: &str) -> UserOverrides {
        UserOverrides {
            deployment_name: deploy.to_string(),
            nfs: Some("10.0.0.5:/exports/llm".to_string()),
            mount_path: Some(PathBuf::from("/mnt/llm")),
            ..Default::default()
        }
    }

    fn entry(name: &str) -> ModelEntry {
        let registry = ModelRegistry::builtin().unwrap();
        (*registry.resolve(name).unwrap()).clone()
    }

    #[test]
    fn test_fallbacks_and_entry_defaults() {
        let mpt = entry("mpt_7b");
        let spec = plan(&mpt, &overrides("mpt-demo")).unwrap();
        assert_eq!(spec.cpu_cores, 8);
        assert_eq!(spec.memory_bytes, 32 << 30);
        assert_eq!(spec.timeout_seconds, 1500);
        assert_eq!(spec.namespace, "default");
        assert_eq!(spec.gpu_count, 0);
        assert_eq!(spec.revision, mpt.repo_version);
        assert_eq!(spec.storage.remote_address, "10.0.0.5");
        assert_eq!(spec.storage.share_path, "/exports/llm");
        assert_eq!(spec.storage.capacity, "100Gi");
        assert_eq!(spec.access_token, None);
        assert_eq!(spec.model_params, mpt.model_params);
        assert_eq!(spec.storage_uri(), format!("pvc://mpt-demo/mpt_7b/{}", mpt.repo_version));
    }

    #[test]
    fn test_user_values_win() {
        let o = UserOverrides {
            gpu_count: Some(2),
            cpu_cores: Some(4),
            memory: Some("48Gi".into()),
            namespace: Some("serving".into()),
            timeout_seconds: Some(600),
            revision: Some("deadbeef".into()),
            quantization_bits: Some(8),
            ..overrides("mpt-demo")
        };
        let spec = plan(&entry("mpt_7b"), &o).unwrap();
        assert_eq!(spec.gpu_count, 2);
        assert_eq!(spec.cpu_cores, 4);
        assert_eq!(spec.memory_quantity(), "48Gi");
        assert_eq!(spec.namespace, "serving");
        assert_eq!(spec.timeout_seconds, 600);
        assert_eq!(spec.revision, "deadbeef");
        assert_eq!(spec.quantization, Some(Quantization::Int8));
    }

    #[test]
    fn test_plan_is_pure() {
        let e = entry("falcon_7b");
        let o = UserOverrides {
            gpu_count: Some(1),
            access_token: Some("hf_x".into()),
            ..overrides("falcon")
        };
        assert_eq!(plan(&e, &o).unwrap(), plan(&e, &o).unwrap());
    }

    #[test]
    fn test_quantization_without_gpu_is_rejected() {
        let o = UserOverrides {
            gpu_count: Some(0),
            quantization_bits: Some(4),
            ..overrides("mpt-demo")
        };
        let err = plan(&entry("mpt_7b"), &o).unwrap_err();
        assert_eq!(
            err,
            DeployError::InvalidConfig("quantization requires at least one GPU".into())
        );

        let o = UserOverrides {
            quantization_bits: Some(4),
            ..overrides("mpt-demo")
        };
        assert!(matches!(plan(&entry("mpt_7b"), &o), Err(DeployError::InvalidConfig(_))));
    }

    #[test]
    fn test_revision_must_stay_under_the_mount() {
        for bad in ["../../outside", "a/b", "..", "rev\\up", "rev;rm"] {
            let o = UserOverrides {
                revision: Some(bad.into()),
                ..overrides("mpt-demo")
            };
            assert!(
                matches!(plan(&entry("mpt_7b"), &o), Err(DeployError::InvalidConfig(ref m)) if m.contains("revision")),
                "{bad}"
            );
        }

        let o = UserOverrides {
            revision: Some("v1.2_rc-3".into()),
            ..overrides("mpt-demo")
        };
        let spec = plan(&entry("mpt_7b"), &o).unwrap();
        assert!(spec.model_dir().starts_with("/mnt/llm/mpt_7b"));
        assert_eq!(spec.storage_uri(), "pvc://mpt-demo/mpt_7b/v1.2_rc-3");
    }

    #[test]
    fn test_unsupported_quantization_bits() {
        let o = UserOverrides {
            gpu_count: Some(1),
            quantization_bits: Some(16),
            ..overrides("mpt-demo")
        };
        assert!(matches!(plan(&entry("mpt_7b"), &o), Err(DeployError::InvalidConfig(_))));
    }

    #[test]
    fn test_gated_model_needs_token() {
        let llama = entry("llama2_7b");
        let err = plan(&llama, &overrides("llama")).unwrap_err();
        assert!(matches!(err, DeployError::MissingCredential(_)));

        let blank = UserOverrides {
            access_token: Some("   ".into()),
            ..overrides("llama")
        };
        assert!(matches!(plan(&llama, &blank), Err(DeployError::MissingCredential(_))));

        let with_token = UserOverrides {
            access_token: Some("hf_abc".into()),
            ..overrides("llama")
        };
        let spec = plan(&llama, &with_token).unwrap();
        assert_eq!(spec.access_token.as_ref().map(AccessToken::expose), Some("hf_abc"));
    }

    #[test]
    fn test_gating_policy() {
        let mut e = entry("mpt_7b");
        assert!(!is_gated(&e));

        e.repo_id = "meta-llama/Llama-2-13b-hf".into();
        e.gated = None;
        assert!(is_gated(&e));

        e.gated = Some(false);
        assert!(!is_gated(&e));
    }

    #[test]
    fn test_memory_units() {
        for bad in ["32GB", "32", "0Gi", "lots"] {
            let o = UserOverrides {
                memory: Some(bad.into()),
                ..overrides("mpt-demo")
            };
            assert!(
                matches!(plan(&entry("mpt_7b"), &o), Err(DeployError::InvalidConfig(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_storage_format() {
        let e = entry("mpt_7b");
        for bad in ["10.0.0.5", "10.0.0.5:", ":/exports", ""] {
            let o = UserOverrides {
                nfs: Some(bad.into()),
                ..overrides("mpt-demo")
            };
            assert!(matches!(plan(&e, &o), Err(DeployError::InvalidConfig(_))), "{bad}");
        }

        let o = UserOverrides {
            mount_path: None,
            ..overrides("mpt-demo")
        };
        assert!(matches!(plan(&e, &o), Err(DeployError::InvalidConfig(_))));
    }

    #[test]
    fn test_names_must_be_dns_labels() {
        let e = entry("mpt_7b");
        let too_long = "a".repeat(64);
        for bad in ["Mpt", "mpt_demo", "-mpt", "mpt-", "", too_long.as_str()] {
            assert!(
                matches!(plan(&e, &overrides(bad)), Err(DeployError::InvalidConfig(_))),
                "{bad}"
            );
        }
        let o = UserOverrides {
            namespace: Some("Team A".into()),
            ..overrides("mpt-demo")
        };
        assert!(matches!(plan(&e, &o), Err(DeployError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_cpu_and_timeout() {
        let e = entry("mpt_7b");
        let o = UserOverrides {
            cpu_cores: Some(0),
            ..overrides("mpt-demo")
        };
        assert!(matches!(plan(&e, &o), Err(DeployError::InvalidConfig(_))));

        let o = UserOverrides {
            timeout_seconds: Some(0),
            ..overrides("mpt-demo")
        };
        assert!(matches!(plan(&e, &o), Err(DeployError::InvalidConfig(_))));
    }
}
