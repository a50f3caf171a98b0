use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DeployError;
use crate::model_entry::{ModelParams, RegistrationParams};

const MAX_LABEL_LEN: usize = 63;

/// Binary quantity suffixes, largest first.
const BINARY_UNITS: [(&str, u64); 6] = [
    ("Ei", 1 << 60),
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

/// Weight precision requested at deploy time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    Int4,
    Int8,
}

impl Quantization {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            4 => Some(Self::Int4),
            8 => Some(Self::Int8),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Int4 => 4,
            Self::Int8 => 8,
        }
    }
}

/// Source-repository token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Shared storage backing the model files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageSpec {
    /// NFS-style server address.
    pub remote_address: String,
    /// Export path on the server.
    pub share_path: String,
    /// Where the same share is mounted on this machine.
    pub local_mount_path: PathBuf,
    /// Capacity requested by the volume and claim, e.g. "100Gi".
    pub capacity: String,
}

/// Fully resolved, validated deployment request.
///
/// Produced by the planner. Fields are public for reading; consumers that
/// accept a spec from outside call [`DeploymentSpec::validate`] before acting
/// on it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentSpec {
    pub model_name: String,
    pub repo_id: String,
    /// Resolved revision (override or pinned).
    pub revision: String,
    pub handler: Option<String>,

    /// 0 means CPU-only.
    pub gpu_count: u32,
    pub cpu_cores: u32,
    pub memory_bytes: u64,

    pub storage: StorageSpec,

    pub deployment_name: String,
    pub namespace: String,
    pub timeout_seconds: u64,

    pub access_token: Option<AccessToken>,
    pub quantization: Option<Quantization>,
    pub input_data_path: Option<PathBuf>,

    pub model_params: ModelParams,
    pub registration: RegistrationParams,
}

impl DeploymentSpec {
    /// Check the invariants every planned spec satisfies.
    pub fn validate(&self) -> Result<(), DeployError> {
        check_dns_label("deployment name", &self.deployment_name)?;
        check_dns_label("namespace", &self.namespace)?;
        check_path_segment("model name", &self.model_name)?;
        check_path_segment("revision", &self.revision)?;
        if self.cpu_cores == 0 {
            return Err(DeployError::invalid_config("cpu cores must be greater than 0"));
        }
        if self.memory_bytes == 0 {
            return Err(DeployError::invalid_config("memory must be greater than 0"));
        }
        if self.timeout_seconds == 0 {
            return Err(DeployError::invalid_config("model timeout must be greater than 0"));
        }
        if self.quantization.is_some() && self.gpu_count == 0 {
            return Err(DeployError::invalid_config(
                "quantization requires at least one GPU",
            ));
        }
        let storage = &self.storage;
        if storage.remote_address.trim().is_empty() || storage.share_path.trim().is_empty() {
            return Err(DeployError::invalid_config(
                "remote storage needs both an address and a share path",
            ));
        }
        if storage.local_mount_path.as_os_str().is_empty() {
            return Err(DeployError::invalid_config("mount path is required"));
        }
        if parse_binary_quantity(&storage.capacity).is_none() {
            return Err(DeployError::invalid_config(format!(
                "storage capacity '{}' is not a binary quantity",
                storage.capacity
            )));
        }
        Ok(())
    }

    /// Memory rendered as a Kubernetes quantity using the largest exact unit.
    pub fn memory_quantity(&self) -> String {
        format_binary_quantity(self.memory_bytes)
    }

    /// Location of the model inside the claim.
    pub fn storage_uri(&self) -> String {
        format!(
            "pvc://{}/{}/{}",
            self.deployment_name, self.model_name, self.revision
        )
    }

    /// Per-model, per-revision directory on the local mount.
    pub fn model_dir(&self) -> PathBuf {
        model_dir(&self.storage.local_mount_path, &self.model_name, &self.revision)
    }
}

pub fn model_dir(mount: &Path, model_name: &str, revision: &str) -> PathBuf {
    mount.join(model_name).join(revision)
}

/// Kubernetes object names used here must be DNS-1123 labels.
pub fn check_dns_label(what: &str, value: &str) -> Result<(), DeployError> {
    let valid_chars = value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    let valid = !value.is_empty()
        && value.len() <= MAX_LABEL_LEN
        && valid_chars
        && !value.starts_with('-')
        && !value.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(DeployError::invalid_config(format!(
            "{what} '{value}' must be a DNS-1123 label: lowercase letters, digits and '-', at most 63 characters"
        )))
    }
}

/// A single directory name under the mount: `[A-Za-z0-9._-]`, not `.` or `..`.
pub fn check_path_segment(what: &str, value: &str) -> Result<(), DeployError> {
    let valid_chars = value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if !value.is_empty() && valid_chars && value != "." && value != ".." {
        Ok(())
    } else {
        Err(DeployError::invalid_config(format!(
            "{what} '{value}' may only contain letters, digits, '.', '_' and '-'"
        )))
    }
}

/// Parse a binary quantity such as "32Gi" into bytes.
///
/// Only the binary suffixes are accepted; bare numbers and decimal units are
/// rejected so that the request the cluster sees is unambiguous.
pub fn parse_binary_quantity(s: &str) -> Option<u64> {
    let s = s.trim();
    for (suffix, factor) in BINARY_UNITS {
        if let Some(num) = s.strip_suffix(suffix) {
            let n: u64 = num.parse().ok()?;
            if n == 0 {
                return None;
            }
            return n.checked_mul(factor);
        }
    }
    None
}

pub fn format_binary_quantity(bytes: u64) -> String {
    for (suffix, factor) in BINARY_UNITS {
        if bytes >= factor && bytes % factor == 0 {
            return format!("{}{}", bytes / factor, suffix);
        }
    }
    bytes.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binary_quantity() {
        assert_eq!(parse_binary_quantity("32Gi"), Some(32 << 30));
        assert_eq!(parse_binary_quantity("512Mi"), Some(512 << 20));
        assert_eq!(parse_binary_quantity(" 1Ti "), Some(1 << 40));
        assert_eq!(parse_binary_quantity("32G"), None);
        assert_eq!(parse_binary_quantity("32"), None);
        assert_eq!(parse_binary_quantity("0Gi"), None);
        assert_eq!(parse_binary_quantity("xGi"), None);
        assert_eq!(parse_binary_quantity("99999999999Ei"), None);
    }

    #[test]
    fn test_format_binary_quantity() {
        assert_eq!(format_binary_quantity(32 << 30), "32Gi");
        assert_eq!(format_binary_quantity(1536 << 20), "1536Mi");
        assert_eq!(format_binary_quantity(1 << 40), "1Ti");
        assert_eq!(format_binary_quantity(1000), "1000");
    }

    #[test]
    fn test_quantization_bits() {
        assert_eq!(Quantization::from_bits(4), Some(Quantization::Int4));
        assert_eq!(Quantization::from_bits(8).map(Quantization::bits), Some(8));
        assert_eq!(Quantization::from_bits(16), None);
    }

    #[test]
    fn test_access_token_is_redacted() {
        let t = AccessToken::new("hf_secret");
        assert_eq!(format!("{:?}", t), "AccessToken(***)");
        assert_eq!(t.expose(), "hf_secret");
    }

    fn valid_spec() -> DeploymentSpec {
        DeploymentSpec {
            model_name: "mpt_7b".into(),
            repo_id: "mosaicml/mpt-7b".into(),
            revision: "abc123".into(),
            handler: None,
            gpu_count: 1,
            cpu_cores: 8,
            memory_bytes: 32 << 30,
            storage: StorageSpec {
                remote_address: "10.0.0.5".into(),
                share_path: "/exports/llm".into(),
                local_mount_path: PathBuf::from("/mnt/llm"),
                capacity: "100Gi".into(),
            },
            deployment_name: "mpt-demo".into(),
            namespace: "default".into(),
            timeout_seconds: 600,
            access_token: None,
            quantization: None,
            input_data_path: None,
            model_params: ModelParams::default(),
            registration: RegistrationParams::default(),
        }
    }

    #[test]
    fn test_validate_rejects_broken_invariants() {
        assert_eq!(valid_spec().validate(), Ok(()));

        let mut s = valid_spec();
        s.gpu_count = 0;
        s.quantization = Some(Quantization::Int4);
        assert!(matches!(s.validate(), Err(DeployError::InvalidConfig(m)) if m.contains("GPU")));

        let mut s = valid_spec();
        s.timeout_seconds = 0;
        assert!(matches!(s.validate(), Err(DeployError::InvalidConfig(_))));

        let mut s = valid_spec();
        s.deployment_name = "Not_A_Label".into();
        assert!(matches!(s.validate(), Err(DeployError::InvalidConfig(_))));

        let mut s = valid_spec();
        s.revision = "../../outside".into();
        assert!(matches!(s.validate(), Err(DeployError::InvalidConfig(_))));
    }

    #[test]
    fn test_path_segments() {
        assert!(check_path_segment("revision", "898df1396f35e447d5fe44e0a3ccaaaa69f30d36").is_ok());
        assert!(check_path_segment("revision", "v1.0_rc-2").is_ok());
        for bad in ["", ".", "..", "a/b", "..\\x", "rev 1", "main~1"] {
            assert!(check_path_segment("revision", bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_model_dir_layout() {
        let dir = model_dir(Path::new("/mnt/llm"), "mpt_7b", "abc123");
        assert_eq!(dir, PathBuf::from("/mnt/llm/mpt_7b/abc123"));
    }
}
