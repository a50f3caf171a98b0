use serde::{Deserialize, Serialize};

const DEFAULT_INITIAL_WORKERS: u32 = 1;
const DEFAULT_BATCH_SIZE: u32 = 1;
const DEFAULT_MAX_BATCH_DELAY_MS: u64 = 500;
const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 2000;

/// Deployment metadata for one registered model.
///
/// Built once by the registry at startup and shared read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelEntry {
    /// Registry key, e.g. "mpt_7b".
    pub name: String,

    /// Source repository identity (e.g. HuggingFace ID "mosaicml/mpt-7b").
    pub repo_id: String,

    /// Commit the model files were staged from.
    pub repo_version: String,

    /// Serving handler reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,

    /// Explicit gating flag. `None` defers to the source organization policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gated: Option<bool>,

    #[serde(default)]
    pub model_params: ModelParams,

    #[serde(default)]
    pub registration_params: RegistrationParams,
}

/// Generation knobs passed to the serving handler. All optional and
/// model-family specific.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
}

/// Batching and timeout policy used when the model is registered with the
/// serving runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_workers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, rename = "max_batch_delay", skip_serializing_if = "Option::is_none")]
    pub max_batch_delay_ms: Option<u64>,
    #[serde(default, rename = "response_timeout", skip_serializing_if = "Option::is_none")]
    pub response_timeout_ms: Option<u64>,
}

impl RegistrationParams {
    pub fn initial_workers(&self) -> u32 {
        self.initial_workers.unwrap_or(DEFAULT_INITIAL_WORKERS)
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn max_batch_delay_ms(&self) -> u64 {
        self.max_batch_delay_ms.unwrap_or(DEFAULT_MAX_BATCH_DELAY_MS)
    }

    pub fn response_timeout_ms(&self) -> u64 {
        self.response_timeout_ms.unwrap_or(DEFAULT_RESPONSE_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_defaults() {
        let p = RegistrationParams::default();
        assert_eq!(p.initial_workers(), 1);
        assert_eq!(p.batch_size(), 1);
        assert_eq!(p.max_batch_delay_ms(), 500);
        assert_eq!(p.response_timeout_ms(), 2000);
    }

    #[test]
    fn test_registration_keys() {
        let p: RegistrationParams = serde_json::from_str(
            r#"{"batch_size": 4, "max_batch_delay": 200, "response_timeout": 9000}"#,
        )
        .unwrap();
        assert_eq!(p.batch_size(), 4);
        assert_eq!(p.max_batch_delay_ms(), 200);
        assert_eq!(p.response_timeout_ms(), 9000);
        assert_eq!(p.initial_workers(), 1);
    }
}
