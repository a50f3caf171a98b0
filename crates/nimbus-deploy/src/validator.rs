use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HOST};
use serde_json::{json, Value};

use nimbus_common::DeployError;

/// One synthetic inference request against a deployed model.
#[async_trait]
pub trait InferenceValidator: Send + Sync {
    /// Send `input` to `model` behind `endpoint`. Returns the response body.
    /// Single attempt; any failure is [`DeployError::ValidationFailed`].
    async fn validate(
        &self,
        endpoint: &str,
        model: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<String, DeployError>;
}

#[async_trait]
impl<V: InferenceValidator + ?Sized> InferenceValidator for std::sync::Arc<V> {
    async fn validate(
        &self,
        endpoint: &str,
        model: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<String, DeployError> {
        (**self).validate(endpoint, model, input, timeout).await
    }
}

/// Accepts every request without sending it. Pairs with the in-memory
/// cluster, whose endpoints do not resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunValidator;

#[async_trait]
impl InferenceValidator for DryRunValidator {
    async fn validate(
        &self,
        endpoint: &str,
        model: &str,
        _input: &Value,
        _timeout: Duration,
    ) -> Result<String, DeployError> {
        tracing::info!(%endpoint, %model, "dry run, inference request not sent");
        Ok(String::new())
    }
}

/// Ingress gateway that fronts every inference service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingress {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

/// KServe v2 REST validator.
///
/// With an ingress configured, requests go to the ingress address and carry
/// the service hostname in the `Host` header; otherwise the endpoint URL the
/// cluster reported is called directly.
#[derive(Debug, Clone)]
pub struct HttpValidator {
    http: reqwest::Client,
    ingress: Option<Ingress>,
}

impl HttpValidator {
    pub fn new(ingress: Option<Ingress>) -> Self {
        Self {
            http: reqwest::Client::new(),
            ingress,
        }
    }

    fn request_target(&self, endpoint: &str, model: &str) -> Result<(String, Option<String>), DeployError> {
        let path = format!("/v2/models/{model}/infer");
        match &self.ingress {
            Some(ingress) => {
                let host = service_host(endpoint).ok_or_else(|| {
                    DeployError::ValidationFailed(format!("endpoint '{endpoint}' has no hostname"))
                })?;
                let url = format!("{}://{}:{}{path}", ingress.scheme, ingress.host, ingress.port);
                Ok((url, Some(host)))
            }
            None => Ok((format!("{}{path}", endpoint.trim_end_matches('/')), None)),
        }
    }
}

/// Hostname of a URL such as `http://llm.default.example.com/`, with the
/// port when it is not the scheme's default.
fn service_host(endpoint: &str) -> Option<String> {
    let url = reqwest::Url::parse(endpoint).ok()?;
    let host = url.host_str().filter(|h| !h.is_empty())?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[async_trait]
impl InferenceValidator for HttpValidator {
    async fn validate(
        &self,
        endpoint: &str,
        model: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<String, DeployError> {
        let (url, host) = self.request_target(endpoint, model)?;
        tracing::debug!(%url, host = ?host, "sending inference request");

        let mut req = self
            .http
            .post(&url)
            .timeout(timeout)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .json(input);
        if let Some(host) = host {
            req = req.header(HOST, host);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DeployError::ValidationFailed(format!("request to {url} failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| DeployError::ValidationFailed(format!("failed to read response: {e}")))?;

        if status != reqwest::StatusCode::OK {
            return Err(DeployError::ValidationFailed(format!("{status}: {body}")));
        }
        Ok(body)
    }
}

/// Request used when no sample file is given.
pub fn builtin_sample() -> Value {
    json!({
        "id": "nimbus-validation",
        "inputs": [{
            "name": "input0",
            "shape": [-1],
            "datatype": "BYTES",
            "data": ["What is the capital of France?"]
        }]
    })
}

pub async fn load_sample(path: &Path) -> Result<Value, DeployError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        DeployError::invalid_config(format!("failed to read sample input {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        DeployError::invalid_config(format!("sample input {} is not JSON: {e}", path.display()))
    })
}

/// Regular files directly inside `dir`, sorted by name.
pub async fn list_inputs(dir: &Path) -> Result<Vec<PathBuf>, DeployError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        DeployError::invalid_config(format!("failed to read input directory {}: {e}", dir.display()))
    })?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DeployError::invalid_config(format!("failed to list {}: {e}", dir.display())))?
    {
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
