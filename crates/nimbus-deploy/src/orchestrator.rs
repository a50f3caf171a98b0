//! Drives one deployment from staged files to a validated, optionally torn
//! down, inference service.
//!
//! ```text
//! Init -> Provisioned -> Applied -> Polling -> Ready -> [Validated] -> [TornDown]
//!                                          \-> Failed | TimedOut | Cancelled -> [TornDown]
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nimbus_cluster::{ClusterResourceClient, ResourceDoc, ResourceHandle, ResourceRef};
use nimbus_common::{DeployError, DeploymentSpec, ModelEntry, ReadinessState};
use nimbus_planner::{PlannerDefaults, UserOverrides};

use crate::manifest::DeploymentManifests;
use crate::report::{DeploymentReport, InputResult, Outcome};
use crate::staging::{stage, StagedArtifacts};
use crate::teardown::teardown;
use crate::validator::{builtin_sample, list_inputs, load_sample, InferenceValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Provisioned,
    Applied,
    Polling,
    Ready,
    Failed,
    TimedOut,
    Cancelled,
    Validated,
    TornDown,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Provisioned => "provisioned",
            Self::Applied => "applied",
            Self::Polling => "polling",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Validated => "validated",
            Self::TornDown => "torn_down",
        }
    }
}

/// When a failed run cleans up after itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Tear down after any failure, including staging failures.
    Always,
    /// Tear down once at least one apply has been attempted.
    #[default]
    AfterApplyAttempt,
    /// Leave everything in place for inspection.
    Never,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// Per-request timeout for validation and input-data requests.
    pub validation_timeout: Duration,
    /// Skip teardown entirely, on success and on failure.
    pub keep_alive: bool,
    pub cleanup: CleanupPolicy,
    pub sample_input: Value,
    pub planner: PlannerDefaults,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            validation_timeout: Duration::from_secs(120),
            keep_alive: false,
            cleanup: CleanupPolicy::default(),
            sample_input: builtin_sample(),
            planner: PlannerDefaults::default(),
        }
    }
}

/// Mutable bookkeeping for a single run. Never shared between runs.
struct RunState {
    report: DeploymentReport,
    apply_attempted: bool,
}

impl RunState {
    fn new(spec: &DeploymentSpec) -> Self {
        Self {
            report: DeploymentReport::new(&spec.deployment_name, &spec.model_name, &spec.namespace),
            apply_attempted: false,
        }
    }

    fn enter(&mut self, phase: Phase) {
        info!(deployment = %self.report.deployment, phase = phase.as_str(), "phase");
        self.report.phases.push(phase);
    }

    fn set_readiness(&mut self, next: ReadinessState) {
        let current = self.report.readiness;
        if current.can_transition_to(next) {
            self.report.readiness = next;
        } else {
            warn!(
                deployment = %self.report.deployment,
                from = current.as_str(),
                to = next.as_str(),
                "ignoring readiness regression"
            );
        }
    }
}

pub struct Orchestrator<C, V> {
    cluster: C,
    validator: V,
    config: OrchestratorConfig,
}

impl<C: ClusterResourceClient, V: InferenceValidator> Orchestrator<C, V> {
    pub fn new(cluster: C, validator: V, config: OrchestratorConfig) -> Self {
        Self {
            cluster,
            validator,
            config,
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Plan, then run. Planning failures are reported without touching the
    /// cluster or the filesystem.
    pub async fn plan_and_run(
        &self,
        entry: &ModelEntry,
        overrides: &UserOverrides,
        cancel: &CancellationToken,
    ) -> DeploymentReport {
        match self.config.planner.plan(entry, overrides) {
            Ok(spec) => self.run(&spec, cancel).await,
            Err(e) => {
                warn!(model = %entry.name, deployment = %overrides.deployment_name, error = %e, "rejected");
                let namespace = overrides
                    .namespace
                    .as_deref()
                    .unwrap_or(self.config.planner.namespace.as_str());
                DeploymentReport::rejected(&overrides.deployment_name, &entry.name, namespace, e)
            }
        }
    }

    /// Run an already planned spec. A spec that fails validation is rejected
    /// without touching the cluster or the filesystem.
    pub async fn run(&self, spec: &DeploymentSpec, cancel: &CancellationToken) -> DeploymentReport {
        if let Err(e) = spec.validate() {
            warn!(deployment = %spec.deployment_name, error = %e, "rejected invalid spec");
            return DeploymentReport::rejected(
                &spec.deployment_name,
                &spec.model_name,
                &spec.namespace,
                e,
            );
        }

        let mut run = RunState::new(spec);
        run.enter(Phase::Init);
        info!(
            deployment = %spec.deployment_name,
            model = %spec.model_name,
            revision = %spec.revision,
            namespace = %spec.namespace,
            "starting deployment"
        );

        let staged = match stage(spec).await {
            Ok(staged) => staged,
            Err(e) => return self.fail(run, spec, e, None).await,
        };
        run.enter(Phase::Provisioned);

        let manifests = DeploymentManifests::build(spec);
        run.apply_attempted = true;
        let applied = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DeployError::Cancelled),
            r = self.apply_all(&manifests) => r,
        };
        let handle = match applied {
            Ok(handle) => handle,
            Err(e) => return self.fail(run, spec, e, Some(&staged)).await,
        };
        run.enter(Phase::Applied);
        run.set_readiness(ReadinessState::Provisioning);

        run.enter(Phase::Polling);
        let endpoint = match self.await_ready(spec, &handle.target, cancel).await {
            Ok(endpoint) => endpoint,
            Err(e) => return self.fail(run, spec, e, Some(&staged)).await,
        };
        run.set_readiness(ReadinessState::Ready);
        run.enter(Phase::Ready);
        run.report.provisioning = Outcome::Succeeded;
        run.report.endpoint = Some(endpoint.clone());
        info!(deployment = %spec.deployment_name, %endpoint, "deployment ready");

        let validation = self
            .infer(&endpoint, &spec.model_name, &self.config.sample_input, cancel)
            .await;
        match validation {
            Ok(body) => {
                debug!(deployment = %spec.deployment_name, response = %body, "validation response");
                run.report.validation = Outcome::Succeeded;
                run.enter(Phase::Validated);
                if let Some(dir) = &spec.input_data_path {
                    run.report.inputs = self.run_inputs(spec, &endpoint, dir, cancel).await;
                }
            }
            Err(e) => {
                warn!(deployment = %spec.deployment_name, error = %e, "validation failed");
                run.report.validation = Outcome::Failed(e);
            }
        }

        self.finish(run, spec, true, Some(&staged)).await
    }

    /// Record a terminal provisioning failure and clean up per policy.
    async fn fail(
        &self,
        mut run: RunState,
        spec: &DeploymentSpec,
        err: DeployError,
        staged: Option<&StagedArtifacts>,
    ) -> DeploymentReport {
        let (readiness, phase) = match err {
            DeployError::TimedOut { .. } => (ReadinessState::TimedOut, Phase::TimedOut),
            DeployError::Cancelled => (ReadinessState::Cancelled, Phase::Cancelled),
            _ => (ReadinessState::Failed, Phase::Failed),
        };
        error!(deployment = %spec.deployment_name, error = %err, "deployment failed");
        run.set_readiness(readiness);
        run.enter(phase);
        run.report.provisioning = Outcome::Failed(err);

        let due = match self.config.cleanup {
            CleanupPolicy::Always => true,
            CleanupPolicy::AfterApplyAttempt => run.apply_attempted,
            CleanupPolicy::Never => false,
        };
        self.finish(run, spec, due, staged).await
    }

    async fn finish(
        &self,
        mut run: RunState,
        spec: &DeploymentSpec,
        teardown_due: bool,
        staged: Option<&StagedArtifacts>,
    ) -> DeploymentReport {
        if self.config.keep_alive {
            if teardown_due {
                info!(deployment = %spec.deployment_name, "keep-alive set, leaving deployment in place");
            }
        } else if teardown_due {
            match teardown(&self.cluster, &spec.deployment_name, &spec.namespace, staged).await {
                Ok(summary) => {
                    debug!(
                        deployment = %spec.deployment_name,
                        deleted = summary.deleted.len(),
                        already_absent = summary.already_absent.len(),
                        "teardown complete"
                    );
                    run.report.teardown = Outcome::Succeeded;
                    run.enter(Phase::TornDown);
                }
                Err(e) => {
                    error!(deployment = %spec.deployment_name, error = %e, "teardown failed");
                    run.report.teardown = Outcome::Failed(e);
                }
            }
        }

        run.report.finished_at = Utc::now();
        run.report
    }

    async fn apply_one(&self, doc: &ResourceDoc) -> Result<ResourceHandle, DeployError> {
        let handle = self
            .cluster
            .apply(doc)
            .await
            .map_err(|e| DeployError::ApplyFailed {
                resource: doc.target.to_string(),
                reason: e.to_string(),
            })?;
        debug!(resource = %handle, "applied");
        Ok(handle)
    }

    /// Apply storage and the serving resource; returns the serving handle.
    async fn apply_all(&self, manifests: &DeploymentManifests) -> Result<ResourceHandle, DeployError> {
        self.ensure_namespace(&manifests.namespace).await?;
        self.apply_one(&manifests.volume).await?;
        self.apply_one(&manifests.claim).await?;
        self.apply_one(&manifests.inference_service).await
    }

    /// Create the namespace only when the cluster says it is missing. Other
    /// lookup errors (e.g. no permission to read namespaces) are left to the
    /// applies that follow.
    async fn ensure_namespace(&self, doc: &ResourceDoc) -> Result<(), DeployError> {
        match self.cluster.get(&doc.target).await {
            Ok(_) => {
                debug!(namespace = %doc.target.name, "namespace exists");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!(namespace = %doc.target.name, "creating namespace");
                self.apply_one(doc).await.map(|_| ())
            }
            Err(e) => {
                warn!(namespace = %doc.target.name, error = %e, "namespace lookup failed, assuming it exists");
                Ok(())
            }
        }
    }

    /// Poll until ready, permanently failed, timed out, or cancelled.
    async fn await_ready(
        &self,
        spec: &DeploymentSpec,
        target: &ResourceRef,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        let deadline = Instant::now() + Duration::from_secs(spec.timeout_seconds);
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(DeployError::Cancelled);
            }
            attempt += 1;

            let read = tokio::select! {
                _ = cancel.cancelled() => return Err(DeployError::Cancelled),
                r = tokio::time::timeout_at(deadline, self.cluster.get(target)) => r,
            };
            let Ok(read) = read else {
                return Err(DeployError::TimedOut {
                    deployment: spec.deployment_name.clone(),
                    timeout_secs: spec.timeout_seconds,
                });
            };

            match read {
                Ok(status) => match status.readiness() {
                    ReadinessState::Ready => match status.endpoint {
                        Some(endpoint) => return Ok(endpoint),
                        None => debug!(resource = %target, attempt, "ready, waiting for endpoint"),
                    },
                    ReadinessState::Failed => {
                        let failure = status.failure.unwrap_or_default();
                        return Err(DeployError::Permanent(format!("{target}: {failure}")));
                    }
                    _ => debug!(
                        resource = %target,
                        attempt,
                        stale = status.stale,
                        message = status.message.as_deref().unwrap_or(""),
                        "not ready"
                    ),
                },
                Err(e) if e.is_transient() || e.is_not_found() => {
                    warn!(resource = %target, attempt, error = %e, "status read failed, will poll again");
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DeployError::TimedOut {
                    deployment: spec.deployment_name.clone(),
                    timeout_secs: spec.timeout_seconds,
                });
            }
            let wake = (now + self.config.poll_interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => return Err(DeployError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn infer(
        &self,
        endpoint: &str,
        model: &str,
        input: &Value,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DeployError::ValidationFailed("cancelled".to_string())),
            r = self.validator.validate(endpoint, model, input, self.config.validation_timeout) => r,
        }
    }

    /// One request per file in `dir`, each a single attempt.
    async fn run_inputs(
        &self,
        spec: &DeploymentSpec,
        endpoint: &str,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Vec<InputResult> {
        let files = match list_inputs(dir).await {
            Ok(files) => files,
            Err(e) => {
                return vec![InputResult {
                    path: dir.to_path_buf(),
                    outcome: Outcome::Failed(e),
                }]
            }
        };

        let mut results = Vec::with_capacity(files.len());
        for path in files {
            let outcome = match load_sample(&path).await {
                Ok(input) => match self.infer(endpoint, &spec.model_name, &input, cancel).await {
                    Ok(body) => {
                        info!(file = %path.display(), response = %body, "inference succeeded");
                        Outcome::Succeeded
                    }
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "inference failed");
                        Outcome::Failed(e)
                    }
                },
                Err(e) => Outcome::Failed(e),
            };
            results.push(InputResult { path, outcome });
        }
        results
    }
}
