use std::path::PathBuf;

use chrono::{DateTime, Utc};

use nimbus_common::{DeployError, FailureCategory, ReadinessState};

use crate::orchestrator::Phase;

pub const EXIT_OK: i32 = 0;
pub const EXIT_INVALID_INPUT: i32 = 2;
pub const EXIT_PROVISIONING: i32 = 3;
pub const EXIT_VALIDATION: i32 = 4;

/// Result of one stage of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(DeployError),
    /// The stage never ran (earlier failure, or keep-alive for teardown).
    Skipped,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn error(&self) -> Option<&DeployError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    fn describe(&self, ok: &str) -> String {
        match self {
            Self::Succeeded => ok.to_string(),
            Self::Failed(e) => format!("failed ({e})"),
            Self::Skipped => "skipped".to_string(),
        }
    }
}

/// Per-file result of the input-data batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputResult {
    pub path: PathBuf,
    pub outcome: Outcome,
}

/// Everything a caller needs to know about one run. Provisioning, validation
/// and teardown are recorded independently so that a later failure never
/// hides an earlier success.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentReport {
    pub deployment: String,
    pub model: String,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Phases entered, in order.
    pub phases: Vec<Phase>,
    pub readiness: ReadinessState,
    pub endpoint: Option<String>,
    pub provisioning: Outcome,
    pub validation: Outcome,
    pub inputs: Vec<InputResult>,
    pub teardown: Outcome,
}

impl DeploymentReport {
    pub fn new(deployment: &str, model: &str, namespace: &str) -> Self {
        let now = Utc::now();
        Self {
            deployment: deployment.to_string(),
            model: model.to_string(),
            namespace: namespace.to_string(),
            started_at: now,
            finished_at: now,
            phases: Vec::new(),
            readiness: ReadinessState::Pending,
            endpoint: None,
            provisioning: Outcome::Skipped,
            validation: Outcome::Skipped,
            inputs: Vec::new(),
            teardown: Outcome::Skipped,
        }
    }

    /// A run that was rejected before anything was staged or applied.
    pub fn rejected(deployment: &str, model: &str, namespace: &str, err: DeployError) -> Self {
        let mut report = Self::new(deployment, model, namespace);
        report.readiness = ReadinessState::Failed;
        report.provisioning = Outcome::Failed(err);
        report
    }

    pub fn final_phase(&self) -> Option<Phase> {
        self.phases.last().copied()
    }

    /// Process exit status. Teardown never affects it.
    pub fn exit_code(&self) -> i32 {
        if let Some(err) = self.provisioning.error() {
            return match err.category() {
                FailureCategory::InvalidInput => EXIT_INVALID_INPUT,
                FailureCategory::Provisioning => EXIT_PROVISIONING,
                FailureCategory::Validation => EXIT_VALIDATION,
            };
        }
        let inputs_failed = self.inputs.iter().any(|i| !i.outcome.is_success());
        if self.validation.error().is_some() || inputs_failed {
            return EXIT_VALIDATION;
        }
        EXIT_OK
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code() == EXIT_OK
    }

    /// One line for humans.
    pub fn summary_line(&self) -> String {
        let elapsed = (self.finished_at - self.started_at).num_seconds();
        let provisioning = match (&self.provisioning, &self.endpoint) {
            (Outcome::Succeeded, Some(url)) => format!("ready at {url}"),
            (other, _) => other.describe("ready"),
        };
        let mut line = format!(
            "{} deployment {}/{} ({}): provisioning {provisioning}, validation {}",
            if self.succeeded() { "✓" } else { "✗" },
            self.namespace,
            self.deployment,
            self.model,
            self.validation.describe("passed"),
        );
        if !self.inputs.is_empty() {
            let passed = self.inputs.iter().filter(|i| i.outcome.is_success()).count();
            line.push_str(&format!(", inputs {passed}/{} ok", self.inputs.len()));
        }
        line.push_str(&format!(
            ", teardown {} in {elapsed}s",
            self.teardown.describe("done")
        ));
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_report() -> DeploymentReport {
        let mut r = DeploymentReport::new("mpt-demo", "mpt_7b", "default");
        r.readiness = ReadinessState::Ready;
        r.endpoint = Some("http://mpt-demo.default.example.com".into());
        r.provisioning = Outcome::Succeeded;
        r.validation = Outcome::Succeeded;
        r.teardown = Outcome::Succeeded;
        r
    }

    #[test]
    fn test_exit_codes() {
        let r = ready_report();
        assert_eq!(r.exit_code(), EXIT_OK);

        let r = DeploymentReport::rejected(
            "llama",
            "llama2_7b",
            "default",
            DeployError::missing_credential("token"),
        );
        assert_eq!(r.exit_code(), EXIT_INVALID_INPUT);

        let mut r = ready_report();
        r.provisioning = Outcome::Failed(DeployError::TimedOut {
            deployment: "mpt-demo".into(),
            timeout_secs: 5,
        });
        r.validation = Outcome::Skipped;
        assert_eq!(r.exit_code(), EXIT_PROVISIONING);

        let mut r = ready_report();
        r.validation = Outcome::Failed(DeployError::ValidationFailed("503".into()));
        assert_eq!(r.exit_code(), EXIT_VALIDATION);
        assert_eq!(r.provisioning, Outcome::Succeeded);
    }

    #[test]
    fn test_teardown_failure_does_not_change_exit() {
        let mut r = ready_report();
        r.teardown = Outcome::Failed(DeployError::Permanent("forbidden".into()));
        assert_eq!(r.exit_code(), EXIT_OK);
        assert!(r.summary_line().contains("teardown failed (permanent cluster error: forbidden)"));
    }

    #[test]
    fn test_failed_input_is_validation_failure() {
        let mut r = ready_report();
        r.inputs.push(InputResult {
            path: "a.json".into(),
            outcome: Outcome::Succeeded,
        });
        r.inputs.push(InputResult {
            path: "b.json".into(),
            outcome: Outcome::Failed(DeployError::ValidationFailed("500".into())),
        });
        assert_eq!(r.exit_code(), EXIT_VALIDATION);
        assert!(r.summary_line().contains("inputs 1/2 ok"));
    }

    #[test]
    fn test_summary_line() {
        let line = ready_report().summary_line();
        assert!(line.starts_with("✓ deployment default/mpt-demo (mpt_7b)"));
        assert!(line.contains("ready at http://mpt-demo.default.example.com"));
        assert!(line.contains("validation passed"));
        assert!(line.contains("teardown done"));
    }
}
