use serde_json::Value;

use crate::types::{ResourceKind, ResourceStatus};

/// Model transition states that KServe will not recover from without a
/// spec change.
const PERMANENT_TRANSITIONS: [&str; 2] = ["BlockedByFailedLoad", "InvalidSpec"];

/// Derive a typed status from a full object as returned by the API server.
pub fn status_from_object(kind: ResourceKind, obj: &Value) -> ResourceStatus {
    let status = obj.get("status").unwrap_or(&Value::Null);

    let generation = obj
        .pointer("/metadata/generation")
        .and_then(Value::as_u64);
    let observed = status.get("observedGeneration").and_then(Value::as_u64);
    let stale = matches!((generation, observed), (Some(g), Some(o)) if o < g);

    let mut typed = match kind {
        ResourceKind::Namespace => {
            let phase = status.get("phase").and_then(Value::as_str);
            ResourceStatus {
                ready: phase == Some("Active"),
                message: phase.map(str::to_string),
                ..Default::default()
            }
        }
        ResourceKind::PersistentVolume => phase_status(status, &["Available", "Bound"], &["Failed"]),
        ResourceKind::PersistentVolumeClaim => phase_status(status, &["Bound"], &["Lost"]),
        ResourceKind::InferenceService => inference_service_status(status, stale),
    };
    typed.annotations = obj
        .pointer("/metadata/annotations")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();
    typed
}

fn phase_status(status: &Value, ready: &[&str], failed: &[&str]) -> ResourceStatus {
    let phase = status.get("phase").and_then(Value::as_str);
    let failure = phase
        .filter(|p| failed.contains(p))
        .map(|p| {
            status
                .get("message")
                .and_then(Value::as_str)
                .map(|m| format!("{p}: {m}"))
                .unwrap_or_else(|| p.to_string())
        });
    ResourceStatus {
        ready: phase.is_some_and(|p| ready.contains(&p)),
        failure,
        message: phase.map(str::to_string),
        ..Default::default()
    }
}

fn inference_service_status(status: &Value, stale: bool) -> ResourceStatus {
    let ready_condition = status
        .get("conditions")
        .and_then(Value::as_array)
        .and_then(|conds| {
            conds
                .iter()
                .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"))
        });

    let ready = ready_condition
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str)
        == Some("True");

    let message = ready_condition
        .and_then(|c| c.get("message").or_else(|| c.get("reason")))
        .and_then(Value::as_str)
        .map(str::to_string);

    let transition = status
        .pointer("/modelStatus/transitionStatus")
        .and_then(Value::as_str);
    let failure = transition
        .filter(|t| PERMANENT_TRANSITIONS.contains(t))
        .map(|t| {
            status
                .pointer("/modelStatus/lastFailureInfo/message")
                .and_then(Value::as_str)
                .map(|m| format!("{t}: {m}"))
                .unwrap_or_else(|| t.to_string())
        });

    let endpoint = status
        .get("url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_string);

    ResourceStatus {
        ready,
        failure,
        endpoint,
        message,
        stale,
        ..Default::default()
    }
}
