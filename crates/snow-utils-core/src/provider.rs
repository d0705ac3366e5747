//! The provider collaborator: whatever actually talks to Snowflake and AWS.
//!
//! The core never performs provider-side work itself. It hands one step at
//! a time to a [`Provider`] and records the outcome in the manifest.

use crate::config::VerifyConfig;
use crate::error::{Result, SnowUtilsError};
use crate::manifest::ResourceInstance;
use crate::types::StepAction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// One step handed to the provider, with everything known about the instance so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub skill_id: String,
    pub instance_key: String,
    pub step_name: String,
    pub kind: String,
    pub action: StepAction,
    pub fields: BTreeMap<String, String>,
}

impl StepRequest {
    pub fn for_instance(instance: &ResourceInstance, step_name: &str, action: StepAction) -> Self {
        Self {
            skill_id: instance.skill_id.clone(),
            instance_key: instance.instance_key.clone(),
            step_name: step_name.to_string(),
            kind: instance
                .step(step_name)
                .map(|s| s.kind.clone())
                .unwrap_or_default(),
            action,
            fields: instance
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.value.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Values later steps need, e.g. `user_arn` or `pat_token`.
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,
    /// Provider output, kept for logs only.
    #[serde(default)]
    pub raw_output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub ok: bool,
    #[serde(default)]
    pub detail: String,
}

pub trait Provider {
    fn execute_step(&mut self, request: &StepRequest) -> Result<StepResult>;

    /// Undo one step. Must succeed when the step is already undone.
    fn compensate_step(&mut self, request: &StepRequest) -> Result<()>;

    /// Read-only check. Eventual consistency is reported as `ok: false`.
    fn verify(&mut self, instance: &ResourceInstance) -> Result<VerifyResult>;
}

// ---------------------------------------------------------------------------
// Verification with backoff
// ---------------------------------------------------------------------------

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Call `verify` until it reports ok or the attempts run out.
pub fn verify_with_backoff(
    provider: &mut dyn Provider,
    instance: &ResourceInstance,
    policy: &VerifyConfig,
    sleeper: &dyn Sleeper,
) -> Result<VerifyResult> {
    let attempts = policy.max_attempts.max(1);
    let mut detail = String::new();
    for attempt in 1..=attempts {
        let result = provider.verify(instance)?;
        if result.ok {
            debug!(instance = %instance.id(), attempt, "verified");
            return Ok(result);
        }
        detail = result.detail;
        if attempt < attempts {
            let delay = policy.delay_after(attempt);
            warn!(
                instance = %instance.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                detail = %detail,
                "verification not yet passing, retrying"
            );
            sleeper.sleep(delay);
        }
    }
    Err(SnowUtilsError::VerificationFailed {
        instance: instance.id(),
        attempts,
        detail,
    })
}

// ---------------------------------------------------------------------------
// Dry-run plan
// ---------------------------------------------------------------------------

/// A provider call that would be made, rendered instead of executed under `--dry-run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action: StepAction,
    pub skill_id: String,
    pub instance_key: String,
    pub step_name: String,
    pub kind: String,
}

impl From<&StepRequest> for PlannedAction {
    fn from(req: &StepRequest) -> Self {
        Self {
            action: req.action,
            skill_id: req.skill_id.clone(),
            instance_key: req.instance_key.clone(),
            step_name: req.step_name.clone(),
            kind: req.kind.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::testing::{RecordingSleeper, ScriptedProvider};
    use super::*;
    use crate::manifest::{Field, Step};
    use crate::types::{InstanceStatus, StepStatus};
    use chrono::Utc;

    fn instance() -> ResourceInstance {
        ResourceInstance {
            skill_id: "networks".to_string(),
            instance_key: "ALICE_RULE".to_string(),
            fields: vec![Field::new("rule_name", "ALICE_RULE")],
            steps: vec![Step {
                name: "network_rule".to_string(),
                kind: "NETWORK RULE".to_string(),
                status: StepStatus::Done,
            }],
            status: InstanceStatus::Complete,
            created_at: Utc::now(),
            removed_at: None,
            admin_role: None,
        }
    }

    #[test]
    fn request_carries_fields_and_kind() {
        let req = StepRequest::for_instance(&instance(), "network_rule", StepAction::Create);
        assert_eq!(req.kind, "NETWORK RULE");
        assert_eq!(req.fields.get("rule_name").map(String::as_str), Some("ALICE_RULE"));
    }

    #[test]
    fn verify_retries_with_growing_delays() {
        let mut provider = ScriptedProvider::new();
        provider.verify_script = [false, false, true].into_iter().collect();
        let sleeper = RecordingSleeper::default();
        let result =
            verify_with_backoff(&mut provider, &instance(), &VerifyConfig::default(), &sleeper)
                .unwrap();
        assert!(result.ok);
        assert_eq!(provider.verify_calls, 3);
        assert_eq!(
            *sleeper.delays.borrow(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn verify_gives_up_after_max_attempts() {
        let mut provider = ScriptedProvider::new();
        provider.verify_script = std::iter::repeat(false).take(10).collect();
        let policy = VerifyConfig {
            max_attempts: 3,
            ..VerifyConfig::default()
        };
        let sleeper = RecordingSleeper::default();
        let err = verify_with_backoff(&mut provider, &instance(), &policy, &sleeper).unwrap_err();
        assert!(matches!(
            err,
            SnowUtilsError::VerificationFailed { attempts: 3, .. }
        ));
        assert_eq!(sleeper.delays.borrow().len(), 2);
    }
}
