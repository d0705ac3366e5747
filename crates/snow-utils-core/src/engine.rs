//! Provisioning Engine: runs a family's steps against a [`Provider`] and
//! records each one in the store as soon as it succeeds.
//!
//! Create walks the descriptor's steps forward, delete walks them backward.
//! The manifest is updated after every provider call, so a crash at any
//! point leaves an accurate record that `resume` or `delete` can pick up.

use crate::config::VerifyConfig;
use crate::descriptor::{self, ResourceDescriptor};
use crate::error::{Result, SnowUtilsError};
use crate::manifest::{check_field, Field, ResourceInstance};
use crate::provider::{self, PlannedAction, Provider, Sleeper, StepRequest, VerifyResult};
use crate::store::ManifestStore;
use crate::types::{InstanceStatus, StepAction, StepStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Compensate DONE steps when a create fails. Off keeps partial progress for resume.
    pub rollback_on_failure: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            rollback_on_failure: true,
        }
    }
}

/// What one engine operation did.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub instance: ResourceInstance,
    pub executed: Vec<String>,
    pub compensated: Vec<String>,
    /// Secret identifiers (tokens). Never persisted, handed to the caller once.
    #[serde(skip)]
    pub secrets: BTreeMap<String, String>,
}

impl Outcome {
    fn unchanged(instance: ResourceInstance) -> Self {
        Self {
            instance,
            executed: Vec::new(),
            compensated: Vec::new(),
            secrets: BTreeMap::new(),
        }
    }
}

pub struct Engine<'a> {
    store: &'a ManifestStore,
    provider: &'a mut dyn Provider,
}

impl<'a> Engine<'a> {
    pub fn new(store: &'a ManifestStore, provider: &'a mut dyn Provider) -> Self {
        Self { store, provider }
    }

    pub fn store(&self) -> &ManifestStore {
        self.store
    }

    // -----------------------------------------------------------------------
    // Create / resume
    // -----------------------------------------------------------------------

    /// Record a new instance and execute all of its steps in order.
    pub fn create(
        &mut self,
        desc: &ResourceDescriptor,
        fields: Vec<Field>,
        admin_role: Option<String>,
        opts: RunOptions,
    ) -> Result<Outcome> {
        let instance = desc.new_instance(fields, admin_role)?;
        let instance = self.store.append_instance(instance)?;
        info!(instance = %instance.id(), steps = instance.steps.len(), "creating");
        self.run_pending(desc, instance, StepAction::Create, opts)
    }

    /// Continue an IN_PROGRESS instance from its first PENDING step.
    pub fn resume(&mut self, skill_id: &str, instance_key: &str, opts: RunOptions) -> Result<Outcome> {
        let desc = descriptor::find(skill_id)?;
        let instance = self.store.load()?.require(skill_id, instance_key)?.clone();
        if instance.status != InstanceStatus::InProgress {
            return Err(SnowUtilsError::InvalidTransition {
                instance: instance.id(),
                from: instance.status.to_string(),
                to: InstanceStatus::Complete.to_string(),
                reason: "only IN_PROGRESS instances can be resumed".to_string(),
            });
        }
        info!(
            instance = %instance.id(),
            from_step = instance.first_pending().map(|s| s.name.as_str()).unwrap_or(""),
            "resuming"
        );
        self.run_pending(desc, instance, StepAction::Create, opts)
    }

    fn run_pending(
        &mut self,
        desc: &ResourceDescriptor,
        mut instance: ResourceInstance,
        action: StepAction,
        opts: RunOptions,
    ) -> Result<Outcome> {
        let pending: Vec<String> = instance
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .map(|s| s.name.clone())
            .collect();
        let mut executed = Vec::new();
        let mut secrets: BTreeMap<String, String> = BTreeMap::new();

        for step in pending {
            let mut request = StepRequest::for_instance(&instance, &step, action);
            request
                .fields
                .extend(secrets.iter().map(|(k, v)| (k.clone(), v.clone())));
            info!(instance = %instance.id(), step = %step, action = %action, "executing step");

            let result = match self.provider.execute_step(&request) {
                Ok(result) => result,
                Err(cause) => {
                    warn!(instance = %instance.id(), step = %step, error = %cause, "step failed");
                    if action == StepAction::Create && opts.rollback_on_failure {
                        self.rollback(&instance)?;
                    }
                    return Err(SnowUtilsError::ProvisioningFailed {
                        instance: instance.id(),
                        step,
                        cause: cause.to_string(),
                    });
                }
            };

            let mut public = Vec::new();
            let mut rejected: Option<String> = None;
            for (name, value) in result.identifiers {
                let value = value.trim().to_string();
                if desc.is_secret_field(&name) {
                    secrets.insert(name, value);
                    continue;
                }
                match check_field(&name, &value) {
                    Ok(()) => public.push(Field::new(name, value)),
                    Err(e) => {
                        warn!(instance = %instance.id(), step = %step, error = %e, "provider returned an identifier the manifest cannot hold");
                        rejected.get_or_insert_with(|| e.to_string());
                    }
                }
            }
            if !public.is_empty() {
                self.store
                    .set_fields(&instance.skill_id, &instance.instance_key, &public)?;
            }
            // The provider-side resource exists either way, so the step is recorded DONE.
            instance = self.store.update_step(
                &instance.skill_id,
                &instance.instance_key,
                &step,
                StepStatus::Done,
            )?;
            executed.push(step.clone());

            if let Some(cause) = rejected {
                if action == StepAction::Create && opts.rollback_on_failure {
                    self.rollback(&instance)?;
                }
                return Err(SnowUtilsError::ProvisioningFailed {
                    instance: instance.id(),
                    step,
                    cause,
                });
            }
        }

        Ok(Outcome {
            instance,
            executed,
            compensated: Vec::new(),
            secrets,
        })
    }

    /// Best-effort reverse compensation of every DONE step after a failed create.
    fn rollback(&mut self, instance: &ResourceInstance) -> Result<Vec<String>> {
        let desc = descriptor::find(&instance.skill_id)?;
        let mut compensated = Vec::new();
        for step in compensation_order(desc, instance) {
            let request = StepRequest::for_instance(instance, &step, StepAction::Compensate);
            match self.provider.compensate_step(&request) {
                Ok(()) => {
                    self.store.update_step(
                        &instance.skill_id,
                        &instance.instance_key,
                        &step,
                        StepStatus::Pending,
                    )?;
                    info!(instance = %instance.id(), step = %step, "rolled back");
                    compensated.push(step);
                }
                Err(e) => {
                    warn!(instance = %instance.id(), step = %step, error = %e, "rollback of step failed, leaving it DONE");
                }
            }
        }
        Ok(compensated)
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Compensate DONE steps in reverse order, then mark the instance REMOVED.
    ///
    /// Protected steps are left in place and stay DONE. A family that is
    /// entirely shared infrastructure is refused before anything changes.
    pub fn delete(&mut self, skill_id: &str, instance_key: &str) -> Result<Outcome> {
        let desc = descriptor::find(skill_id)?;
        let instance = self.store.load()?.require(skill_id, instance_key)?.clone();
        if desc.shared_infrastructure {
            return Err(SnowUtilsError::ProtectedResource(instance.id()));
        }
        if instance.status == InstanceStatus::Removed {
            info!(instance = %instance.id(), "already REMOVED");
            return Ok(Outcome::unchanged(instance));
        }

        let mut compensated = Vec::new();
        for step in compensation_order(desc, &instance) {
            let request = StepRequest::for_instance(&instance, &step, StepAction::Compensate);
            info!(instance = %instance.id(), step = %step, "compensating");
            self.provider.compensate_step(&request).map_err(|e| {
                SnowUtilsError::Provider(format!(
                    "removing step '{step}' of {} failed: {e}; fix the cause and run delete again",
                    instance.id()
                ))
            })?;
            self.store
                .update_step(skill_id, instance_key, &step, StepStatus::Pending)?;
            compensated.push(step);
        }

        let instance = self
            .store
            .set_status(skill_id, instance_key, InstanceStatus::Removed)?;
        info!(instance = %instance.id(), compensated = compensated.len(), "removed");
        Ok(Outcome {
            instance,
            executed: Vec::new(),
            compensated,
            secrets: BTreeMap::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Rotate / verify
    // -----------------------------------------------------------------------

    /// Re-execute only the renewable steps of a COMPLETE instance.
    ///
    /// A failure leaves the renewable steps PENDING for resume; nothing is compensated.
    pub fn rotate(&mut self, skill_id: &str, instance_key: &str) -> Result<Outcome> {
        let desc = descriptor::find(skill_id)?;
        let renewable: Vec<&str> = desc.renewable_steps().map(|s| s.name).collect();
        let instance = self
            .store
            .begin_rotation(skill_id, instance_key, &renewable)?;
        info!(instance = %instance.id(), steps = ?renewable, "rotating");
        self.run_pending(
            desc,
            instance,
            StepAction::Rotate,
            RunOptions {
                rollback_on_failure: false,
            },
        )
    }

    pub fn verify(
        &mut self,
        skill_id: &str,
        instance_key: &str,
        policy: &VerifyConfig,
        sleeper: &dyn Sleeper,
    ) -> Result<VerifyResult> {
        let instance = self.store.load()?.require(skill_id, instance_key)?.clone();
        if instance.status != InstanceStatus::Complete {
            warn!(instance = %instance.id(), status = %instance.status, "verifying an instance that is not COMPLETE");
        }
        provider::verify_with_backoff(self.provider, &instance, policy, sleeper)
    }
}

/// DONE, non-protected steps in reverse descriptor order.
fn compensation_order(desc: &ResourceDescriptor, instance: &ResourceInstance) -> Vec<String> {
    instance
        .steps
        .iter()
        .rev()
        .filter(|s| s.status == StepStatus::Done)
        .filter(|s| !desc.step(&s.name).is_some_and(|spec| spec.protected))
        .map(|s| s.name.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Dry-run plans
// ---------------------------------------------------------------------------

/// Provider calls a create or resume of `instance` would make.
pub fn plan_create(instance: &ResourceInstance) -> Vec<PlannedAction> {
    instance
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .map(|s| PlannedAction::from(&StepRequest::for_instance(instance, &s.name, StepAction::Create)))
        .collect()
}

/// Provider calls a delete of `instance` would make.
pub fn plan_delete(instance: &ResourceInstance) -> Result<Vec<PlannedAction>> {
    let desc = descriptor::find(&instance.skill_id)?;
    if desc.shared_infrastructure {
        return Err(SnowUtilsError::ProtectedResource(instance.id()));
    }
    if instance.status == InstanceStatus::Removed {
        return Ok(Vec::new());
    }
    Ok(compensation_order(desc, instance)
        .iter()
        .map(|s| PlannedAction::from(&StepRequest::for_instance(instance, s, StepAction::Compensate)))
        .collect())
}

/// Provider calls a rotate of `instance` would make.
pub fn plan_rotate(instance: &ResourceInstance) -> Result<Vec<PlannedAction>> {
    let desc = descriptor::find(&instance.skill_id)?;
    if instance.status != InstanceStatus::Complete {
        return Err(SnowUtilsError::NotComplete {
            instance: instance.id(),
            status: instance.status.to_string(),
        });
    }
    let plan: Vec<PlannedAction> = desc
        .renewable_steps()
        .map(|s| PlannedAction::from(&StepRequest::for_instance(instance, s.name, StepAction::Rotate)))
        .collect();
    if plan.is_empty() {
        return Err(SnowUtilsError::InvalidTransition {
            instance: instance.id(),
            from: instance.status.to_string(),
            to: InstanceStatus::InProgress.to_string(),
            reason: format!("{} has no renewable steps", instance.skill_id),
        });
    }
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NamingContext;
    use crate::provider::testing::{RecordingSleeper, ScriptedProvider};
    use tempfile::TempDir;

    const PAT_KEY: &str = "ALICE_DEMO_RUNNER";
    const VOL_KEY: &str = "ALICE_ICEBERG_EXTERNAL_VOLUME";

    fn ctx() -> NamingContext {
        NamingContext {
            prefix: Some("ALICE".to_string()),
            project: "demo".to_string(),
        }
    }

    fn fields(skill: &str, pairs: &[(&str, &str)]) -> Vec<Field> {
        let input: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        descriptor::find(skill)
            .unwrap()
            .resolve_fields(&input, &ctx())
            .unwrap()
    }

    fn pat_fields() -> Vec<Field> {
        fields("pat", &[("allowed_cidrs", "10.0.0.1/32")])
    }

    fn volume_fields() -> Vec<Field> {
        fields("volumes", &[("bucket", "iceberg")])
    }

    fn create(store: &ManifestStore, provider: &mut ScriptedProvider, skill: &str, f: Vec<Field>) -> Result<Outcome> {
        let desc = descriptor::find(skill).unwrap();
        Engine::new(store, provider).create(desc, f, None, RunOptions::default())
    }

    #[test]
    fn create_runs_every_step_in_order_and_completes() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new();
        let out = create(&store, &mut provider, "pat", pat_fields()).unwrap();

        assert_eq!(out.instance.status, InstanceStatus::Complete);
        assert_eq!(
            provider.steps(StepAction::Create),
            vec![
                "service_user",
                "network_rule",
                "network_policy",
                "policy_assignment",
                "auth_policy",
                "pat"
            ]
        );
        let persisted = store.load().unwrap();
        assert!(persisted.find("pat", PAT_KEY).unwrap().all_done());
    }

    #[test]
    fn identifiers_are_merged_but_secrets_are_returned() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new()
            .with_identifier("service_user", "user_id", "U-42")
            .with_identifier("pat", "pat_token", "tok-secret");
        let out = create(&store, &mut provider, "pat", pat_fields()).unwrap();

        assert_eq!(out.secrets.get("pat_token").map(String::as_str), Some("tok-secret"));
        let inst = store.load().unwrap().find("pat", PAT_KEY).unwrap().clone();
        assert_eq!(inst.field("user_id"), Some("U-42"));
        assert_eq!(inst.field("pat_token"), None);
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(!text.contains("tok-secret"));
    }

    #[test]
    fn failed_step_rolls_back_done_steps_in_reverse() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::failing(VOL_KEY, "external_volume");
        let err = create(&store, &mut provider, "volumes", volume_fields()).unwrap_err();

        assert!(matches!(
            &err,
            SnowUtilsError::ProvisioningFailed { step, .. } if step == "external_volume"
        ));
        assert_eq!(
            provider.steps(StepAction::Compensate),
            vec!["iam_role", "iam_policy", "s3_bucket"]
        );
        let inst = store.load().unwrap().find("volumes", VOL_KEY).unwrap().clone();
        assert_eq!(inst.status, InstanceStatus::InProgress);
        assert_eq!(inst.done_count(), 0);
    }

    #[test]
    fn keep_partial_skips_rollback() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::failing(VOL_KEY, "external_volume");
        let desc = descriptor::find("volumes").unwrap();
        let err = Engine::new(&store, &mut provider)
            .create(
                desc,
                volume_fields(),
                None,
                RunOptions {
                    rollback_on_failure: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, SnowUtilsError::ProvisioningFailed { .. }));
        assert!(provider.steps(StepAction::Compensate).is_empty());
        let inst = store.load().unwrap().find("volumes", VOL_KEY).unwrap().clone();
        assert_eq!(inst.done_count(), 3);
        assert_eq!(inst.first_pending().unwrap().name, "external_volume");
    }

    #[test]
    fn resume_runs_only_pending_steps() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        // Leave [DONE, DONE, DONE, PENDING, PENDING].
        let mut first = ScriptedProvider::failing(VOL_KEY, "external_volume");
        let desc = descriptor::find("volumes").unwrap();
        Engine::new(&store, &mut first)
            .create(
                desc,
                volume_fields(),
                None,
                RunOptions {
                    rollback_on_failure: false,
                },
            )
            .unwrap_err();

        let mut second = ScriptedProvider::new();
        let out = Engine::new(&store, &mut second)
            .resume("volumes", VOL_KEY, RunOptions::default())
            .unwrap();
        assert_eq!(
            second.steps(StepAction::Create),
            vec!["external_volume", "trust_policy"]
        );
        assert_eq!(out.instance.status, InstanceStatus::Complete);
    }

    #[test]
    fn resume_of_complete_instance_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new();
        create(&store, &mut provider, "networks", fields("networks", &[("values", "10.0.0.0/8")])).unwrap();
        let err = Engine::new(&store, &mut provider)
            .resume("networks", "ALICE_DEMO_NETWORK_RULE", RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, SnowUtilsError::InvalidTransition { .. }));
    }

    #[test]
    fn delete_compensates_in_strict_reverse_order() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new();
        create(&store, &mut provider, "volumes", volume_fields()).unwrap();

        let mut provider = ScriptedProvider::new();
        let out = Engine::new(&store, &mut provider)
            .delete("volumes", VOL_KEY)
            .unwrap();
        assert_eq!(
            provider.steps(StepAction::Compensate),
            vec!["trust_policy", "external_volume", "iam_role", "iam_policy", "s3_bucket"]
        );
        assert_eq!(out.instance.status, InstanceStatus::Removed);
        assert!(out.instance.removed_at.is_some());
        assert!(out.instance.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(store.exists());
    }

    #[test]
    fn delete_of_removed_instance_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new();
        create(&store, &mut provider, "volumes", volume_fields()).unwrap();
        Engine::new(&store, &mut provider).delete("volumes", VOL_KEY).unwrap();

        let mut again = ScriptedProvider::new();
        Engine::new(&store, &mut again).delete("volumes", VOL_KEY).unwrap();
        assert_eq!(again.total_calls(), 0);
    }

    #[test]
    fn protected_family_cannot_be_deleted() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new();
        create(&store, &mut provider, "setup", fields("setup", &[])).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let mut provider = ScriptedProvider::new();
        let err = Engine::new(&store, &mut provider)
            .delete("setup", "ALICE_SNOW_UTILS")
            .unwrap_err();
        assert!(matches!(err, SnowUtilsError::ProtectedResource(_)));
        assert_eq!(provider.total_calls(), 0);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn rotate_reruns_only_renewable_steps() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new();
        create(&store, &mut provider, "pat", pat_fields()).unwrap();

        let mut provider = ScriptedProvider::new().with_identifier("pat", "pat_token", "new-token");
        let out = Engine::new(&store, &mut provider).rotate("pat", PAT_KEY).unwrap();
        assert_eq!(provider.steps(StepAction::Rotate), vec!["pat"]);
        assert!(provider.steps(StepAction::Create).is_empty());
        assert_eq!(out.instance.status, InstanceStatus::Complete);
        assert_eq!(out.secrets.get("pat_token").map(String::as_str), Some("new-token"));
    }

    #[test]
    fn rotate_requires_complete() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::failing(PAT_KEY, "auth_policy");
        let desc = descriptor::find("pat").unwrap();
        Engine::new(&store, &mut provider)
            .create(desc, pat_fields(), None, RunOptions { rollback_on_failure: false })
            .unwrap_err();

        let mut provider = ScriptedProvider::new();
        let err = Engine::new(&store, &mut provider).rotate("pat", PAT_KEY).unwrap_err();
        assert!(matches!(err, SnowUtilsError::NotComplete { .. }));
        assert_eq!(provider.total_calls(), 0);
    }

    #[test]
    fn failed_rotation_is_left_for_resume() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new();
        create(&store, &mut provider, "pat", pat_fields()).unwrap();

        let mut provider = ScriptedProvider::failing(PAT_KEY, "pat");
        Engine::new(&store, &mut provider).rotate("pat", PAT_KEY).unwrap_err();
        assert!(provider.steps(StepAction::Compensate).is_empty());
        let inst = store.load().unwrap().find("pat", PAT_KEY).unwrap().clone();
        assert_eq!(inst.status, InstanceStatus::InProgress);
        assert_eq!(inst.first_pending().unwrap().name, "pat");
    }

    #[test]
    fn verify_uses_backoff_policy() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new();
        create(&store, &mut provider, "pat", pat_fields()).unwrap();

        provider.verify_script = [false, true].into_iter().collect();
        let sleeper = RecordingSleeper::default();
        let result = Engine::new(&store, &mut provider)
            .verify("pat", PAT_KEY, &VerifyConfig::default(), &sleeper)
            .unwrap();
        assert!(result.ok);
        assert_eq!(sleeper.delays.borrow().len(), 1);
    }

    #[test]
    fn plans_mirror_engine_order() {
        let desc = descriptor::find("volumes").unwrap();
        let mut inst = desc.new_instance(volume_fields(), None).unwrap();
        let create_plan: Vec<String> = plan_create(&inst).into_iter().map(|p| p.step_name).collect();
        assert_eq!(create_plan.first().map(String::as_str), Some("s3_bucket"));

        for s in inst.steps.iter_mut() {
            s.status = StepStatus::Done;
        }
        inst.status = InstanceStatus::Complete;
        let delete_plan: Vec<String> = plan_delete(&inst).unwrap().into_iter().map(|p| p.step_name).collect();
        assert_eq!(delete_plan.first().map(String::as_str), Some("trust_policy"));
        assert_eq!(delete_plan.len(), 5);
    }

    #[test]
    fn rotate_plan_fails_like_rotate_for_families_without_renewable_steps() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new();
        let out = create(&store, &mut provider, "volumes", volume_fields()).unwrap();

        let planned = plan_rotate(&out.instance).unwrap_err();
        let mut provider = ScriptedProvider::new();
        let ran = Engine::new(&store, &mut provider).rotate("volumes", VOL_KEY).unwrap_err();
        assert!(matches!(planned, SnowUtilsError::InvalidTransition { .. }));
        assert_eq!(planned.to_string(), ran.to_string());
        assert_eq!(provider.total_calls(), 0);

        let desc = descriptor::find("pat").unwrap();
        let mut pat = desc.new_instance(pat_fields(), None).unwrap();
        for s in pat.steps.iter_mut() {
            s.status = StepStatus::Done;
        }
        pat.status = InstanceStatus::Complete;
        let steps: Vec<String> = plan_rotate(&pat).unwrap().into_iter().map(|p| p.step_name).collect();
        assert_eq!(steps, vec!["pat"]);
    }

    #[test]
    fn unstorable_identifier_fails_the_step_and_keeps_the_manifest_readable() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut provider = ScriptedProvider::new().with_identifier(
            "network_rule",
            "rule_id",
            "line1\n<!-- END -- networks:X -->",
        );
        let err = create(&store, &mut provider, "networks", fields("networks", &[("values", "10.0.0.0/8")]))
            .unwrap_err();

        assert!(matches!(
            &err,
            SnowUtilsError::ProvisioningFailed { step, .. } if step == "network_rule"
        ));
        assert_eq!(provider.steps(StepAction::Compensate), vec!["network_rule"]);
        let inst = store
            .load()
            .unwrap()
            .find("networks", "ALICE_DEMO_NETWORK_RULE")
            .unwrap()
            .clone();
        assert_eq!(inst.status, InstanceStatus::InProgress);
        assert_eq!(inst.field("rule_id"), None);
        assert_eq!(inst.done_count(), 0);
    }
}
