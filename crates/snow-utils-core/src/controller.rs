//! Replay/Resume Controller.
//!
//! Decides what a request means for an instance given its recorded status
//! and drives the engine accordingly:
//!
//! | status        | action                                       |
//! |---------------|----------------------------------------------|
//! | absent/REMOVED| fresh create                                 |
//! | IN_PROGRESS   | resume from the first PENDING step           |
//! | COMPLETE      | collision, the operator picks a disposition  |
//!
//! Every decision point goes through an [`Operator`]; nothing is overwritten
//! without an explicit answer.

use crate::descriptor::{self, ResourceDescriptor};
use crate::engine::{self, Engine, Outcome, RunOptions};
use crate::error::{Result, SnowUtilsError};
use crate::manifest::{Field, ResourceInstance};
use crate::paths;
use crate::portable::{AdaptChoice, AdaptRow};
use crate::provider::{PlannedAction, Provider};
use crate::store::ManifestStore;
use crate::types::{CollisionDisposition, InstanceStatus};
use serde::Serialize;
use tracing::{info, warn};

/// Confirmation checkpoints. Implemented by the CLI (prompts or flags) and by tests.
pub trait Operator {
    /// Pre-creation preview. `false` cancels before any provider call.
    fn confirm_preview(&mut self, instance: &ResourceInstance, plan: &[PlannedAction]) -> Result<bool>;

    /// Disposition for a request that targets a COMPLETE instance.
    fn choose_collision(&mut self, existing: &ResourceInstance) -> Result<CollisionDisposition>;

    /// One consolidated answer for every adapted field.
    fn confirm_adapt(&mut self, rows: &[AdaptRow]) -> Result<AdaptChoice>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    FreshCreate,
    Resume,
    Collision,
}

pub fn classify(instance: Option<&ResourceInstance>) -> Classification {
    match instance.map(|i| i.status) {
        None | Some(InstanceStatus::Removed) => Classification::FreshCreate,
        Some(InstanceStatus::InProgress) => Classification::Resume,
        Some(InstanceStatus::Complete) => Classification::Collision,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplayAction {
    Created,
    Resumed,
    UsedExisting,
    Replaced,
    Renamed { new_key: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub instance: String,
    #[serde(flatten)]
    pub action: ReplayAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub completed: Vec<String>,
    /// Set when the operator declined a preview partway through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<String>,
    #[serde(skip)]
    pub outcomes: Vec<Outcome>,
}

pub struct Controller<'a> {
    engine: Engine<'a>,
    operator: &'a mut dyn Operator,
    opts: RunOptions,
}

impl<'a> Controller<'a> {
    pub fn new(
        store: &'a ManifestStore,
        provider: &'a mut dyn Provider,
        operator: &'a mut dyn Operator,
        opts: RunOptions,
    ) -> Self {
        Self {
            engine: Engine::new(store, provider),
            operator,
            opts,
        }
    }

    /// `create` with freshly resolved fields. Existing records are classified first.
    pub fn provision(
        &mut self,
        desc: &ResourceDescriptor,
        fields: Vec<Field>,
        admin_role: Option<String>,
    ) -> Result<ReplayReport> {
        let key = key_of(desc, &fields)?;
        let existing = self.engine.store().load()?.find(desc.skill_id, &key).cloned();
        self.drive(desc, fields, admin_role, existing)
    }

    /// Replay one recorded instance from its manifest fields.
    pub fn replay(&mut self, skill_id: &str, instance_key: &str) -> Result<ReplayReport> {
        let desc = descriptor::find(skill_id)?;
        let existing = self
            .engine
            .store()
            .load()?
            .require(skill_id, instance_key)?
            .clone();
        let fields = existing.fields.clone();
        let admin_role = existing.admin_role.clone();
        self.drive(desc, fields, admin_role, Some(existing))
    }

    pub fn resume(&mut self, skill_id: &str, instance_key: &str) -> Result<ReplayReport> {
        let existing = self
            .engine
            .store()
            .load()?
            .require(skill_id, instance_key)?
            .clone();
        self.resume_instance(existing)
    }

    fn drive(
        &mut self,
        desc: &ResourceDescriptor,
        fields: Vec<Field>,
        admin_role: Option<String>,
        existing: Option<ResourceInstance>,
    ) -> Result<ReplayReport> {
        match (classify(existing.as_ref()), existing) {
            (Classification::Resume, Some(inst)) => self.resume_instance(inst),
            (Classification::Collision, Some(inst)) => self.collide(desc, inst, fields, admin_role),
            _ => self.create_fresh(desc, fields, admin_role, ReplayAction::Created),
        }
    }

    fn create_fresh(
        &mut self,
        desc: &ResourceDescriptor,
        fields: Vec<Field>,
        admin_role: Option<String>,
        action: ReplayAction,
    ) -> Result<ReplayReport> {
        let preview = desc.new_instance(fields.clone(), admin_role.clone())?;
        let id = preview.id();
        if !self
            .operator
            .confirm_preview(&preview, &engine::plan_create(&preview))?
        {
            info!(instance = %id, "cancelled at preview");
            return Ok(cancelled(id));
        }
        let outcome = self.engine.create(desc, fields, admin_role, self.opts)?;
        Ok(ReplayReport {
            instance: outcome.instance.id(),
            action,
            outcome: Some(outcome),
        })
    }

    fn resume_instance(&mut self, inst: ResourceInstance) -> Result<ReplayReport> {
        let id = inst.id();
        if inst.status != InstanceStatus::InProgress {
            return Err(SnowUtilsError::InvalidTransition {
                instance: id,
                from: inst.status.to_string(),
                to: InstanceStatus::Complete.to_string(),
                reason: "only IN_PROGRESS instances can be resumed".to_string(),
            });
        }
        if !self
            .operator
            .confirm_preview(&inst, &engine::plan_create(&inst))?
        {
            info!(instance = %id, "cancelled at preview");
            return Ok(cancelled(id));
        }
        let outcome = self
            .engine
            .resume(&inst.skill_id, &inst.instance_key, self.opts)?;
        Ok(ReplayReport {
            instance: id,
            action: ReplayAction::Resumed,
            outcome: Some(outcome),
        })
    }

    fn collide(
        &mut self,
        desc: &ResourceDescriptor,
        existing: ResourceInstance,
        fields: Vec<Field>,
        admin_role: Option<String>,
    ) -> Result<ReplayReport> {
        let id = existing.id();
        let choice = self.operator.choose_collision(&existing)?;
        info!(instance = %id, disposition = %choice, "collision");

        match choice {
            CollisionDisposition::UseExisting => Ok(ReplayReport {
                instance: id,
                action: ReplayAction::UsedExisting,
                outcome: None,
            }),
            CollisionDisposition::Cancel => Ok(cancelled(id)),
            CollisionDisposition::Replace => {
                let fresh = desc.new_instance(fields.clone(), admin_role.clone())?;
                let mut plan = engine::plan_delete(&existing)?;
                plan.extend(engine::plan_create(&fresh));
                if !self.operator.confirm_preview(&fresh, &plan)? {
                    info!(instance = %id, "cancelled at preview");
                    return Ok(cancelled(id));
                }
                let removed = self
                    .engine
                    .delete(&existing.skill_id, &existing.instance_key)?;
                let mut outcome = self.engine.create(desc, fields, admin_role, self.opts)?;
                outcome.compensated = removed.compensated;
                Ok(ReplayReport {
                    instance: id,
                    action: ReplayAction::Replaced,
                    outcome: Some(outcome),
                })
            }
            CollisionDisposition::Rename { new_key } => {
                let new_key = match desc.field_spec(desc.key_field) {
                    Some(spec) => spec.style.apply(&new_key),
                    None => new_key,
                };
                paths::validate_instance_key(&new_key)?;
                if new_key == existing.instance_key {
                    return Err(SnowUtilsError::DuplicateInstanceKey {
                        skill: existing.skill_id.clone(),
                        key: new_key,
                    });
                }
                let fields = rename_fields(desc, &fields, &existing.instance_key, &new_key);
                self.create_fresh(desc, fields, admin_role, ReplayAction::Renamed { new_key })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Replay all
    // -----------------------------------------------------------------------

    /// Recreate every instance, oldest first.
    ///
    /// Refuses to start unless every instance is REMOVED. Stops at the first
    /// failure; instances completed before it are kept.
    pub fn replay_all(&mut self) -> Result<BatchReport> {
        let manifest = self.engine.store().load()?;
        let ordered: Vec<ResourceInstance> = manifest.by_creation().into_iter().cloned().collect();

        let blocked: Vec<String> = ordered
            .iter()
            .filter_map(|inst| {
                let reason = match inst.status {
                    _ if !descriptor::is_known(&inst.skill_id) => {
                        "unknown resource family, cannot be replayed"
                    }
                    InstanceStatus::Removed => return None,
                    InstanceStatus::Complete => "COMPLETE, delete it or replay it on its own",
                    InstanceStatus::InProgress => "IN_PROGRESS, resume or delete it first",
                };
                Some(format!("{} is {reason}", inst.id()))
            })
            .collect();
        if !blocked.is_empty() {
            return Err(SnowUtilsError::BatchBlocked(blocked));
        }

        let mut report = BatchReport::default();
        for inst in ordered {
            let id = inst.id();
            info!(instance = %id, position = report.completed.len() + 1, "batch replay");
            let result = self.replay(&inst.skill_id, &inst.instance_key);
            match result {
                Ok(r) if r.action == ReplayAction::Cancelled => {
                    report.cancelled_at = Some(id);
                    return Ok(report);
                }
                Ok(r) => {
                    report.outcomes.extend(r.outcome);
                    report.completed.push(id);
                }
                Err(cause) => {
                    warn!(instance = %id, error = %cause, "batch stopped");
                    return Err(SnowUtilsError::BatchFailed {
                        instance: id,
                        completed: report.completed.len(),
                        cause: Box::new(cause),
                    });
                }
            }
        }
        Ok(report)
    }
}

fn cancelled(instance: String) -> ReplayReport {
    ReplayReport {
        instance,
        action: ReplayAction::Cancelled,
        outcome: None,
    }
}

fn key_of(desc: &ResourceDescriptor, fields: &[Field]) -> Result<String> {
    fields
        .iter()
        .find(|f| f.name == desc.key_field)
        .map(|f| f.value.clone())
        .ok_or_else(|| SnowUtilsError::MissingField {
            skill: desc.skill_id.to_string(),
            field: desc.key_field.to_string(),
        })
}

/// Point the key field at `new_key` and rewrite names derived from the old key.
fn rename_fields(desc: &ResourceDescriptor, fields: &[Field], old_key: &str, new_key: &str) -> Vec<Field> {
    fields
        .iter()
        .map(|f| {
            let value = if f.name == desc.key_field {
                new_key.to_string()
            } else {
                f.value.replace(old_key, new_key)
            };
            Field::new(f.name.clone(), value)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
