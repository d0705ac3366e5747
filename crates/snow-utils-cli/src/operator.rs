//! Terminal answers to the controller's confirmation checkpoints.
//!
//! `--json` never prompts: previews and adaptations are accepted and a
//! collision without `--on-collision` cancels. Text mode prompts unless
//! `--yes` is given.

use crate::output::{print_plan, print_table, shown};
use clap::ValueEnum;
use snow_utils_core::controller::Operator;
use snow_utils_core::manifest::ResourceInstance;
use snow_utils_core::portable::{AdaptChoice, AdaptRow};
use snow_utils_core::provider::PlannedAction;
use snow_utils_core::types::CollisionDisposition;
use snow_utils_core::{Result, SnowUtilsError};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollisionFlag {
    UseExisting,
    Replace,
    Rename,
    Cancel,
}

pub struct TerminalOperator {
    pub json: bool,
    pub yes: bool,
    pub masked: bool,
    pub on_collision: Option<CollisionFlag>,
    pub new_key: Option<String>,
}

impl TerminalOperator {
    fn ask(&self, question: &str) -> Result<String> {
        print!("{question} ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_lowercase())
    }

    fn rename_to(&mut self, existing: &ResourceInstance) -> Result<CollisionDisposition> {
        let new_key = match self.new_key.take() {
            Some(k) => k,
            None if self.json || self.yes => {
                return Err(SnowUtilsError::MissingField {
                    skill: existing.skill_id.clone(),
                    field: "--new-key".to_string(),
                })
            }
            None => self.ask("New instance key:")?,
        };
        if new_key.is_empty() {
            return Ok(CollisionDisposition::Cancel);
        }
        Ok(CollisionDisposition::Rename { new_key })
    }
}

impl Operator for TerminalOperator {
    fn confirm_preview(&mut self, instance: &ResourceInstance, plan: &[PlannedAction]) -> Result<bool> {
        if self.json {
            return Ok(true);
        }
        println!("{} ({} step(s)):", instance.id(), plan.len());
        for f in &instance.fields {
            println!("  {}: {}", f.name, shown(&f.name, &f.value, self.masked));
        }
        println!();
        print_plan(plan);
        if self.yes {
            return Ok(true);
        }
        Ok(matches!(self.ask("Proceed? [y/N]")?.as_str(), "y" | "yes"))
    }

    fn choose_collision(&mut self, existing: &ResourceInstance) -> Result<CollisionDisposition> {
        match self.on_collision {
            Some(CollisionFlag::UseExisting) => return Ok(CollisionDisposition::UseExisting),
            Some(CollisionFlag::Replace) => return Ok(CollisionDisposition::Replace),
            Some(CollisionFlag::Rename) => return self.rename_to(existing),
            Some(CollisionFlag::Cancel) => return Ok(CollisionDisposition::Cancel),
            None if self.json || self.yes => return Ok(CollisionDisposition::Cancel),
            None => {}
        }
        println!("{} is already COMPLETE.", existing.id());
        let answer = self.ask("[u]se existing, [r]eplace, re[n]ame or [c]ancel?")?;
        match answer.as_str() {
            "u" | "use" | "use-existing" => Ok(CollisionDisposition::UseExisting),
            "r" | "replace" => Ok(CollisionDisposition::Replace),
            "n" | "rename" => self.rename_to(existing),
            _ => Ok(CollisionDisposition::Cancel),
        }
    }

    fn confirm_adapt(&mut self, rows: &[AdaptRow]) -> Result<AdaptChoice> {
        if self.json {
            return Ok(AdaptChoice::Apply);
        }
        println!("{} value(s) carry the exporter's identity:", rows.len());
        print_table(
            &["INSTANCE", "FIELD", "ORIGINAL", "ADAPTED"],
            rows.iter()
                .map(|r| {
                    vec![
                        r.instance.clone(),
                        r.field.clone(),
                        r.original.clone(),
                        r.adapted.clone(),
                    ]
                })
                .collect(),
        );
        if self.yes {
            return Ok(AdaptChoice::Apply);
        }
        let answer = self.ask("[a]pply, [k]eep originals or [c]ancel?")?;
        Ok(match answer.as_str() {
            "a" | "apply" | "y" | "yes" => AdaptChoice::Apply,
            "k" | "keep" => AdaptChoice::KeepOriginals,
            _ => AdaptChoice::Cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use snow_utils_core::types::InstanceStatus;

    fn operator(json: bool, on_collision: Option<CollisionFlag>) -> TerminalOperator {
        TerminalOperator {
            json,
            yes: false,
            masked: true,
            on_collision,
            new_key: Some("ALICE_OTHER_RULE".to_string()),
        }
    }

    fn existing() -> ResourceInstance {
        ResourceInstance {
            skill_id: "networks".to_string(),
            instance_key: "ALICE_RULE".to_string(),
            fields: Vec::new(),
            steps: Vec::new(),
            status: InstanceStatus::Complete,
            created_at: Utc::now(),
            removed_at: None,
            admin_role: None,
        }
    }

    #[test]
    fn json_mode_cancels_collision_without_flag() {
        let mut op = operator(true, None);
        assert_eq!(op.choose_collision(&existing()).unwrap(), CollisionDisposition::Cancel);
        assert!(op.confirm_preview(&existing(), &[]).unwrap());
        assert_eq!(op.confirm_adapt(&[]).unwrap(), AdaptChoice::Apply);
    }

    #[test]
    fn collision_flag_is_honoured() {
        let mut op = operator(true, Some(CollisionFlag::Rename));
        assert_eq!(
            op.choose_collision(&existing()).unwrap(),
            CollisionDisposition::Rename {
                new_key: "ALICE_OTHER_RULE".to_string()
            }
        );
        let mut op = operator(false, Some(CollisionFlag::UseExisting));
        assert_eq!(
            op.choose_collision(&existing()).unwrap(),
            CollisionDisposition::UseExisting
        );
    }

    #[test]
    fn rename_without_key_in_json_mode_is_an_error() {
        let mut op = operator(true, Some(CollisionFlag::Rename));
        op.new_key = None;
        assert!(matches!(
            op.choose_collision(&existing()),
            Err(SnowUtilsError::MissingField { .. })
        ));
    }
}
