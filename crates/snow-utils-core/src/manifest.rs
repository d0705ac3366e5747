//! Manifest data model and its markdown encoding.
//!
//! ```text
//! # Snow-Utils Manifest
//!
//! **Project:** demo
//!
//! ## admin_roles
//!
//! **pat:** ACCOUNTADMIN
//!
//! <!-- START -- pat:ALICE_DEMO_RUNNER -->
//! ### pat: ALICE_DEMO_RUNNER
//!
//! **Status:** COMPLETE
//! **Created At:** 2026-10-17T09:30:00Z
//! **user:** ALICE_DEMO_RUNNER
//!
//! | # | Type | Name | Status |
//! |---|------|------|--------|
//! | 1 | USER | service_user | DONE |
//!
//! <!-- END -- pat:ALICE_DEMO_RUNNER -->
//! ```
//!
//! Exported manifests additionally start with a `COCO_INSTRUCTION` comment,
//! carry a `## shared_info` block and tag adaptable values with a trailing
//! `# ADAPT: user-prefixed`.

use crate::descriptor;
use crate::error::{Result, SnowUtilsError};
use crate::types::{InstanceStatus, StepStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::OnceLock;

pub const MANIFEST_HEADING: &str = "# Snow-Utils Manifest";
pub const ADAPT_COMMENT: &str = "# ADAPT: user-prefixed";
pub const INSTRUCTION_OPEN: &str = "<!-- COCO_INSTRUCTION";

const ADMIN_ROLES_HEADING: &str = "## admin_roles";
const SHARED_INFO_HEADING: &str = "## shared_info";
const TABLE_HEADER: &str = "| # | Type | Name | Status |";
const TABLE_RULE: &str = "|---|------|------|--------|";

/// Labels an instance block uses for its own lines; fields cannot take them.
pub const RESERVED_LABELS: [&str; 4] = ["Status", "Created At", "Removed At", "Admin Role"];

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

static FIELD_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn field_name_re() -> &'static Regex {
    FIELD_NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap())
}

/// Check that a field survives the markdown encoding unchanged.
///
/// Names are `[A-Za-z0-9_]+` and never one of [`RESERVED_LABELS`]. Values
/// stay on one line and do not end with the adapt tag.
pub fn check_field(name: &str, value: &str) -> Result<()> {
    let invalid = |reason: &str| SnowUtilsError::InvalidField {
        field: name.to_string(),
        reason: reason.to_string(),
    };
    if !field_name_re().is_match(name) {
        return Err(invalid("names may only contain letters, digits and '_'"));
    }
    if RESERVED_LABELS.iter().any(|l| l.eq_ignore_ascii_case(name)) {
        return Err(invalid("the name is reserved for the instance status block"));
    }
    if value.contains(['\n', '\r']) {
        return Err(invalid("values must fit on one line"));
    }
    if value.trim_end().ends_with(ADAPT_COMMENT) {
        return Err(invalid("values cannot end with the adapt tag"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub kind: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    pub skill_id: String,
    pub instance_key: String,
    pub fields: Vec<Field>,
    pub steps: Vec<Step>,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_role: Option<String>,
}

impl ResourceInstance {
    /// `skill:key`, the identifier used in section markers and messages.
    pub fn id(&self) -> String {
        instance_id(&self.skill_id, &self.instance_key)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Insert or overwrite a field, keeping first-insertion order.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(f) => f.value = value,
            None => self.fields.push(Field::new(name, value)),
        }
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    pub fn first_pending(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.status == StepStatus::Pending)
    }

    pub fn all_done(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Done)
    }

    pub fn done_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .count()
    }

    /// Status/step consistency rules every persisted instance obeys.
    pub fn check_invariant(&self) -> std::result::Result<(), String> {
        match self.status {
            InstanceStatus::Complete if !self.all_done() => {
                Err("status COMPLETE but some steps are PENDING".to_string())
            }
            InstanceStatus::InProgress if self.first_pending().is_none() => {
                Err("status IN_PROGRESS but no step is PENDING".to_string())
            }
            InstanceStatus::Removed if self.removed_at.is_none() => {
                Err("status REMOVED but Removed At is not set".to_string())
            }
            _ => Ok(()),
        }
    }
}

pub fn instance_id(skill_id: &str, instance_key: &str) -> String {
    format!("{skill_id}:{instance_key}")
}

/// Provenance block attached only to exported manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedInfo {
    pub shared_by: Option<String>,
    pub shared_date: Option<String>,
    pub original_project_dir: Option<String>,
}

/// A field inside a specific instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub skill_id: String,
    pub instance_key: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(skill_id: &str, instance_key: &str, field: &str) -> Self {
        Self {
            skill_id: skill_id.to_string(),
            instance_key: instance_key.to_string(),
            field: field.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub project_name: Option<String>,
    #[serde(default)]
    pub admin_roles: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_info: Option<SharedInfo>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub adapt_markers: BTreeSet<FieldRef>,
    #[serde(default)]
    pub instances: Vec<ResourceInstance>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn find(&self, skill_id: &str, instance_key: &str) -> Option<&ResourceInstance> {
        self.instances
            .iter()
            .find(|i| i.skill_id == skill_id && i.instance_key == instance_key)
    }

    pub fn find_mut(&mut self, skill_id: &str, instance_key: &str) -> Option<&mut ResourceInstance> {
        self.instances
            .iter_mut()
            .find(|i| i.skill_id == skill_id && i.instance_key == instance_key)
    }

    pub fn require(&self, skill_id: &str, instance_key: &str) -> Result<&ResourceInstance> {
        self.find(skill_id, instance_key)
            .ok_or_else(|| SnowUtilsError::UnknownInstance {
                skill: skill_id.to_string(),
                key: instance_key.to_string(),
            })
    }

    pub fn require_mut(&mut self, skill_id: &str, instance_key: &str) -> Result<&mut ResourceInstance> {
        self.find_mut(skill_id, instance_key)
            .ok_or_else(|| SnowUtilsError::UnknownInstance {
                skill: skill_id.to_string(),
                key: instance_key.to_string(),
            })
    }

    pub fn is_marked(&self, skill_id: &str, instance_key: &str, field: &str) -> bool {
        self.adapt_markers
            .contains(&FieldRef::new(skill_id, instance_key, field))
    }

    /// Instances ordered by `created_at`, oldest first.
    pub fn by_creation(&self) -> Vec<&ResourceInstance> {
        let mut sorted: Vec<&ResourceInstance> = self.instances.iter().collect();
        sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sorted
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(info) = &self.shared_info {
            let _ = writeln!(out, "{INSTRUCTION_OPEN}");
            let _ = writeln!(
                out,
                "This is a portable snow-utils manifest shared by {} on {}.",
                info.shared_by.as_deref().unwrap_or("unknown"),
                info.shared_date.as_deref().unwrap_or("unknown"),
            );
            let _ = writeln!(
                out,
                "Do not replay it in place. Import it with 'snow-utils import <file>', which"
            );
            let _ = writeln!(
                out,
                "copies it to {} after the values tagged '{ADAPT_COMMENT}' are reviewed.",
                crate::paths::MANIFEST_FILE
            );
            let _ = writeln!(out, "-->");
        }

        let _ = writeln!(out, "{MANIFEST_HEADING}");
        let _ = writeln!(out);
        if let Some(project) = &self.project_name {
            let _ = writeln!(out, "**Project:** {project}");
            let _ = writeln!(out);
        }

        if let Some(info) = &self.shared_info {
            let _ = writeln!(out, "{SHARED_INFO_HEADING}");
            let _ = writeln!(out);
            for (k, v) in [
                ("shared_by", &info.shared_by),
                ("shared_date", &info.shared_date),
                ("original_project_dir", &info.original_project_dir),
            ] {
                if let Some(v) = v {
                    let _ = writeln!(out, "**{k}:** {v}");
                }
            }
            let _ = writeln!(out);
        }

        if !self.admin_roles.is_empty() {
            let _ = writeln!(out, "{ADMIN_ROLES_HEADING}");
            let _ = writeln!(out);
            for (skill, role) in &self.admin_roles {
                let _ = writeln!(out, "**{skill}:** {role}");
            }
            let _ = writeln!(out);
        }

        for inst in &self.instances {
            self.render_instance(&mut out, inst);
        }
        out
    }

    fn render_instance(&self, out: &mut String, inst: &ResourceInstance) {
        let id = inst.id();
        let _ = writeln!(out, "<!-- START -- {id} -->");
        let _ = writeln!(out, "### {}: {}", inst.skill_id, inst.instance_key);
        let _ = writeln!(out);
        let _ = writeln!(out, "**Status:** {}", inst.status);
        let _ = writeln!(out, "**Created At:** {}", format_ts(&inst.created_at));
        if let Some(removed) = &inst.removed_at {
            let _ = writeln!(out, "**Removed At:** {}", format_ts(removed));
        }
        if let Some(role) = &inst.admin_role {
            let _ = writeln!(out, "**Admin Role:** {role}");
        }
        for f in &inst.fields {
            if self.is_marked(&inst.skill_id, &inst.instance_key, &f.name) {
                let _ = writeln!(out, "**{}:** {} {ADAPT_COMMENT}", f.name, f.value);
            } else {
                let _ = writeln!(out, "**{}:** {}", f.name, f.value);
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{TABLE_HEADER}");
        let _ = writeln!(out, "{TABLE_RULE}");
        for (i, s) in inst.steps.iter().enumerate() {
            let _ = writeln!(out, "| {} | {} | {} | {} |", i + 1, s.kind, s.name, s.status);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "<!-- END -- {id} -->");
        let _ = writeln!(out);
    }

    /// Parse manifest text. `source` only feeds error messages.
    pub fn parse(text: &str, source: &str) -> Result<Self> {
        Parser::new(source).run(text)
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

static START_RE: OnceLock<Regex> = OnceLock::new();
static END_RE: OnceLock<Regex> = OnceLock::new();
static KV_RE: OnceLock<Regex> = OnceLock::new();

fn start_re() -> &'static Regex {
    START_RE.get_or_init(|| Regex::new(r"^<!-- START -- ([^:\s]+):(\S+) -->$").unwrap())
}

fn end_re() -> &'static Regex {
    END_RE.get_or_init(|| Regex::new(r"^<!-- END -- ([^:\s]+):(\S+) -->$").unwrap())
}

fn kv_re() -> &'static Regex {
    KV_RE.get_or_init(|| Regex::new(r"^\*\*([^*]+):\*\*\s?(.*)$").unwrap())
}

#[derive(Clone, Copy, PartialEq)]
enum Block {
    Header,
    AdminRoles,
    SharedInfo,
    Other,
}

struct Draft {
    skill_id: String,
    instance_key: String,
    start_line: usize,
    status: Option<InstanceStatus>,
    created_at: Option<DateTime<Utc>>,
    removed_at: Option<DateTime<Utc>>,
    admin_role: Option<String>,
    fields: Vec<Field>,
    steps: Vec<Step>,
}

struct Parser<'a> {
    source: &'a str,
    manifest: Manifest,
    block: Block,
    section: Option<Draft>,
    in_instruction: bool,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            manifest: Manifest::default(),
            block: Block::Header,
            section: None,
            in_instruction: false,
        }
    }

    fn corrupt(&self, line: usize, reason: impl Into<String>) -> SnowUtilsError {
        SnowUtilsError::ManifestCorrupt {
            path: self.source.to_string(),
            line,
            reason: reason.into(),
        }
    }

    fn run(mut self, text: &str) -> Result<Manifest> {
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end();

            if self.in_instruction {
                if line.trim_end().ends_with("-->") {
                    self.in_instruction = false;
                }
                continue;
            }
            if self.section.is_none() && line.starts_with(INSTRUCTION_OPEN) {
                self.in_instruction = !line.ends_with("-->");
                continue;
            }

            if let Some(caps) = start_re().captures(line) {
                if let Some(open) = &self.section {
                    return Err(self.corrupt(
                        line_no,
                        format!(
                            "START for {}:{} while {}:{} (opened on line {}) has no END",
                            &caps[1], &caps[2], open.skill_id, open.instance_key, open.start_line
                        ),
                    ));
                }
                self.section = Some(Draft {
                    skill_id: caps[1].to_string(),
                    instance_key: caps[2].to_string(),
                    start_line: line_no,
                    status: None,
                    created_at: None,
                    removed_at: None,
                    admin_role: None,
                    fields: Vec::new(),
                    steps: Vec::new(),
                });
                continue;
            }

            if let Some(caps) = end_re().captures(line) {
                let Some(draft) = self.section.take() else {
                    return Err(self.corrupt(
                        line_no,
                        format!("END for {}:{} without a matching START", &caps[1], &caps[2]),
                    ));
                };
                if draft.skill_id != caps[1] || draft.instance_key != caps[2] {
                    return Err(self.corrupt(
                        line_no,
                        format!(
                            "END for {}:{} does not match START for {}:{} on line {}",
                            &caps[1], &caps[2], draft.skill_id, draft.instance_key, draft.start_line
                        ),
                    ));
                }
                self.finish_section(draft, line_no)?;
                continue;
            }

            match self.section.take() {
                Some(mut draft) => {
                    let res = self.section_line(&mut draft, line, line_no);
                    self.section = Some(draft);
                    res?;
                }
                None => self.top_level_line(line),
            }
        }

        if self.in_instruction {
            return Err(self.corrupt(text.lines().count(), "COCO_INSTRUCTION comment is never closed"));
        }
        if let Some(open) = &self.section {
            return Err(self.corrupt(
                open.start_line,
                format!("START for {}:{} has no END", open.skill_id, open.instance_key),
            ));
        }
        Ok(self.manifest)
    }

    fn top_level_line(&mut self, line: &str) {
        if line.starts_with("## ") {
            self.block = match line {
                ADMIN_ROLES_HEADING => Block::AdminRoles,
                SHARED_INFO_HEADING => {
                    self.manifest.shared_info.get_or_insert_with(SharedInfo::default);
                    Block::SharedInfo
                }
                _ => Block::Other,
            };
            return;
        }
        let Some(caps) = kv_re().captures(line) else {
            return;
        };
        let (key, value) = (caps[1].trim(), strip_adapt(caps[2].trim()).0);
        match self.block {
            Block::Header if key == "Project" => {
                self.manifest.project_name = Some(value.to_string());
            }
            Block::AdminRoles => {
                self.manifest
                    .admin_roles
                    .insert(key.to_string(), value.to_string());
            }
            Block::SharedInfo => {
                let info = self.manifest.shared_info.get_or_insert_with(SharedInfo::default);
                let slot = match key {
                    "shared_by" => &mut info.shared_by,
                    "shared_date" => &mut info.shared_date,
                    "original_project_dir" => &mut info.original_project_dir,
                    _ => return,
                };
                *slot = Some(value.to_string()).filter(|v| !v.is_empty());
            }
            _ => {}
        }
    }

    fn section_line(&mut self, draft: &mut Draft, line: &str, line_no: usize) -> Result<()> {
        if line.starts_with('|') {
            return self.table_line(draft, line, line_no);
        }
        let Some(caps) = kv_re().captures(line) else {
            return Ok(());
        };
        let key = caps[1].trim().to_string();
        let (value, marked) = strip_adapt(caps[2].trim());
        let value = value.to_string();

        match key.as_str() {
            "Status" => {
                let status = value
                    .parse::<InstanceStatus>()
                    .map_err(|e| self.corrupt(line_no, e.to_string()))?;
                draft.status = Some(status);
            }
            "Created At" => draft.created_at = Some(self.timestamp(&value, line_no)?),
            "Removed At" => draft.removed_at = Some(self.timestamp(&value, line_no)?),
            "Admin Role" => draft.admin_role = Some(value).filter(|v| !v.is_empty()),
            _ => {
                if marked {
                    self.manifest.adapt_markers.insert(FieldRef::new(
                        &draft.skill_id,
                        &draft.instance_key,
                        &key,
                    ));
                }
                draft.fields.push(Field::new(key, value));
            }
        }
        Ok(())
    }

    fn timestamp(&self, value: &str, line_no: usize) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| self.corrupt(line_no, format!("bad timestamp '{value}': {e}")))
    }

    fn table_line(&self, draft: &mut Draft, line: &str, line_no: usize) -> Result<()> {
        let cells: Vec<&str> = line
            .trim_matches('|')
            .split('|')
            .map(|c| c.trim())
            .collect();
        if cells.first().is_some_and(|c| *c == "#" || c.starts_with('-')) {
            return Ok(());
        }
        if cells.len() != 4 {
            return Err(self.corrupt(
                line_no,
                format!("step row needs 4 columns (#, Type, Name, Status), found {}", cells.len()),
            ));
        }
        let status = cells[3]
            .parse::<StepStatus>()
            .map_err(|e| self.corrupt(line_no, e.to_string()))?;
        draft.steps.push(Step {
            name: cells[2].to_string(),
            kind: cells[1].to_string(),
            status,
        });
        Ok(())
    }

    fn finish_section(&mut self, draft: Draft, end_line: usize) -> Result<()> {
        let id = instance_id(&draft.skill_id, &draft.instance_key);
        let line = draft.start_line;

        let Some(status) = draft.status else {
            return Err(self.corrupt(line, format!("{id} has no **Status:** line")));
        };
        let Some(created_at) = draft.created_at else {
            return Err(self.corrupt(line, format!("{id} has no **Created At:** line")));
        };
        if self.manifest.find(&draft.skill_id, &draft.instance_key).is_some() {
            return Err(self.corrupt(line, format!("{id} appears more than once")));
        }

        if let Ok(desc) = descriptor::find(&draft.skill_id) {
            for spec in desc.required_fields() {
                if !draft.fields.iter().any(|f| f.name == spec.name) {
                    return Err(self.corrupt(
                        line,
                        format!("{id} is missing required field '{}'", spec.name),
                    ));
                }
            }
            if draft.steps.is_empty() {
                return Err(self.corrupt(end_line, format!("{id} has no step table")));
            }
        }

        let instance = ResourceInstance {
            skill_id: draft.skill_id,
            instance_key: draft.instance_key,
            fields: draft.fields,
            steps: draft.steps,
            status,
            created_at,
            removed_at: draft.removed_at,
            admin_role: draft.admin_role,
        };
        if let Err(reason) = instance.check_invariant() {
            return Err(self.corrupt(line, format!("{id}: {reason}")));
        }
        self.manifest.instances.push(instance);
        Ok(())
    }
}

/// Split a trailing adapt comment off a value.
fn strip_adapt(value: &str) -> (&str, bool) {
    match value.strip_suffix(ADAPT_COMMENT) {
        Some(rest) => (rest.trim_end(), true),
        None => (value, false),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
