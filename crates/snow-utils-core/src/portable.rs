//! Portable manifests: export for another operator, adapt identity
//! prefixes, and import into the canonical path.
//!
//! A portable manifest is never used in place. Its instances are all
//! REMOVED, secrets are stripped, and values carrying the exporter's identity
//! are tagged so the receiver can rename them in one confirmed pass.

use crate::controller::Operator;
use crate::descriptor;
use crate::error::{Result, SnowUtilsError};
use crate::io;
use crate::manifest::{FieldRef, Manifest, ResourceInstance, SharedInfo};
use crate::naming;
use crate::paths;
use crate::store::ManifestStore;
use crate::types::{InstanceStatus, StepStatus};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One adapted value, shown side by side before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdaptRow {
    pub instance: String,
    pub field: String,
    pub original: String,
    pub adapted: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptChoice {
    Apply,
    KeepOriginals,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct Adapted {
    pub manifest: Manifest,
    pub rows: Vec<AdaptRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub markers: usize,
    pub choice: AdaptChoice,
    pub rows: Vec<AdaptRow>,
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Build the portable copy of `manifest`. Every instance must be COMPLETE.
pub fn export(manifest: &Manifest, identity: Option<&str>, project_dir: &Path) -> Result<Manifest> {
    if manifest.is_empty() {
        return Err(SnowUtilsError::NotAllComplete(vec![
            "the manifest has no instances".to_string(),
        ]));
    }
    let not_complete: Vec<String> = manifest
        .instances
        .iter()
        .filter(|i| i.status != InstanceStatus::Complete)
        .map(|i| format!("{} ({})", i.id(), i.status))
        .collect();
    if !not_complete.is_empty() {
        return Err(SnowUtilsError::NotAllComplete(not_complete));
    }

    let identity = identity
        .map(naming::identity_prefix)
        .filter(|p| !p.is_empty());
    if identity.is_none() {
        warn!("no operator identity known, exported values will not be tagged for adaptation");
    }

    let now = Utc::now();
    let mut markers = BTreeSet::new();
    let instances = manifest
        .instances
        .iter()
        .map(|inst| {
            let portable = portable_instance(inst, now);
            if let Some(prefix) = &identity {
                for f in &portable.fields {
                    if naming::has_identity_prefix(&f.value, prefix) {
                        markers.insert(FieldRef::new(&portable.skill_id, &portable.instance_key, &f.name));
                    }
                }
            }
            portable
        })
        .collect();

    Ok(Manifest {
        project_name: manifest.project_name.clone(),
        admin_roles: manifest.admin_roles.clone(),
        shared_info: Some(SharedInfo {
            shared_by: identity,
            shared_date: Some(now.format("%Y-%m-%d").to_string()),
            original_project_dir: Some(project_dir.display().to_string()),
        }),
        adapt_markers: markers,
        instances,
    })
}

/// REMOVED copy with secret steps and fields dropped. Protected steps stay DONE.
fn portable_instance(inst: &ResourceInstance, now: chrono::DateTime<Utc>) -> ResourceInstance {
    let mut out = inst.clone();
    out.status = InstanceStatus::Removed;
    out.removed_at = Some(now);
    if let Ok(desc) = descriptor::find(&inst.skill_id) {
        out.steps.retain(|s| !desc.step(&s.name).is_some_and(|spec| spec.secret));
        out.fields.retain(|f| !desc.is_secret_field(&f.name));
        for step in out.steps.iter_mut() {
            if !desc.step(&step.name).is_some_and(|spec| spec.protected) {
                step.status = StepStatus::Pending;
            }
        }
    } else {
        for step in out.steps.iter_mut() {
            step.status = StepStatus::Pending;
        }
    }
    out
}

/// Export the canonical manifest to `<root>/<project>-manifest.md`.
///
/// Nothing is written when the precondition fails.
pub fn export_to_file(store: &ManifestStore, identity: Option<&str>) -> Result<(PathBuf, Manifest)> {
    let manifest = store.load()?;
    let portable = export(&manifest, identity, store.root())?;
    let project = manifest
        .project_name
        .clone()
        .unwrap_or_else(|| paths::project_name_from_root(store.root()));
    let path = paths::portable_manifest_path(store.root(), &project);
    io::atomic_write(&path, portable.render().as_bytes())?;
    info!(path = %path.display(), instances = portable.instances.len(), markers = portable.adapt_markers.len(), "exported");
    Ok((path, portable))
}

// ---------------------------------------------------------------------------
// Adapt
// ---------------------------------------------------------------------------

pub fn read_portable(path: &Path) -> Result<Manifest> {
    let text = std::fs::read_to_string(path)?;
    Manifest::parse(&text, &path.display().to_string())
}

pub fn detect_adapt_markers(portable: &Manifest) -> usize {
    portable.adapt_markers.len()
}

/// The exporter's identity prefix, from `shared_info.shared_by`.
pub fn source_identity(portable: &Manifest) -> Result<String> {
    let info = portable
        .shared_info
        .as_ref()
        .ok_or_else(|| SnowUtilsError::AmbiguousIdentity("the file has no shared_info block".to_string()))?;
    let shared_by = info
        .shared_by
        .as_deref()
        .ok_or_else(|| SnowUtilsError::AmbiguousIdentity("shared_info has no shared_by".to_string()))?;
    let prefix = naming::identity_prefix(shared_by);
    if prefix.is_empty() {
        return Err(SnowUtilsError::AmbiguousIdentity(format!(
            "shared_by '{shared_by}' is not a usable identity"
        )));
    }
    Ok(prefix)
}

/// Swap `old_prefix` for `new_prefix` on every marked field that carries it.
///
/// Unmarked fields are never touched, even when their value matches. A
/// renamed key field renames the instance and its markers with it.
pub fn adapt(portable: &Manifest, old_prefix: &str, new_prefix: &str) -> Result<Adapted> {
    if naming::identity_prefix(old_prefix).is_empty() {
        return Err(SnowUtilsError::AmbiguousIdentity(format!(
            "old identity '{old_prefix}' is empty"
        )));
    }
    if naming::identity_prefix(new_prefix).is_empty() {
        return Err(SnowUtilsError::AmbiguousIdentity(format!(
            "new identity '{new_prefix}' is empty"
        )));
    }

    let mut manifest = portable.clone();
    let mut rows = Vec::new();
    let mut markers = BTreeSet::new();

    for inst in manifest.instances.iter_mut() {
        let original_key = inst.instance_key.clone();
        let id = inst.id();
        let key_field = descriptor::find(&inst.skill_id).ok().map(|d| d.key_field);

        for f in inst.fields.iter_mut() {
            if !portable.is_marked(&inst.skill_id, &original_key, &f.name) {
                continue;
            }
            if let Some(adapted) = naming::replace_identity_prefix(&f.value, old_prefix, new_prefix) {
                if adapted != f.value {
                    rows.push(AdaptRow {
                        instance: id.clone(),
                        field: f.name.clone(),
                        original: f.value.clone(),
                        adapted: adapted.clone(),
                    });
                    f.value = adapted;
                }
            }
        }

        if let Some(new_key) = key_field.and_then(|k| inst.field(k)).map(str::to_string) {
            inst.instance_key = new_key;
        }
        for m in &portable.adapt_markers {
            if m.skill_id == inst.skill_id && m.instance_key == original_key {
                markers.insert(FieldRef::new(&inst.skill_id, &inst.instance_key, &m.field));
            }
        }
    }
    manifest.adapt_markers = markers;
    Ok(Adapted { manifest, rows })
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Copy a portable manifest into the canonical path.
///
/// With `new_identity` set and adaptable values present, the operator sees
/// every change and answers once. Shared info and markers are dropped on the
/// way in. Nothing is written on cancel, when the file holds an instance
/// that is not REMOVED, or when an instance already exists here and is not
/// REMOVED.
pub fn import(
    store: &ManifestStore,
    path: &Path,
    new_identity: Option<&str>,
    operator: &mut dyn Operator,
) -> Result<ImportReport> {
    let portable = read_portable(path)?;
    let live: Vec<String> = portable
        .instances
        .iter()
        .filter(|i| i.status != InstanceStatus::Removed)
        .map(|i| format!("{} ({})", i.id(), i.status))
        .collect();
    if !live.is_empty() {
        return Err(SnowUtilsError::NotPortable(live));
    }
    let markers = detect_adapt_markers(&portable);

    let (mut manifest, choice, rows) = match new_identity {
        Some(new) if markers > 0 => {
            let old = source_identity(&portable)?;
            let adapted = adapt(&portable, &old, new)?;
            if adapted.rows.is_empty() {
                (portable, AdaptChoice::KeepOriginals, Vec::new())
            } else {
                match operator.confirm_adapt(&adapted.rows)? {
                    AdaptChoice::Apply => (adapted.manifest, AdaptChoice::Apply, adapted.rows),
                    AdaptChoice::KeepOriginals => (portable, AdaptChoice::KeepOriginals, adapted.rows),
                    AdaptChoice::Cancel => return Err(SnowUtilsError::Cancelled),
                }
            }
        }
        _ => (portable, AdaptChoice::KeepOriginals, Vec::new()),
    };

    manifest.shared_info = None;
    manifest.adapt_markers.clear();
    let imported = store.import_instances(manifest.instances, &manifest.admin_roles)?;
    info!(path = %path.display(), imported, choice = ?choice, "imported");
    Ok(ImportReport {
        imported,
        markers,
        choice,
        rows,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
