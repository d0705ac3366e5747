//! Manifest Store: the only code that writes the canonical manifest.
//!
//! Every mutation takes the project's advisory lock, re-reads the file,
//! applies the change and atomically rewrites the whole document with
//! owner-only permissions. A mutation that changes nothing does not write.

use crate::descriptor;
use crate::error::{Result, SnowUtilsError};
use crate::io;
use crate::manifest::{check_field, instance_id, Field, Manifest, ResourceInstance};
use crate::paths;
use crate::types::{InstanceStatus, StepStatus};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[cfg(unix)]
type LockGuard = nix::fcntl::Flock<File>;
#[cfg(not(unix))]
type LockGuard = File;

pub struct ManifestStore {
    root: PathBuf,
    project_name: String,
}

impl ManifestStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            project_name: paths::project_name_from_root(root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> PathBuf {
        paths::manifest_path(&self.root)
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Parse the canonical manifest. A missing file is an empty manifest.
    pub fn load(&self) -> Result<Manifest> {
        let path = self.path();
        if !path.exists() {
            return Ok(Manifest::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let manifest = Manifest::parse(&text, &path.display().to_string())?;
        if manifest.shared_info.is_some() {
            warn!(path = %path.display(), "canonical manifest carries shared_info; it looks like an unimported portable copy");
        }
        Ok(manifest)
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Add a new IN_PROGRESS instance.
    ///
    /// A REMOVED record with the same key is replaced in place: it keeps its
    /// original `created_at`, and protected steps that were DONE stay DONE.
    /// The instance's admin role is recorded for its family if none is yet.
    pub fn append_instance(&self, instance: ResourceInstance) -> Result<ResourceInstance> {
        for f in &instance.fields {
            check_field(&f.name, &f.value)?;
        }
        self.transact("append_instance", |m| {
            let mut instance = instance;
            if let Some(role) = &instance.admin_role {
                m.admin_roles
                    .entry(instance.skill_id.clone())
                    .or_insert_with(|| role.clone());
            }
            let existing = m
                .instances
                .iter()
                .position(|i| i.skill_id == instance.skill_id && i.instance_key == instance.instance_key);

            match existing {
                Some(idx) if m.instances[idx].status != InstanceStatus::Removed => {
                    Err(SnowUtilsError::DuplicateInstanceKey {
                        skill: instance.skill_id.clone(),
                        key: instance.instance_key.clone(),
                    })
                }
                Some(idx) => {
                    let old = &m.instances[idx];
                    instance.created_at = old.created_at;
                    carry_protected_steps(old, &mut instance);
                    debug!(instance = %instance.id(), "replacing REMOVED record");
                    m.instances[idx] = instance.clone();
                    Ok(instance)
                }
                None => {
                    m.instances.push(instance.clone());
                    Ok(instance)
                }
            }
        })
    }

    /// Set one step's status. Setting the current status again is a no-op.
    ///
    /// The instance status follows in the same write: the last PENDING step
    /// turning DONE promotes IN_PROGRESS to COMPLETE, and a DONE step of a
    /// COMPLETE instance turning PENDING demotes it to IN_PROGRESS.
    pub fn update_step(
        &self,
        skill_id: &str,
        instance_key: &str,
        step_name: &str,
        status: StepStatus,
    ) -> Result<ResourceInstance> {
        self.transact("update_step", |m| {
            let inst = m.require_mut(skill_id, instance_key)?;
            let id = inst.id();
            let current = inst
                .step(step_name)
                .map(|s| s.status)
                .ok_or_else(|| SnowUtilsError::UnknownStep {
                    skill: skill_id.to_string(),
                    key: instance_key.to_string(),
                    step: step_name.to_string(),
                })?;
            if current == status {
                return Ok(inst.clone());
            }

            if inst.status == InstanceStatus::Removed && status == StepStatus::Done {
                return Err(SnowUtilsError::InvalidTransition {
                    instance: id,
                    from: format!("step {step_name} {current}"),
                    to: status.to_string(),
                    reason: "instance is REMOVED; replay it to provision again".to_string(),
                });
            }

            if let Some(step) = inst.step_mut(step_name) {
                step.status = status;
            }
            debug!(instance = %id, step = step_name, status = %status, "step updated");

            match inst.status {
                InstanceStatus::InProgress if inst.all_done() => {
                    inst.status = InstanceStatus::Complete;
                    info!(instance = %id, "all steps done, instance COMPLETE");
                }
                InstanceStatus::Complete if status == StepStatus::Pending => {
                    inst.status = InstanceStatus::InProgress;
                    info!(instance = %id, step = step_name, "step reset, instance IN_PROGRESS");
                }
                _ => {}
            }
            Ok(inst.clone())
        })
    }

    /// Move an instance to a new lifecycle status.
    pub fn set_status(
        &self,
        skill_id: &str,
        instance_key: &str,
        status: InstanceStatus,
    ) -> Result<ResourceInstance> {
        self.transact("set_status", |m| {
            let inst = m.require_mut(skill_id, instance_key)?;
            let from = inst.status;
            if from == status {
                return Ok(inst.clone());
            }
            let invalid = |reason: String| SnowUtilsError::InvalidTransition {
                instance: instance_id(skill_id, instance_key),
                from: from.to_string(),
                to: status.to_string(),
                reason,
            };

            match (from, status) {
                (_, InstanceStatus::Removed) => {
                    inst.removed_at = Some(Utc::now());
                }
                (_, InstanceStatus::Complete) => {
                    let pending = inst.steps.len() - inst.done_count();
                    if pending > 0 {
                        return Err(invalid(format!(
                            "{pending} step(s) still PENDING; resume the instance first"
                        )));
                    }
                    inst.removed_at = None;
                }
                (InstanceStatus::Removed, InstanceStatus::InProgress) => {
                    return Err(invalid(
                        "a REMOVED instance is provisioned again with replay".to_string(),
                    ));
                }
                (_, InstanceStatus::InProgress) => {
                    return Err(invalid(
                        "use rotate to re-run renewable steps of a COMPLETE instance".to_string(),
                    ));
                }
            }
            inst.status = status;
            info!(instance = %inst.id(), from = %from, to = %status, "status changed");
            Ok(inst.clone())
        })
    }

    /// Reset `steps` to PENDING and move a COMPLETE instance to IN_PROGRESS.
    pub fn begin_rotation(
        &self,
        skill_id: &str,
        instance_key: &str,
        steps: &[&str],
    ) -> Result<ResourceInstance> {
        self.transact("begin_rotation", |m| {
            let inst = m.require_mut(skill_id, instance_key)?;
            if inst.status != InstanceStatus::Complete {
                return Err(SnowUtilsError::NotComplete {
                    instance: inst.id(),
                    status: inst.status.to_string(),
                });
            }
            if steps.is_empty() {
                return Err(SnowUtilsError::InvalidTransition {
                    instance: inst.id(),
                    from: inst.status.to_string(),
                    to: InstanceStatus::InProgress.to_string(),
                    reason: format!("{skill_id} has no renewable steps"),
                });
            }
            for name in steps {
                let step = inst
                    .step_mut(name)
                    .ok_or_else(|| SnowUtilsError::UnknownStep {
                        skill: skill_id.to_string(),
                        key: instance_key.to_string(),
                        step: name.to_string(),
                    })?;
                step.status = StepStatus::Pending;
            }
            inst.status = InstanceStatus::InProgress;
            info!(instance = %inst.id(), steps = ?steps, "rotation started");
            Ok(inst.clone())
        })
    }

    /// Merge provider identifiers into an instance. Secret fields are dropped.
    pub fn set_fields(&self, skill_id: &str, instance_key: &str, fields: &[Field]) -> Result<()> {
        let desc = descriptor::find(skill_id).ok();
        for f in fields {
            check_field(&f.name, &f.value)?;
        }
        self.transact("set_fields", |m| {
            let inst = m.require_mut(skill_id, instance_key)?;
            for f in fields {
                if desc.is_some_and(|d| d.is_secret_field(&f.name)) {
                    continue;
                }
                inst.set_field(&f.name, f.value.clone());
            }
            Ok(())
        })
    }

    /// Bring instances from an imported manifest into this one.
    ///
    /// Fails without writing if any of them collides with a record that is
    /// not REMOVED. Returns the number of instances imported.
    pub fn import_instances(
        &self,
        instances: Vec<ResourceInstance>,
        admin_roles: &BTreeMap<String, String>,
    ) -> Result<usize> {
        self.transact("import_instances", |m| {
            for inst in &instances {
                if let Some(existing) = m.find(&inst.skill_id, &inst.instance_key) {
                    if existing.status != InstanceStatus::Removed {
                        return Err(SnowUtilsError::DuplicateInstanceKey {
                            skill: inst.skill_id.clone(),
                            key: inst.instance_key.clone(),
                        });
                    }
                }
            }
            for (skill, role) in admin_roles {
                m.admin_roles.entry(skill.clone()).or_insert_with(|| role.clone());
            }
            let count = instances.len();
            for inst in instances {
                match m.find_mut(&inst.skill_id, &inst.instance_key) {
                    Some(slot) => *slot = inst,
                    None => m.instances.push(inst),
                }
            }
            Ok(count)
        })
    }

    // -----------------------------------------------------------------------
    // Admin roles
    // -----------------------------------------------------------------------

    pub fn get_admin_role(&self, skill_id: &str) -> Result<Option<String>> {
        Ok(self.load()?.admin_roles.get(skill_id).cloned())
    }

    /// First write wins. A different role needs `override_existing`.
    pub fn set_admin_role(&self, skill_id: &str, role: &str, override_existing: bool) -> Result<()> {
        let role = role.trim().to_uppercase();
        self.transact("set_admin_role", |m| {
            match m.admin_roles.get(skill_id) {
                Some(existing) if *existing == role => return Ok(()),
                Some(existing) if !override_existing => {
                    return Err(SnowUtilsError::AdminRoleConflict {
                        skill: skill_id.to_string(),
                        existing: existing.clone(),
                        requested: role.clone(),
                    });
                }
                Some(existing) => {
                    warn!(skill = skill_id, from = %existing, to = %role, "overriding admin role");
                }
                None => {}
            }
            m.admin_roles.insert(skill_id.to_string(), role.clone());
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Transaction plumbing
    // -----------------------------------------------------------------------

    fn transact<T>(&self, op: &str, f: impl FnOnce(&mut Manifest) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        let before = self.load()?;
        let mut manifest = before.clone();
        let out = f(&mut manifest)?;

        if manifest == before {
            debug!(op, "no change, manifest not rewritten");
            return Ok(out);
        }
        if manifest.project_name.is_none() {
            manifest.project_name = Some(self.project_name.clone());
        }
        for inst in &manifest.instances {
            inst.check_invariant()
                .map_err(|reason| SnowUtilsError::InvalidTransition {
                    instance: inst.id(),
                    from: op.to_string(),
                    to: inst.status.to_string(),
                    reason,
                })?;
        }
        let text = manifest.render();
        check_encoding(op, &text)?;
        io::atomic_write_private(&self.path(), text.as_bytes())?;
        debug!(op, path = %self.path().display(), "manifest written");
        Ok(out)
    }

    fn open_lock_file(&self) -> Result<(PathBuf, File)> {
        let path = paths::lock_path(&self.root);
        io::ensure_dir(&paths::snow_utils_dir(&self.root))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        io::restrict_permissions(&path)?;
        Ok((path, file))
    }

    #[cfg(unix)]
    fn lock(&self) -> Result<LockGuard> {
        use nix::fcntl::{Flock, FlockArg};

        let (path, file) = self.open_lock_file()?;
        debug!(path = %path.display(), "acquiring manifest lock");
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            SnowUtilsError::Lock(format!("{}: {errno}", path.display()))
        })
    }

    #[cfg(not(unix))]
    fn lock(&self) -> Result<LockGuard> {
        Ok(self.open_lock_file()?.1)
    }
}

/// The rendered text must parse and render back to itself.
fn check_encoding(op: &str, text: &str) -> Result<()> {
    let unencodable = |reason: String| SnowUtilsError::Unencodable {
        op: op.to_string(),
        reason,
    };
    let again = Manifest::parse(text, "rendered manifest")
        .map_err(|e| unencodable(e.to_string()))?
        .render();
    if again == text {
        return Ok(());
    }
    let reason = match text.lines().zip(again.lines()).position(|(a, b)| a != b) {
        Some(idx) => format!("line {} does not read back unchanged", idx + 1),
        None => "content is lost when read back".to_string(),
    };
    Err(unencodable(reason))
}

fn carry_protected_steps(old: &ResourceInstance, new: &mut ResourceInstance) {
    let Ok(desc) = descriptor::find(&new.skill_id) else {
        return;
    };
    for step in new.steps.iter_mut() {
        let protected = desc.step(&step.name).is_some_and(|s| s.protected);
        let was_done = old
            .step(&step.name)
            .is_some_and(|s| s.status == StepStatus::Done);
        if protected && was_done {
            step.status = StepStatus::Done;
        }
    }
    if new.status == InstanceStatus::InProgress && new.all_done() {
        new.status = InstanceStatus::Complete;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NamingContext;
    use tempfile::TempDir;

    fn networks_instance() -> ResourceInstance {
        let d = descriptor::find("networks").unwrap();
        let mut input = BTreeMap::new();
        input.insert("values".to_string(), "10.0.0.1/32".to_string());
        let ctx = NamingContext {
            prefix: Some("ALICE".to_string()),
            project: "demo".to_string(),
        };
        d.new_instance(d.resolve_fields(&input, &ctx).unwrap(), None)
            .unwrap()
    }

    const KEY: &str = "ALICE_DEMO_NETWORK_RULE";

    fn store_with_instance() -> (TempDir, ManifestStore) {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        store.append_instance(networks_instance()).unwrap();
        (dir, store)
    }

    fn complete(store: &ManifestStore) {
        store
            .update_step("networks", KEY, "network_rule", StepStatus::Done)
            .unwrap();
        store
            .update_step("networks", KEY, "network_policy", StepStatus::Done)
            .unwrap();
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        assert!(store.load().unwrap().is_empty());
        assert!(!store.exists());
    }

    #[test]
    fn first_append_creates_file_with_project_name() {
        let (dir, store) = store_with_instance();
        let m = store.load().unwrap();
        let expected = paths::project_name_from_root(dir.path());
        assert_eq!(m.project_name.as_deref(), Some(expected.as_str()));
        assert_eq!(m.instances.len(), 1);
        assert!(paths::lock_path(dir.path()).exists());
    }

    #[cfg(unix)]
    #[test]
    fn writes_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, store) = store_with_instance();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        let dir_mode = std::fs::metadata(paths::snow_utils_dir(dir.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn duplicate_key_rejected_unless_removed() {
        let (_dir, store) = store_with_instance();
        let err = store.append_instance(networks_instance()).unwrap_err();
        assert!(matches!(err, SnowUtilsError::DuplicateInstanceKey { .. }));

        complete(&store);
        store
            .set_status("networks", KEY, InstanceStatus::Removed)
            .unwrap();
        let created = store.load().unwrap().instances[0].created_at;

        let replaced = store.append_instance(networks_instance()).unwrap();
        assert_eq!(replaced.created_at, created);
        let m = store.load().unwrap();
        assert_eq!(m.instances.len(), 1);
        assert_eq!(m.instances[0].status, InstanceStatus::InProgress);
        assert!(m.instances[0].removed_at.is_none());
    }

    #[test]
    fn update_step_twice_is_idempotent() {
        let (_dir, store) = store_with_instance();
        store
            .update_step("networks", KEY, "network_rule", StepStatus::Done)
            .unwrap();
        let once = std::fs::read_to_string(store.path()).unwrap();
        store
            .update_step("networks", KEY, "network_rule", StepStatus::Done)
            .unwrap();
        let twice = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn last_step_done_promotes_to_complete() {
        let (_dir, store) = store_with_instance();
        let inst = store
            .update_step("networks", KEY, "network_rule", StepStatus::Done)
            .unwrap();
        assert_eq!(inst.status, InstanceStatus::InProgress);
        let inst = store
            .update_step("networks", KEY, "network_policy", StepStatus::Done)
            .unwrap();
        assert_eq!(inst.status, InstanceStatus::Complete);
    }

    #[test]
    fn unknown_instance_and_step() {
        let (_dir, store) = store_with_instance();
        assert!(matches!(
            store.update_step("networks", "NOPE", "network_rule", StepStatus::Done),
            Err(SnowUtilsError::UnknownInstance { .. })
        ));
        assert!(matches!(
            store.update_step("networks", KEY, "nope", StepStatus::Done),
            Err(SnowUtilsError::UnknownStep { .. })
        ));
    }

    #[test]
    fn status_invariant_holds_across_transitions() {
        let (_dir, store) = store_with_instance();

        let err = store
            .set_status("networks", KEY, InstanceStatus::Complete)
            .unwrap_err();
        assert!(matches!(err, SnowUtilsError::InvalidTransition { .. }));

        complete(&store);
        let demoted = store
            .update_step("networks", KEY, "network_rule", StepStatus::Pending)
            .unwrap();
        assert_eq!(demoted.status, InstanceStatus::InProgress);
        complete(&store);

        let removed = store
            .set_status("networks", KEY, InstanceStatus::Removed)
            .unwrap();
        assert!(removed.removed_at.is_some());

        let err = store
            .set_status("networks", KEY, InstanceStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, SnowUtilsError::InvalidTransition { .. }));

        for inst in &store.load().unwrap().instances {
            inst.check_invariant().unwrap();
        }
    }

    #[test]
    fn removed_to_complete_clears_removed_at() {
        let (_dir, store) = store_with_instance();
        complete(&store);
        store
            .set_status("networks", KEY, InstanceStatus::Removed)
            .unwrap();
        let back = store
            .set_status("networks", KEY, InstanceStatus::Complete)
            .unwrap();
        assert!(back.removed_at.is_none());
    }

    #[test]
    fn begin_rotation_resets_named_steps() {
        let (_dir, store) = store_with_instance();
        assert!(matches!(
            store.begin_rotation("networks", KEY, &["network_policy"]),
            Err(SnowUtilsError::NotComplete { .. })
        ));
        complete(&store);
        let inst = store
            .begin_rotation("networks", KEY, &["network_policy"])
            .unwrap();
        assert_eq!(inst.status, InstanceStatus::InProgress);
        assert_eq!(inst.first_pending().unwrap().name, "network_policy");
        assert_eq!(inst.step("network_rule").unwrap().status, StepStatus::Done);
    }

    #[test]
    fn set_fields_skips_secrets() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let d = descriptor::find("pat").unwrap();
        let mut input = BTreeMap::new();
        input.insert("allowed_cidrs".to_string(), "10.0.0.1/32".to_string());
        let ctx = NamingContext {
            prefix: Some("ALICE".to_string()),
            project: "demo".to_string(),
        };
        let inst = d
            .new_instance(d.resolve_fields(&input, &ctx).unwrap(), None)
            .unwrap();
        let key = inst.instance_key.clone();
        store.append_instance(inst).unwrap();
        store
            .set_fields(
                "pat",
                &key,
                &[
                    Field::new("pat_token", "secret-value"),
                    Field::new("user_id", "42"),
                ],
            )
            .unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(!text.contains("secret-value"));
        assert!(text.contains("**user_id:** 42"));
    }

    #[test]
    fn admin_role_first_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        assert_eq!(store.get_admin_role("pat").unwrap(), None);
        store.set_admin_role("pat", "accountadmin", false).unwrap();
        store.set_admin_role("pat", "ACCOUNTADMIN", false).unwrap();
        let err = store.set_admin_role("pat", "SYSADMIN", false).unwrap_err();
        assert!(matches!(err, SnowUtilsError::AdminRoleConflict { .. }));
        store.set_admin_role("pat", "SYSADMIN", true).unwrap();
        assert_eq!(store.get_admin_role("pat").unwrap().as_deref(), Some("SYSADMIN"));
    }

    #[test]
    fn corrupt_file_is_reported_not_repaired() {
        let (_dir, store) = store_with_instance();
        let text = std::fs::read_to_string(store.path()).unwrap();
        let broken = text.replace(&format!("<!-- END -- networks:{KEY} -->"), "");
        std::fs::write(store.path(), &broken).unwrap();

        assert!(matches!(store.load(), Err(SnowUtilsError::ManifestCorrupt { .. })));
        assert!(store
            .update_step("networks", KEY, "network_rule", StepStatus::Done)
            .is_err());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), broken);
    }

    #[test]
    fn fields_that_would_break_the_encoding_are_rejected() {
        let (_dir, store) = store_with_instance();
        let before = std::fs::read_to_string(store.path()).unwrap();
        for field in [
            Field::new("Status", "COMPLETE"),
            Field::new("Created At", "2026-01-01T00:00:00Z"),
            Field::new("rule:id", "1"),
            Field::new("rule_id", "line1\n<!-- END -- networks:X -->"),
        ] {
            let err = store.set_fields("networks", KEY, &[field]).unwrap_err();
            assert!(matches!(err, SnowUtilsError::InvalidField { .. }), "{err}");
        }
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);

        let dir = TempDir::new().unwrap();
        let fresh = ManifestStore::new(dir.path());
        let mut inst = networks_instance();
        inst.set_field("Status", "COMPLETE");
        assert!(fresh.append_instance(inst).is_err());
        assert!(!fresh.exists());
    }

    #[test]
    fn unparseable_render_is_never_written() {
        let (_dir, store) = store_with_instance();
        let before = std::fs::read_to_string(store.path()).unwrap();
        let err = store
            .set_admin_role("networks", "sysadmin\n<!-- END -- networks:X -->", false)
            .unwrap_err();
        assert!(matches!(err, SnowUtilsError::Unencodable { .. }), "{err}");
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
        store.load().unwrap();
    }

    #[test]
    fn append_records_the_admin_role_once() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        let d = descriptor::find("networks").unwrap();
        let inst = networks_instance();
        let with_role = d
            .new_instance(inst.fields.clone(), Some("SYSADMIN".to_string()))
            .unwrap();
        store.append_instance(with_role).unwrap();
        assert_eq!(store.get_admin_role("networks").unwrap().as_deref(), Some("SYSADMIN"));

        complete(&store);
        store
            .set_status("networks", KEY, InstanceStatus::Removed)
            .unwrap();
        store.set_admin_role("networks", "ACCOUNTADMIN", true).unwrap();
        let older = d
            .new_instance(inst.fields, Some("SYSADMIN".to_string()))
            .unwrap();
        store.append_instance(older).unwrap();
        assert_eq!(
            store.get_admin_role("networks").unwrap().as_deref(),
            Some("ACCOUNTADMIN")
        );
    }

    #[cfg(unix)]
    #[test]
    fn second_writer_waits_for_the_lock() {
        use std::sync::mpsc;
        use std::time::Duration;

        let (dir, store) = store_with_instance();
        let guard = store.lock().unwrap();
        let (tx, rx) = mpsc::channel();

        std::thread::scope(|s| {
            s.spawn(|| {
                let other = ManifestStore::new(dir.path());
                other
                    .update_step("networks", KEY, "network_rule", StepStatus::Done)
                    .unwrap();
                tx.send(()).unwrap();
            });

            std::thread::sleep(Duration::from_millis(200));
            assert!(rx.try_recv().is_err(), "write went through while the lock was held");
            assert_eq!(store.load().unwrap().instances[0].done_count(), 0);
            drop(guard);
            rx.recv_timeout(Duration::from_secs(10)).unwrap();
        });

        assert_eq!(store.load().unwrap().instances[0].done_count(), 1);
    }

    #[test]
    fn concurrent_writers_lose_no_updates() {
        let (dir, store) = store_with_instance();
        std::thread::scope(|s| {
            for i in 0..8 {
                let root = dir.path();
                s.spawn(move || {
                    ManifestStore::new(root)
                        .set_fields("networks", KEY, &[Field::new(format!("tag_{i}"), i.to_string())])
                        .unwrap();
                });
            }
        });
        let inst = store.load().unwrap().instances[0].clone();
        for i in 0..8 {
            assert_eq!(inst.field(&format!("tag_{i}")), Some(i.to_string().as_str()));
        }
    }

    #[test]
    fn import_refuses_live_collisions() {
        let (_dir, store) = store_with_instance();
        let err = store
            .import_instances(vec![networks_instance()], &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, SnowUtilsError::DuplicateInstanceKey { .. }));
    }
}
