use super::{load_config, naming_context, parse_assignment, parse_instance, provider, save_secrets, Globals};
use crate::operator::{CollisionFlag, TerminalOperator};
use crate::output::{print_instance, print_json, print_plan};
use anyhow::Context;
use clap::Args;
use serde::Serialize;
use snow_utils_core::controller::{classify, Classification, Controller, Operator, ReplayAction, ReplayReport};
use snow_utils_core::descriptor;
use snow_utils_core::engine::{self, Engine, Outcome, RunOptions};
use snow_utils_core::manifest::ResourceInstance;
use snow_utils_core::provider::{PlannedAction, ThreadSleeper};
use snow_utils_core::store::ManifestStore;
use snow_utils_core::types::InstanceStatus;
use snow_utils_core::SnowUtilsError;
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Argument types
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct CollisionArgs {
    /// What to do when the instance is already COMPLETE (default: prompt; cancel with --json)
    #[arg(long, value_enum)]
    on_collision: Option<CollisionFlag>,

    /// Instance key used with --on-collision rename
    #[arg(long)]
    new_key: Option<String>,
}

#[derive(Args)]
pub struct CreateArgs {
    /// Resource family (see 'snow-utils skills')
    skill: String,

    /// Field value, repeatable: --set allowed_cidrs=10.0.0.1/32
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    set: Vec<(String, String)>,

    /// Admin role used for this family, recorded on first use
    #[arg(long)]
    admin_role: Option<String>,

    /// Show what would run without calling the provider or writing the manifest
    #[arg(long)]
    dry_run: bool,

    /// On failure keep completed steps for 'resume' instead of rolling back
    #[arg(long)]
    keep_partial: bool,

    #[command(flatten)]
    collision: CollisionArgs,
}

#[derive(Args)]
pub struct InstanceArgs {
    /// Instance as <skill>:<KEY>, e.g. pat:ALICE_DEMO_RUNNER
    instance: String,

    /// Show what would run without calling the provider or writing the manifest
    #[arg(long)]
    dry_run: bool,

    /// On failure keep completed steps instead of rolling back (resume only)
    #[arg(long)]
    keep_partial: bool,
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Instance as <skill>:<KEY>
    instance: String,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    keep_partial: bool,

    #[command(flatten)]
    collision: CollisionArgs,
}

#[derive(Args)]
pub struct ReplayAllArgs {
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    keep_partial: bool,
}

fn operator(globals: &Globals, collision: Option<CollisionArgs>) -> TerminalOperator {
    let (on_collision, new_key) = collision
        .map(|c| (c.on_collision, c.new_key))
        .unwrap_or_default();
    TerminalOperator {
        json: globals.json,
        yes: globals.yes,
        masked: globals.masked,
        on_collision,
        new_key,
    }
}

fn run_options(keep_partial: bool) -> RunOptions {
    RunOptions {
        rollback_on_failure: !keep_partial,
    }
}

// ---------------------------------------------------------------------------
// Dry-run rendering
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct DryRun<'a> {
    dry_run: bool,
    classification: Option<Classification>,
    instance: &'a ResourceInstance,
    plan: Vec<PlannedAction>,
}

fn show_dry_run(
    instance: &ResourceInstance,
    classification: Option<Classification>,
    plan: Vec<PlannedAction>,
    globals: &Globals,
) -> anyhow::Result<()> {
    if globals.json {
        return print_json(&DryRun {
            dry_run: true,
            classification,
            instance,
            plan,
        });
    }
    println!("Dry run, nothing will be changed.");
    println!();
    print_instance(instance, globals.masked);
    println!();
    match classification {
        Some(Classification::Collision) => {
            println!("{} is already COMPLETE; the run would ask how to resolve the collision.", instance.id());
        }
        _ => print_plan(&plan),
    }
    Ok(())
}

/// Plan for a replay of `existing`, or for a fresh create when absent/REMOVED.
fn replay_plan(
    fresh: &ResourceInstance,
    existing: Option<&ResourceInstance>,
) -> (Classification, Vec<PlannedAction>) {
    let classification = classify(existing);
    let plan = match (classification, existing) {
        (Classification::Resume, Some(inst)) => engine::plan_create(inst),
        (Classification::Collision, _) => Vec::new(),
        _ => engine::plan_create(fresh),
    };
    (classification, plan)
}

// ---------------------------------------------------------------------------
// Report rendering
// ---------------------------------------------------------------------------

fn show_report(root: &Path, report: &ReplayReport, globals: &Globals) -> anyhow::Result<()> {
    let saved = match &report.outcome {
        Some(outcome) => save_secrets(root, &[outcome])?,
        None => Vec::new(),
    };
    if globals.json {
        return print_json(report);
    }
    let summary = match &report.action {
        ReplayAction::Created => "created".to_string(),
        ReplayAction::Resumed => "resumed to completion".to_string(),
        ReplayAction::UsedExisting => "already COMPLETE, kept as is".to_string(),
        ReplayAction::Replaced => "deleted and recreated".to_string(),
        ReplayAction::Renamed { new_key } => format!("created alongside as {new_key}"),
        ReplayAction::Cancelled => "cancelled, nothing changed".to_string(),
    };
    println!("{}: {summary}", report.instance);
    if let Some(outcome) = &report.outcome {
        show_outcome(outcome);
    }
    for name in saved {
        println!("  secret written to .env as {name}");
    }
    Ok(())
}

fn show_outcome(outcome: &Outcome) {
    if !outcome.compensated.is_empty() {
        println!("  removed: {}", outcome.compensated.join(", "));
    }
    if !outcome.executed.is_empty() {
        println!("  ran:     {}", outcome.executed.join(", "));
    }
    println!("  status:  {}", outcome.instance.status);
}

fn require_instance(store: &ManifestStore, skill: &str, key: &str) -> anyhow::Result<ResourceInstance> {
    Ok(store.load()?.require(skill, key)?.clone())
}

// ---------------------------------------------------------------------------
// create
// ---------------------------------------------------------------------------

pub fn create(root: &Path, args: CreateArgs, globals: &Globals) -> anyhow::Result<()> {
    let cfg = load_config(root)?;
    let desc = descriptor::find(&args.skill)?;
    let store = ManifestStore::new(root);

    let input: BTreeMap<String, String> = args.set.into_iter().collect();
    let fields = desc
        .resolve_fields(&input, &naming_context(&cfg))
        .with_context(|| format!("cannot resolve fields for {}", desc.skill_id))?;

    let recorded = store.get_admin_role(desc.skill_id)?;
    let admin_role = match (args.admin_role.map(|r| r.trim().to_uppercase()), recorded) {
        (Some(requested), Some(existing)) if requested != existing => {
            return Err(SnowUtilsError::AdminRoleConflict {
                skill: desc.skill_id.to_string(),
                existing,
                requested,
            }
            .into())
        }
        (Some(requested), _) => Some(requested),
        (None, recorded) => recorded,
    };

    if args.dry_run {
        let fresh = desc.new_instance(fields, admin_role)?;
        let manifest = store.load()?;
        let existing = manifest.find(desc.skill_id, &fresh.instance_key);
        let (classification, plan) = replay_plan(&fresh, existing);
        return show_dry_run(existing.unwrap_or(&fresh), Some(classification), plan, globals);
    }

    let mut provider = provider(root, &cfg, globals);
    let mut op = operator(globals, Some(args.collision));
    let report = Controller::new(&store, &mut provider, &mut op, run_options(args.keep_partial))
        .provision(desc, fields, admin_role)?;
    show_report(root, &report, globals)
}

// ---------------------------------------------------------------------------
// delete / rotate
// ---------------------------------------------------------------------------

pub fn delete(root: &Path, args: InstanceArgs, globals: &Globals) -> anyhow::Result<()> {
    let (skill, key) = parse_instance(&args.instance)?;
    let store = ManifestStore::new(root);
    let inst = require_instance(&store, &skill, &key)?;
    let plan = engine::plan_delete(&inst)?;

    if args.dry_run {
        return show_dry_run(&inst, None, plan, globals);
    }
    let cfg = load_config(root)?;
    let mut op = operator(globals, None);
    if !op.confirm_preview(&inst, &plan)? {
        return cancelled(&inst.id(), globals);
    }

    let mut provider = provider(root, &cfg, globals);
    let outcome = Engine::new(&store, &mut provider).delete(&skill, &key)?;
    if globals.json {
        return print_json(&outcome);
    }
    println!("{}: removed", outcome.instance.id());
    show_outcome(&outcome);
    Ok(())
}

pub fn rotate(root: &Path, args: InstanceArgs, globals: &Globals) -> anyhow::Result<()> {
    let (skill, key) = parse_instance(&args.instance)?;
    let store = ManifestStore::new(root);
    let inst = require_instance(&store, &skill, &key)?;
    let plan = engine::plan_rotate(&inst)?;

    if args.dry_run {
        return show_dry_run(&inst, None, plan, globals);
    }
    let cfg = load_config(root)?;
    let mut op = operator(globals, None);
    if !op.confirm_preview(&inst, &plan)? {
        return cancelled(&inst.id(), globals);
    }

    let mut provider = provider(root, &cfg, globals);
    let outcome = Engine::new(&store, &mut provider).rotate(&skill, &key)?;
    let saved = save_secrets(root, &[&outcome])?;
    if globals.json {
        return print_json(&outcome);
    }
    println!("{}: rotated", outcome.instance.id());
    show_outcome(&outcome);
    for name in saved {
        println!("  secret written to .env as {name}");
    }
    Ok(())
}

fn cancelled(id: &str, globals: &Globals) -> anyhow::Result<()> {
    if globals.json {
        return print_json(&serde_json::json!({ "instance": id, "action": "cancelled" }));
    }
    println!("{id}: cancelled, nothing changed");
    Ok(())
}

// ---------------------------------------------------------------------------
// verify / describe
// ---------------------------------------------------------------------------

pub fn verify(root: &Path, args: InstanceArgs, globals: &Globals) -> anyhow::Result<()> {
    let (skill, key) = parse_instance(&args.instance)?;
    let cfg = load_config(root)?;
    let store = ManifestStore::new(root);
    let mut provider = provider(root, &cfg, globals);
    let result = Engine::new(&store, &mut provider).verify(&skill, &key, &cfg.verify, &ThreadSleeper)?;
    if globals.json {
        return print_json(&result);
    }
    if result.detail.is_empty() {
        println!("{skill}:{key}: verified");
    } else {
        println!("{skill}:{key}: verified ({})", result.detail);
    }
    Ok(())
}

pub fn describe(root: &Path, args: InstanceArgs, globals: &Globals) -> anyhow::Result<()> {
    let (skill, key) = parse_instance(&args.instance)?;
    let store = ManifestStore::new(root);
    let inst = require_instance(&store, &skill, &key)?;
    if globals.json {
        return print_json(&inst);
    }
    print_instance(&inst, globals.masked);
    Ok(())
}

// ---------------------------------------------------------------------------
// replay / resume / replay-all
// ---------------------------------------------------------------------------

pub fn replay(root: &Path, args: ReplayArgs, globals: &Globals) -> anyhow::Result<()> {
    let (skill, key) = parse_instance(&args.instance)?;
    let store = ManifestStore::new(root);

    if args.dry_run {
        let inst = require_instance(&store, &skill, &key)?;
        let desc = descriptor::find(&skill)?;
        let fresh = desc.new_instance(inst.fields.clone(), inst.admin_role.clone())?;
        let (classification, plan) = replay_plan(&fresh, Some(&inst));
        return show_dry_run(&inst, Some(classification), plan, globals);
    }

    let cfg = load_config(root)?;
    let mut provider = provider(root, &cfg, globals);
    let mut op = operator(globals, Some(args.collision));
    let report = Controller::new(&store, &mut provider, &mut op, run_options(args.keep_partial))
        .replay(&skill, &key)?;
    show_report(root, &report, globals)
}

pub fn resume(root: &Path, args: InstanceArgs, globals: &Globals) -> anyhow::Result<()> {
    let (skill, key) = parse_instance(&args.instance)?;
    let store = ManifestStore::new(root);

    if args.dry_run {
        let inst = require_instance(&store, &skill, &key)?;
        if inst.status != InstanceStatus::InProgress {
            return Err(SnowUtilsError::InvalidTransition {
                instance: inst.id(),
                from: inst.status.to_string(),
                to: InstanceStatus::Complete.to_string(),
                reason: "only IN_PROGRESS instances can be resumed".to_string(),
            }
            .into());
        }
        let plan = engine::plan_create(&inst);
        return show_dry_run(&inst, Some(Classification::Resume), plan, globals);
    }

    let cfg = load_config(root)?;
    let mut provider = provider(root, &cfg, globals);
    let mut op = operator(globals, None);
    let report = Controller::new(&store, &mut provider, &mut op, run_options(args.keep_partial))
        .resume(&skill, &key)?;
    show_report(root, &report, globals)
}

#[derive(Serialize)]
struct BatchPlan {
    dry_run: bool,
    instances: Vec<BatchPlanEntry>,
}

#[derive(Serialize)]
struct BatchPlanEntry {
    instance: String,
    status: InstanceStatus,
    plan: Vec<PlannedAction>,
}

pub fn replay_all(root: &Path, args: ReplayAllArgs, globals: &Globals) -> anyhow::Result<()> {
    let store = ManifestStore::new(root);

    if args.dry_run {
        let manifest = store.load()?;
        let entries: Vec<BatchPlanEntry> = manifest
            .by_creation()
            .into_iter()
            .map(|inst| BatchPlanEntry {
                instance: inst.id(),
                status: inst.status,
                plan: match inst.status {
                    InstanceStatus::Removed => engine::plan_create(inst),
                    _ => Vec::new(),
                },
            })
            .collect();
        if globals.json {
            return print_json(&BatchPlan {
                dry_run: true,
                instances: entries,
            });
        }
        println!("Dry run, nothing will be changed. Oldest first:");
        for (i, entry) in entries.iter().enumerate() {
            println!();
            println!("{}. {} [{}]", i + 1, entry.instance, entry.status);
            if entry.status == InstanceStatus::Removed {
                print_plan(&entry.plan);
            } else {
                println!("blocks replay-all: only REMOVED instances can be replayed in a batch");
            }
        }
        return Ok(());
    }

    let cfg = load_config(root)?;
    let mut provider = provider(root, &cfg, globals);
    let mut op = operator(globals, None);
    let report = Controller::new(&store, &mut provider, &mut op, run_options(args.keep_partial))
        .replay_all()?;
    let saved = save_secrets(root, &report.outcomes.iter().collect::<Vec<_>>())?;

    if globals.json {
        return print_json(&report);
    }
    println!("{} instance(s) replayed:", report.completed.len());
    for id in &report.completed {
        println!("  {id}");
    }
    if let Some(id) = &report.cancelled_at {
        println!("cancelled at {id}; later instances were not touched");
    }
    for name in saved {
        println!("  secret written to .env as {name}");
    }
    Ok(())
}
