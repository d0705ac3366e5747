use super::Globals;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use snow_utils_core::store::ManifestStore;
use snow_utils_core::types::InstanceStatus;
use std::path::Path;

#[derive(Subcommand)]
pub enum ManifestSubcommand {
    /// Print the manifest file as stored
    Show,

    /// List recorded instances, oldest first
    List {
        /// Only instances in this status (IN_PROGRESS, COMPLETE, REMOVED)
        #[arg(long)]
        status: Option<InstanceStatus>,
    },

    /// Print the canonical manifest path
    Path,
}

pub fn run(root: &Path, subcmd: ManifestSubcommand, globals: &Globals) -> anyhow::Result<()> {
    let store = ManifestStore::new(root);
    match subcmd {
        ManifestSubcommand::Show => show(&store, globals.json),
        ManifestSubcommand::List { status } => list(&store, status, globals.json),
        ManifestSubcommand::Path => {
            let path = store.path();
            if globals.json {
                return print_json(&serde_json::json!({
                    "path": path.display().to_string(),
                    "exists": path.exists(),
                }));
            }
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn show(store: &ManifestStore, json: bool) -> anyhow::Result<()> {
    let manifest = store.load()?;
    if json {
        return print_json(&manifest);
    }
    if !store.exists() {
        println!("No manifest yet at {}.", store.path().display());
        return Ok(());
    }
    print!("{}", manifest.render());
    Ok(())
}

fn list(store: &ManifestStore, status: Option<InstanceStatus>, json: bool) -> anyhow::Result<()> {
    let manifest = store.load()?;
    let instances: Vec<_> = manifest
        .by_creation()
        .into_iter()
        .filter(|i| status.map_or(true, |s| i.status == s))
        .collect();

    if json {
        return print_json(&instances);
    }
    if instances.is_empty() {
        println!("No instances.");
        return Ok(());
    }
    let rows = instances
        .iter()
        .map(|i| {
            vec![
                i.id(),
                i.status.to_string(),
                format!("{}/{}", i.done_count(), i.steps.len()),
                i.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(&["INSTANCE", "STATUS", "STEPS", "CREATED"], rows);
    Ok(())
}
