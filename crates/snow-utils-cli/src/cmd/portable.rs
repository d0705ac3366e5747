use super::Globals;
use crate::operator::TerminalOperator;
use crate::output::{print_json, print_table};
use anyhow::{bail, Context};
use clap::Args;
use snow_utils_core::config::Config;
use snow_utils_core::portable::{self, AdaptChoice};
use snow_utils_core::{paths, store::ManifestStore};
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct ExportArgs {
    /// Identity prefix to tag for adaptation (default: the operator identity)
    #[arg(long)]
    identity: Option<String>,

    /// Print the portable manifest instead of writing it
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Portable manifest written by 'snow-utils export'
    file: PathBuf,

    /// Identity prefix to adapt tagged values to (default: the operator identity)
    #[arg(long, conflicts_with = "keep_originals")]
    adapt_to: Option<String>,

    /// Import tagged values unchanged
    #[arg(long)]
    keep_originals: bool,
}

/// Config if initialized, otherwise defaults so identity still comes from the environment.
fn config_or_default(root: &Path) -> Config {
    Config::load(root).unwrap_or_else(|_| Config::new(paths::project_name_from_root(root)))
}

pub fn export(root: &Path, args: ExportArgs, globals: &Globals) -> anyhow::Result<()> {
    let store = ManifestStore::new(root);
    let identity = args
        .identity
        .or_else(|| config_or_default(root).operator_identity());

    if args.dry_run {
        let manifest = store.load()?;
        let exported = portable::export(&manifest, identity.as_deref(), root)?;
        if globals.json {
            return print_json(&exported);
        }
        print!("{}", exported.render());
        return Ok(());
    }

    let (path, exported) = portable::export_to_file(&store, identity.as_deref())
        .context("export failed, no file was written")?;
    if globals.json {
        return print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "instances": exported.instances.len(),
            "adapt_markers": portable::detect_adapt_markers(&exported),
        }));
    }
    println!("Exported {} instance(s) to {}", exported.instances.len(), path.display());
    println!(
        "  {} value(s) tagged for adaptation; the receiver runs 'snow-utils import {}'",
        portable::detect_adapt_markers(&exported),
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );
    Ok(())
}

pub fn import(root: &Path, args: ImportArgs, globals: &Globals) -> anyhow::Result<()> {
    let store = ManifestStore::new(root);
    let file = if args.file.is_absolute() {
        args.file.clone()
    } else {
        std::env::current_dir()?.join(&args.file)
    };
    if !file.exists() {
        bail!("portable manifest not found: {}", file.display());
    }
    if store.exists() && file.canonicalize()? == store.path().canonicalize()? {
        bail!(
            "{} is the canonical manifest; import takes a file written by 'snow-utils export'",
            file.display()
        );
    }

    let new_identity = if args.keep_originals {
        None
    } else {
        args.adapt_to
            .or_else(|| config_or_default(root).operator_identity())
    };

    let mut op = TerminalOperator {
        json: globals.json,
        yes: globals.yes,
        masked: globals.masked,
        on_collision: None,
        new_key: None,
    };
    let report = portable::import(&store, &file, new_identity.as_deref(), &mut op)
        .with_context(|| format!("cannot import {}", file.display()))?;

    if globals.json {
        return print_json(&report);
    }
    println!("Imported {} instance(s) into {}", report.imported, paths::MANIFEST_FILE);
    match report.choice {
        AdaptChoice::Apply => {
            println!("  adapted {} value(s):", report.rows.len());
            print_table(
                &["INSTANCE", "FIELD", "VALUE"],
                report
                    .rows
                    .iter()
                    .map(|r| vec![r.instance.clone(), r.field.clone(), r.adapted.clone()])
                    .collect(),
            );
        }
        AdaptChoice::KeepOriginals if report.markers > 0 => {
            println!("  kept {} tagged value(s) unchanged", report.markers);
        }
        _ => {}
    }
    println!("Run 'snow-utils replay-all' to recreate the resources.");
    Ok(())
}
