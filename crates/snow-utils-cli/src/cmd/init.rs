use crate::output::print_json;
use anyhow::Context;
use snow_utils_core::{config::Config, io, naming, paths};
use std::path::Path;

pub fn run(root: &Path, identity: Option<&str>, json: bool) -> anyhow::Result<()> {
    let dir = paths::snow_utils_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config_path = paths::config_path(root);
    let created = !config_path.exists();
    if created {
        let mut cfg = Config::new(paths::project_name_from_root(root));
        cfg.identity.prefix = identity
            .map(naming::identity_prefix)
            .filter(|p| !p.is_empty());
        cfg.save(root).context("failed to write config.yaml")?;
    }

    io::ensure_gitignore_entry(root, paths::LOCK_FILE).context("failed to update .gitignore")?;

    if json {
        return print_json(&serde_json::json!({
            "root": root.display().to_string(),
            "config": paths::CONFIG_FILE,
            "created": created,
        }));
    }
    println!("Initializing snow-utils in: {}", root.display());
    if created {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }
    println!("  ignored: {}", paths::LOCK_FILE);
    println!();
    println!("Set provider.command in {} to the tool that talks to Snowflake and AWS.", paths::CONFIG_FILE);
    Ok(())
}
