use super::load_config;
use crate::output::print_json;
use clap::Subcommand;
use snow_utils_core::config::WarnLevel;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let identity = config.operator_identity();
    if json {
        return print_json(&serde_json::json!({
            "config": config,
            "operator_identity": identity,
        }));
    }
    println!("project:   {}", config.project.name);
    println!("identity:  {}", identity.as_deref().unwrap_or("(unknown)"));
    let mut provider = config.provider.command.clone();
    for arg in &config.provider.args {
        provider.push(' ');
        provider.push_str(arg);
    }
    println!("provider:  {provider}");
    println!(
        "verify:    {} attempt(s), {} ms initial delay, {} ms cap, x{}",
        config.verify.max_attempts,
        config.verify.initial_delay_ms,
        config.verify.max_delay_ms,
        config.verify.backoff_factor
    );
    Ok(())
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
