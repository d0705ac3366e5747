pub mod admin_role;
pub mod config;
pub mod init;
pub mod manifest;
pub mod portable;
pub mod resource;
pub mod skills;

use anyhow::{bail, Context};
use snow_utils_core::config::Config;
use snow_utils_core::descriptor::NamingContext;
use snow_utils_core::engine::Outcome;
use snow_utils_core::external::CommandProvider;
use snow_utils_core::io;
use std::collections::BTreeMap;
use std::path::Path;

/// Flags shared by every command.
pub struct Globals {
    pub json: bool,
    pub yes: bool,
    pub masked: bool,
    pub provider: Option<String>,
}

/// Split `skill:KEY` into its parts.
pub fn parse_instance(id: &str) -> anyhow::Result<(String, String)> {
    match id.split_once(':') {
        Some((skill, key)) if !skill.is_empty() && !key.is_empty() => {
            Ok((skill.to_string(), key.to_string()))
        }
        _ => bail!("invalid instance '{id}': expected <skill>:<KEY>, e.g. pat:ALICE_DEMO_RUNNER"),
    }
}

/// Parse `name=value` for `--set`.
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

pub fn load_config(root: &Path) -> anyhow::Result<Config> {
    Config::load(root).with_context(|| format!("cannot load config under {}", root.display()))
}

pub fn provider(root: &Path, cfg: &Config, globals: &Globals) -> CommandProvider {
    match &globals.provider {
        Some(command) => CommandProvider::new(command.clone(), Vec::new(), root),
        None => CommandProvider::from_config(&cfg.provider, root),
    }
}

pub fn naming_context(cfg: &Config) -> NamingContext {
    NamingContext {
        prefix: cfg.operator_identity(),
        project: cfg.project.name.clone(),
    }
}

/// Write secrets handed back by the provider to `<root>/.env`.
///
/// Variables are named `<INSTANCE_KEY>_<FIELD>`. Existing variables with the
/// same name are replaced. Returns the variable names written.
pub fn save_secrets(root: &Path, outcomes: &[&Outcome]) -> anyhow::Result<Vec<String>> {
    let mut vars: BTreeMap<String, String> = BTreeMap::new();
    for outcome in outcomes {
        for (field, value) in &outcome.secrets {
            let name = format!("{}_{}", outcome.instance.instance_key, field)
                .to_uppercase()
                .replace('-', "_");
            vars.insert(name, value.clone());
        }
    }
    if vars.is_empty() {
        return Ok(Vec::new());
    }

    let path = root.join(".env");
    let existing = if path.exists() {
        std::fs::read_to_string(&path).with_context(|| format!("cannot read {}", path.display()))?
    } else {
        String::new()
    };
    let mut out = String::new();
    for line in existing.lines() {
        let replaced = line
            .split_once('=')
            .is_some_and(|(k, _)| vars.contains_key(k.trim()));
        if !replaced {
            out.push_str(line);
            out.push('\n');
        }
    }
    for (k, v) in &vars {
        out.push_str(&format!("{k}={v}\n"));
    }

    io::atomic_write(&path, out.as_bytes()).context("cannot write .env")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    io::ensure_gitignore_entry(root, ".env")?;
    Ok(vars.into_keys().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use snow_utils_core::manifest::ResourceInstance;
    use snow_utils_core::types::InstanceStatus;
    use tempfile::TempDir;

    #[test]
    fn instance_ids_need_both_halves() {
        assert_eq!(
            parse_instance("pat:ALICE_RUNNER").unwrap(),
            ("pat".to_string(), "ALICE_RUNNER".to_string())
        );
        assert!(parse_instance("pat").is_err());
        assert!(parse_instance(":KEY").is_err());
        assert!(parse_instance("pat:").is_err());
    }

    #[test]
    fn assignments_split_on_first_equals() {
        assert_eq!(
            parse_assignment("values=10.0.0.0/8").unwrap(),
            ("values".to_string(), "10.0.0.0/8".to_string())
        );
        assert_eq!(parse_assignment("a=b=c").unwrap().1, "b=c");
        assert!(parse_assignment("novalue").is_err());
    }

    #[test]
    fn secrets_replace_existing_env_lines() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "OTHER=1\nALICE_RUNNER_PAT_TOKEN=old\n").unwrap();
        let outcome = Outcome {
            instance: ResourceInstance {
                skill_id: "pat".to_string(),
                instance_key: "ALICE_RUNNER".to_string(),
                fields: Vec::new(),
                steps: Vec::new(),
                status: InstanceStatus::Complete,
                created_at: Utc::now(),
                removed_at: None,
                admin_role: None,
            },
            executed: Vec::new(),
            compensated: Vec::new(),
            secrets: BTreeMap::from([("pat_token".to_string(), "new".to_string())]),
        };
        let names = save_secrets(dir.path(), &[&outcome]).unwrap();
        assert_eq!(names, vec!["ALICE_RUNNER_PAT_TOKEN".to_string()]);

        let env = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(env, "OTHER=1\nALICE_RUNNER_PAT_TOKEN=new\n");
        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(gitignore.lines().any(|l| l == ".env"));
    }
}
