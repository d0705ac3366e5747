//! [`Provider`] backed by an external executable.
//!
//! Invocation: `<command> [args..] execute <skill> <step>`,
//! `compensate <skill> <step>` or `verify <skill> <key>`. The request is
//! JSON on stdin, the answer JSON on stdout. A non-zero exit is a failure
//! whose message is the trimmed stderr.

use crate::config::ProviderConfig;
use crate::error::{Result, SnowUtilsError};
use crate::manifest::ResourceInstance;
use crate::provider::{Provider, StepRequest, StepResult, VerifyResult};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

pub struct CommandProvider {
    command: String,
    args: Vec<String>,
    root: PathBuf,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>, root: &Path) -> Self {
        Self {
            command: command.into(),
            args,
            root: root.to_path_buf(),
        }
    }

    pub fn from_config(cfg: &ProviderConfig, root: &Path) -> Self {
        Self::new(cfg.command.clone(), cfg.args.clone(), root)
    }

    fn invoke(&self, verb: &str, target: [&str; 2], stdin_json: &str) -> Result<String> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        cmd.arg(verb).args(target);
        cmd.env("SNOW_UTILS_ROOT", &self.root);
        cmd.current_dir(&self.root);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!(command = %self.command, verb, skill = target[0], target = target[1], "invoking provider");
        let mut child = cmd.spawn().map_err(|e| {
            SnowUtilsError::Provider(format!(
                "cannot run provider '{}': {e}; set provider.command in .snow-utils/config.yaml or pass --provider",
                self.command
            ))
        })?;

        // A provider may exit without reading its input; the exit status decides.
        let writer = child.stdin.take().map(|mut stdin| {
            let body = stdin_json.to_string();
            std::thread::spawn(move || match stdin.write_all(body.as_bytes()) {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            })
        });

        let output = child
            .wait_with_output()
            .map_err(|e| SnowUtilsError::Provider(e.to_string()))?;
        match writer.map(|w| w.join()) {
            Some(Ok(Err(e))) => warn!(command = %self.command, error = %e, "provider stdin not fully written"),
            Some(Err(_)) => warn!(command = %self.command, "provider stdin writer panicked"),
            _ => {}
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let cause = if stderr.is_empty() {
                format!("provider exited with {}", output.status)
            } else {
                stderr
            };
            return Err(SnowUtilsError::Provider(cause));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Empty stdout means "nothing to report".
fn parse_or_default<T: serde::de::DeserializeOwned + Default>(stdout: &str) -> Result<T> {
    if stdout.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(stdout.trim())?)
}

impl Provider for CommandProvider {
    fn execute_step(&mut self, request: &StepRequest) -> Result<StepResult> {
        let body = serde_json::to_string(request)?;
        let stdout = self.invoke("execute", [&request.skill_id, &request.step_name], &body)?;
        let mut result: StepResult = parse_or_default(&stdout)?;
        if result.raw_output.is_empty() {
            result.raw_output = stdout;
        }
        Ok(result)
    }

    fn compensate_step(&mut self, request: &StepRequest) -> Result<()> {
        let body = serde_json::to_string(request)?;
        self.invoke("compensate", [&request.skill_id, &request.step_name], &body)?;
        Ok(())
    }

    fn verify(&mut self, instance: &ResourceInstance) -> Result<VerifyResult> {
        let body = serde_json::to_string(instance)?;
        let stdout = self.invoke("verify", [&instance.skill_id, &instance.instance_key], &body)?;
        if stdout.trim().is_empty() {
            return Ok(VerifyResult {
                ok: true,
                detail: String::new(),
            });
        }
        Ok(serde_json::from_str(stdout.trim())?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::StepAction;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const SCRIPT: &str = r#"#!/bin/sh
verb="$1"; skill="$2"; target="$3"
input=$(cat)
case "$verb" in
  execute)
    if [ "$target" = "broken" ]; then
      echo "  quota exceeded for $skill  " >&2
      exit 3
    fi
    printf '{"identifiers":{"%s_id":"42"}}' "$target"
    ;;
  compensate)
    echo "$input" > "$SNOW_UTILS_ROOT/compensated.json"
    ;;
  verify)
    printf '{"ok":false,"detail":"%s not propagated"}' "$target"
    ;;
esac
"#;

    fn provider(dir: &TempDir) -> CommandProvider {
        let script = dir.path().join("provider.sh");
        std::fs::write(&script, SCRIPT).unwrap();
        CommandProvider::new("sh", vec![script.display().to_string()], dir.path())
    }

    fn request(step: &str, action: StepAction) -> StepRequest {
        StepRequest {
            skill_id: "networks".to_string(),
            instance_key: "ALICE_RULE".to_string(),
            step_name: step.to_string(),
            kind: "NETWORK RULE".to_string(),
            action,
            fields: BTreeMap::from([("rule_name".to_string(), "ALICE_RULE".to_string())]),
        }
    }

    #[test]
    fn execute_reads_identifiers_from_stdout() {
        let dir = TempDir::new().unwrap();
        let mut p = provider(&dir);
        let result = p.execute_step(&request("network_rule", StepAction::Create)).unwrap();
        assert_eq!(
            result.identifiers.get("network_rule_id").map(String::as_str),
            Some("42")
        );
        assert!(result.raw_output.contains("identifiers"));
    }

    #[test]
    fn non_zero_exit_reports_trimmed_stderr() {
        let dir = TempDir::new().unwrap();
        let mut p = provider(&dir);
        let err = p.execute_step(&request("broken", StepAction::Create)).unwrap_err();
        assert_eq!(err.to_string(), "provider error: quota exceeded for networks");
    }

    #[test]
    fn compensate_receives_request_on_stdin() {
        let dir = TempDir::new().unwrap();
        let mut p = provider(&dir);
        p.compensate_step(&request("network_rule", StepAction::Compensate))
            .unwrap();
        let sent = std::fs::read_to_string(dir.path().join("compensated.json")).unwrap();
        assert!(sent.contains("\"step_name\":\"network_rule\""));
        assert!(sent.contains("\"action\":\"compensate\""));
    }

    #[test]
    fn verify_parses_result() {
        let dir = TempDir::new().unwrap();
        let mut p = provider(&dir);
        let inst = ResourceInstance {
            skill_id: "networks".to_string(),
            instance_key: "ALICE_RULE".to_string(),
            fields: Vec::new(),
            steps: Vec::new(),
            status: crate::types::InstanceStatus::Complete,
            created_at: chrono::Utc::now(),
            removed_at: None,
            admin_role: None,
        };
        let result = p.verify(&inst).unwrap();
        assert!(!result.ok);
        assert_eq!(result.detail, "ALICE_RULE not propagated");
    }

    #[test]
    fn provider_that_ignores_stdin_succeeds_on_exit_zero() {
        let dir = TempDir::new().unwrap();
        let mut p = CommandProvider::new(
            "sh",
            vec!["-c".to_string(), r#"printf '{"identifiers":{"rule_id":"7"}}'"#.to_string()],
            dir.path(),
        );
        let mut req = request("network_rule", StepAction::Create);
        req.fields.insert("values".to_string(), "x".repeat(4 * 1024 * 1024));
        let result = p.execute_step(&req).unwrap();
        assert_eq!(result.identifiers.get("rule_id").map(String::as_str), Some("7"));
    }

    #[test]
    fn missing_command_is_a_provider_error() {
        let dir = TempDir::new().unwrap();
        let mut p = CommandProvider::new("snow-utils-no-such-provider", Vec::new(), dir.path());
        let err = p.execute_step(&request("network_rule", StepAction::Create)).unwrap_err();
        assert!(err.to_string().contains("cannot run provider"));
    }
}
