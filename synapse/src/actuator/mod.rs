//! Operation Actuator
//!
//! Validates and executes the bounded set of side-effecting operations
//! against a sandboxed set of root directories. Operations are applied in
//! order; the allow-list path check runs before any filesystem mutation; the
//! first rejection aborts the remaining list and names the offending
//! operation. Successfully applied operations are reported individually so
//! receipts stay accurate under partial failure. Once a list has started,
//! no cancellation reaches the actuator mid-list: it either completes or
//! reports the point of failure.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::errors::ActuatorError;
use crate::types::{Operation, OperationRecord};

const STDOUT_SNIPPET_CHARS: usize = 400;

/// Outcome of an `apply` call that stopped early: everything applied so far
/// plus the error at the point of failure.
#[derive(Debug)]
pub struct ActuatorFailure {
    pub applied: Vec<OperationRecord>,
    pub error: ActuatorError,
}

/// Sandboxed operation executor. The allow-list is fixed at construction
/// and never altered at runtime.
#[derive(Debug)]
pub struct Actuator {
    roots: Vec<PathBuf>,
    strict: bool,
    exec_timeout: Duration,
}

impl Actuator {
    pub fn new(config: &SandboxConfig) -> Result<Self, ActuatorError> {
        let mut roots = Vec::with_capacity(config.roots.len());
        for root in &config.roots {
            std::fs::create_dir_all(root).map_err(|e| ActuatorError::RootUnavailable {
                path: root.display().to_string(),
                source: e,
            })?;
            let canonical =
                std::fs::canonicalize(root).map_err(|e| ActuatorError::RootUnavailable {
                    path: root.display().to_string(),
                    source: e,
                })?;
            roots.push(canonical);
        }
        Ok(Self {
            roots,
            strict: config.strict,
            exec_timeout: Duration::from_millis(config.exec_timeout_ms),
        })
    }

    /// First allow-listed root: working directory for exec operations and
    /// base for relative paths.
    pub fn primary_root(&self) -> &Path {
        &self.roots[0]
    }

    /// Apply operations in order. On failure, returns everything applied
    /// before the failing operation together with the cause.
    pub async fn apply(
        &self,
        operations: &[Operation],
    ) -> Result<Vec<OperationRecord>, ActuatorFailure> {
        let mut applied = Vec::with_capacity(operations.len());
        for (index, op) in operations.iter().enumerate() {
            match self.apply_one(index, op).await {
                Ok(record) => applied.push(record),
                Err(error) => {
                    warn!(index, kind = op.kind(), %error, "operation aborted list");
                    return Err(ActuatorFailure { applied, error });
                }
            }
        }
        Ok(applied)
    }

    async fn apply_one(&self, index: usize, op: &Operation) -> Result<OperationRecord, ActuatorError> {
        match op {
            Operation::Write { path, content } => {
                let resolved = self.resolve_path(index, path)?;
                if let Some(parent) = resolved.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| ActuatorError::Io { index, source: e })?;
                }
                tokio::fs::write(&resolved, content)
                    .await
                    .map_err(|e| ActuatorError::Io { index, source: e })?;
                debug!(index, path = %resolved.display(), bytes = content.len(), "write applied");
                Ok(OperationRecord {
                    index,
                    kind: "write".to_string(),
                    detail: format!("wrote {} bytes to {}", content.len(), resolved.display()),
                })
            }
            Operation::Exec { command, args } => self.exec(index, command, args).await,
        }
    }

    async fn exec(
        &self,
        index: usize,
        command: &str,
        args: &[String],
    ) -> Result<OperationRecord, ActuatorError> {
        if command.trim().is_empty() {
            return Err(ActuatorError::BlockedCommand {
                index,
                reason: "empty command".to_string(),
            });
        }
        if self.strict {
            if let Some(capability) = detect_capability(command, args) {
                return Err(ActuatorError::BlockedCommand {
                    index,
                    reason: format!("capability gate: {}", capability),
                });
            }
        }
        // A command spelled as a path is subject to the same allow-list as a
        // write target; bare program names resolve via PATH.
        let program: PathBuf = if command.contains('/') || command.contains('\\') {
            self.resolve_path(index, command)?
        } else {
            PathBuf::from(command)
        };

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .current_dir(self.primary_root())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout_ms = self.exec_timeout.as_millis() as u64;
        let output = match timeout(self.exec_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| ActuatorError::Io { index, source: e })?,
            Err(_) => {
                return Err(ActuatorError::Timeout { index, timeout_ms });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(ActuatorError::ExecFailed {
                index,
                detail: format!(
                    "{} exited with {}: {}",
                    command,
                    output.status,
                    snippet(&stderr)
                ),
            });
        }
        debug!(index, %command, stdout_bytes = output.stdout.len(), "exec applied");
        Ok(OperationRecord {
            index,
            kind: "exec".to_string(),
            detail: format!("{} ok: {}", command, snippet(&stdout)),
        })
    }

    /// Validate and resolve a caller-supplied path into the sandbox.
    fn resolve_path(&self, index: usize, raw: &str) -> Result<PathBuf, ActuatorError> {
        if raw.trim().is_empty() {
            return Err(ActuatorError::UnsafePath {
                index,
                reason: "empty path".to_string(),
            });
        }
        if raw.chars().any(|c| c.is_control()) {
            return Err(ActuatorError::UnsafePath {
                index,
                reason: "control characters in path".to_string(),
            });
        }
        let input = PathBuf::from(raw);
        if input.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ActuatorError::PathOutsideSandbox {
                index,
                path: raw.to_string(),
            });
        }
        let resolved = if input.is_absolute() {
            input
        } else {
            self.primary_root().join(input)
        };
        let canonical = canonicalize_for_create(&resolved).ok_or_else(|| {
            ActuatorError::PathOutsideSandbox {
                index,
                path: raw.to_string(),
            }
        })?;
        if !self.roots.iter().any(|root| canonical.starts_with(root)) {
            return Err(ActuatorError::PathOutsideSandbox {
                index,
                path: raw.to_string(),
            });
        }
        Ok(canonical)
    }
}

/// Canonicalize through the nearest existing ancestor so paths that do not
/// exist yet still normalize (symlinks included) before the containment
/// check.
fn canonicalize_for_create(resolved: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = std::fs::canonicalize(resolved) {
        return Some(canonical);
    }

    let mut missing: Vec<&std::ffi::OsStr> = Vec::new();
    if let Some(name) = resolved.file_name() {
        missing.push(name);
    }
    let mut ancestor = resolved.parent();
    while let Some(current) = ancestor {
        if current.exists() {
            break;
        }
        if let Some(name) = current.file_name() {
            missing.push(name);
        }
        ancestor = current.parent();
    }

    let base = std::fs::canonicalize(ancestor?).ok()?;
    let mut out = base;
    for part in missing.into_iter().rev() {
        out = out.join(part);
    }
    Some(out)
}

/// Heuristic screen for commands that reach outside the sandbox's concerns.
fn detect_capability(command: &str, args: &[String]) -> Option<&'static str> {
    let mut line = command.to_lowercase();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_lowercase());
    }
    if line.contains("curl") || line.contains("wget") {
        return Some("network");
    }
    if line.contains("rm -rf") || line.starts_with("rm") || line.contains(" mv ") {
        return Some("file_write");
    }
    if line.contains("git push") || line.contains("gh release") {
        return Some("identity");
    }
    if line.contains("sudo") || line.contains("npm install -g") || line.contains("brew install") {
        return Some("global_install");
    }
    None
}

fn snippet(text: &str) -> String {
    let one_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.chars().count() <= STDOUT_SNIPPET_CHARS {
        one_line
    } else {
        let mut out: String = one_line.chars().take(STDOUT_SNIPPET_CHARS).collect();
        out.push('…');
        out
    }
}
