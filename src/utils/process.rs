// dbbackup/src/utils/process.rs
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use which::which;

use crate::errors::{BackupError, Result};

static URI_CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://([^:/@]+):[^@/]*@").expect("static regex is valid"));

/// Replaces the password part of any connection URI in `text` with `***`.
pub fn redact_credentials(text: &str) -> String {
    URI_CREDENTIALS.replace_all(text, "://$1:***@").into_owned()
}

/// One external program call: the program name (resolved through `PATH`) and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        ToolInvocation {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Value of a `--flag=value` argument, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let prefix = format!("{}=", flag);
        self.args.iter().find_map(|a| a.strip_prefix(prefix.as_str()))
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Command line suitable for logs, with credentials masked.
    pub fn display_redacted(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&redact_credentials(arg));
        }
        line
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success() -> Self {
        ToolOutput {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Launches external tools. The dump and restore engines only talk to the
/// outside world through this trait.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation, timeout: Option<Duration>) -> Result<ToolOutput>;
}

/// Finds an executable in the system PATH (or checks an explicit path).
pub fn find_executable(program: &str) -> Result<PathBuf> {
    which(program).map_err(|_| BackupError::ToolNotFound {
        tool: program.to_string(),
    })
}

/// Runs tools as child processes of this one.
#[derive(Debug, Default, Clone)]
pub struct SystemToolRunner;

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, invocation: &ToolInvocation, timeout: Option<Duration>) -> Result<ToolOutput> {
        let program_path = find_executable(&invocation.program)?;
        debug!(
            "Executing {} (resolved to {})",
            invocation.display_redacted(),
            program_path.display()
        );

        let child = Command::new(&program_path)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => BackupError::ToolNotFound {
                    tool: invocation.program.clone(),
                },
                _ => BackupError::filesystem(&program_path, e),
            })?;

        // Dropping the pending wait kills the child (kill_on_drop).
        let wait = child.wait_with_output();
        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "{} exceeded the {}s limit; terminating it",
                        invocation.program,
                        limit.as_secs()
                    );
                    return Err(BackupError::TimedOut {
                        tool: invocation.program.clone(),
                        timeout: limit,
                    });
                }
            },
            None => wait.await,
        }
        .map_err(|e| BackupError::filesystem(&program_path, e))?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
