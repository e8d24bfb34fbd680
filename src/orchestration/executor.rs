//! Task executor: the external command that performs one migration.
//!
//! The command is opaque to ferry. It receives the task's identity through
//! argument templates, and everything it prints to stdout or stderr is
//! appended to the task's log file, which the tailer streams.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::{Child, Command};

use crate::core::TaskIdentity;
use crate::error::{Error, Result};
use crate::flog_debug;

/// Launches one external process per task.
///
/// Implementations must not wait for the process: the dispatcher polls the
/// returned child. On unix the child should lead its own process group, so
/// that [`terminate`] also stops its descendants.
pub trait TaskExecutor: Send + Sync {
    fn launch(&self, task: &TaskIdentity, log_path: &Path) -> Result<Child>;
}

/// Program and argument templates for the migration command.
///
/// Arguments may reference `{source_org}`, `{source_project}`,
/// `{source_repo}`, `{target_org}`, `{target_repo}`, `{visibility}` and
/// `{log_path}`. Unknown placeholders are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let args = [
            "ado2gh",
            "migrate-repo",
            "--ado-org",
            "{source_org}",
            "--ado-team-project",
            "{source_project}",
            "--ado-repo",
            "{source_repo}",
            "--github-org",
            "{target_org}",
            "--github-repo",
            "{target_repo}",
            "--target-repo-visibility",
            "{visibility}",
        ];
        Self {
            program: "gh".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Matches `{name}` placeholders in argument templates.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"));

/// Expand identity placeholders in one argument template.
pub fn expand_template(template: &str, task: &TaskIdentity, log_path: &Path) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            match &caps[1] {
                "source_org" => task.source_org.clone(),
                "source_project" => task.source_project.clone(),
                "source_repo" => task.source_repo.clone(),
                "target_org" => task.target_org.clone(),
                "target_repo" => task.target_repo.clone(),
                "visibility" => task.visibility.to_string(),
                "log_path" => log_path.display().to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Runs `ExecutorConfig` as a child process with output redirected to the log.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// The fully expanded argument list for a task.
    pub fn args_for(&self, task: &TaskIdentity, log_path: &Path) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|a| expand_template(a, task, log_path))
            .collect()
    }
}

impl TaskExecutor for CommandExecutor {
    fn launch(&self, task: &TaskIdentity, log_path: &Path) -> Result<Child> {
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| {
                Error::Launch(format!("cannot open log {}: {}", log_path.display(), e))
            })?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| Error::Launch(format!("cannot share log handle: {}", e)))?;

        let args = self.args_for(task, log_path);
        flog_debug!(
            "launch {} {:?} -> {}",
            self.config.program,
            args,
            log_path.display()
        );

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        // The child leads its own process group so `terminate` reaches
        // everything it spawns.
        #[cfg(unix)]
        command.process_group(0);

        command
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {}", self.config.program, e)))
    }
}

/// Kill a launched task together with every process it started, then reap it.
pub async fn terminate(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: killpg only sends a signal; pid is our own unreaped child.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                flog_debug!("killpg {} failed: {}", pid, err);
            }
        }
    }
    child.kill().await
}
