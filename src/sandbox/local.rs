//! Local process backend
//!
//! Runs toolchains directly on the host inside a per-context temp directory that
//! stands in for `/tmp`. Gives NO isolation; meant for development and tests.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    read_limited, relative_to_work_dir, CommandOutput, CommandSpec, NetworkPolicy, Sandbox,
    SandboxProvider, SandboxSpec, SANDBOX_WORK_DIR,
};

/// Creates temp-directory contexts
pub struct LocalProvider {
    max_capture_bytes: usize,
}

impl LocalProvider {
    pub fn new(max_capture_bytes: usize) -> Self {
        warn!("Local sandbox backend selected: submitted code runs unisolated with network access");
        Self { max_capture_bytes }
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<Arc<dyn Sandbox>> {
        if spec.network == NetworkPolicy::Disabled {
            debug!("Local backend cannot block network access; continuing");
        }
        let sandbox = LocalSandbox::new(spec.lifetime, self.max_capture_bytes)?;
        Ok(Arc::new(sandbox))
    }
}

pub struct LocalSandbox {
    root: PathBuf,
    /// Dropped (and removed from disk) on terminate
    dir: Mutex<Option<TempDir>>,
    lifetime: Duration,
    created_at: Instant,
    max_capture_bytes: usize,
}

impl LocalSandbox {
    pub fn new(lifetime: Duration, max_capture_bytes: usize) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("executor-")
            .tempdir()
            .context("Failed to create sandbox directory")?;
        Ok(Self {
            root: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
            lifetime,
            created_at: Instant::now(),
            max_capture_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rewrite an in-sandbox path argument to its host location
    fn map_arg(&self, arg: &str) -> String {
        if arg == SANDBOX_WORK_DIR {
            return self.root.to_string_lossy().into_owned();
        }
        match relative_to_work_dir(arg) {
            Ok(relative) => self.root.join(relative).to_string_lossy().into_owned(),
            Err(_) => arg.to_string(),
        }
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        if self.dir.lock().await.is_none() {
            anyhow::bail!("sandbox already terminated");
        }
        let dest = self.root.join(relative_to_work_dir(path)?);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, contents)
            .await
            .with_context(|| format!("Failed to write {}", path))
    }

    async fn execute(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
        if self.dir.lock().await.is_none() {
            anyhow::bail!("sandbox already terminated");
        }
        let remaining = self
            .lifetime
            .checked_sub(self.created_at.elapsed())
            .filter(|left| !left.is_zero())
            .ok_or_else(|| anyhow::anyhow!("sandbox lifetime timed out"))?;
        let timeout = timeout.min(remaining);

        let args: Vec<String> = command.args.iter().map(|a| self.map_arg(a)).collect();
        debug!("Running local command: {} {:?}", command.program, args);

        let mut cmd = Command::new(self.map_arg(&command.program));
        cmd.args(&args)
            .current_dir(&self.root)
            .env("HOME", &self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", command.program))?;
        let pid = child.id();

        let stdout = child.stdout.take().context("missing stdout pipe")?;
        let stderr = child.stderr.take().context("missing stderr pipe")?;
        let limit = self.max_capture_bytes;
        let stdout_task = tokio::spawn(async move { read_limited(stdout, limit).await });
        let stderr_task = tokio::spawn(async move { read_limited(stderr, limit).await });

        let waited = tokio::time::timeout(timeout, child.wait()).await;

        // Grandchildren share the group and would keep the pipes open
        if let Some(pid) = pid {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }

        let status = match waited {
            Ok(status) => status.context("Failed to wait for command")?,
            Err(_) => {
                let _ = child.kill().await;
                anyhow::bail!("command timed out after {:?}", timeout);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
        })
    }

    async fn terminate(&self) -> Result<()> {
        if let Some(dir) = self.dir.lock().await.take() {
            dir.close().context("Failed to remove sandbox directory")?;
        }
        Ok(())
    }
}
