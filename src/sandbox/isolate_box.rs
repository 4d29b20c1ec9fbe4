//! Isolate box management
//!
//! Wraps the isolate sandbox (https://github.com/ioi/isolate) as a [`Sandbox`].
//! Each context owns one box; the box directory is bound to `/tmp` inside the
//! sandbox so files written there persist across commands of the same request.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use super::config::{next_box_id, SandboxConfig};
use super::meta::{parse_meta, IsolateStatus};
use super::{
    read_limited, relative_to_work_dir, CommandOutput, CommandSpec, NetworkPolicy, Sandbox,
    SandboxProvider, SandboxSpec, SANDBOX_WORK_DIR,
};

/// Box ID used for the startup probe, outside any per-process range offset
const PROBE_BOX_ID: u32 = 9999;

/// Extra time granted to the isolate process itself beyond the wall limit
const ISOLATE_GRACE: Duration = Duration::from_secs(2);

/// Directories searched when resolving bare program names
const PROGRAM_DIRS: [&str; 3] = ["/usr/local/bin", "/usr/bin", "/bin"];

/// Creates isolate-backed sandbox contexts
pub struct IsolateProvider {
    config: SandboxConfig,
}

impl IsolateProvider {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Probe that isolate works with the configured cgroup mode; fail fast otherwise
    pub async fn ensure_available(&self) -> Result<()> {
        let box_id = PROBE_BOX_ID.to_string();
        let mut args = vec!["--box-id", box_id.as_str()];
        if self.config.use_cgroups {
            args.push("--cg");
        }
        args.push("--init");

        let probe = Command::new(&self.config.isolate_bin)
            .args(&args)
            .output()
            .await;

        let _ = Command::new(&self.config.isolate_bin)
            .args(["--box-id", box_id.as_str(), "--cleanup"])
            .output()
            .await;

        match probe {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => anyhow::bail!(
                "isolate probe failed (cgroups: {}): {}",
                self.config.use_cgroups,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to run {}; is isolate installed?", self.config.isolate_bin)
            }),
        }
    }
}

#[async_trait]
impl SandboxProvider for IsolateProvider {
    fn name(&self) -> &'static str {
        "isolate"
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<Arc<dyn Sandbox>> {
        let box_id = next_box_id(&self.config);
        let isolate_box = IsolateBox::new(box_id, self.config.clone(), spec.clone()).await?;
        Ok(Arc::new(isolate_box))
    }
}

/// Isolate box manager
pub struct IsolateBox {
    box_id: u32,
    box_path: String,
    config: SandboxConfig,
    spec: SandboxSpec,
    created_at: Instant,
    terminated: AtomicBool,
}

impl IsolateBox {
    /// Create and initialize a new isolate box
    pub async fn new(box_id: u32, config: SandboxConfig, spec: SandboxSpec) -> Result<Self> {
        // A crashed request may have left this ID behind
        let _ = Command::new(&config.isolate_bin)
            .args(["--box-id", &box_id.to_string(), "--cleanup"])
            .output()
            .await;

        let box_id_str = box_id.to_string();
        let mut args = vec!["--box-id", box_id_str.as_str()];
        if config.use_cgroups {
            args.push("--cg");
        }
        args.push("--init");

        let output = Command::new(&config.isolate_bin)
            .args(&args)
            .output()
            .await
            .context("Failed to run isolate --init")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to initialize isolate box: {}", stderr.trim());
        }

        let box_path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(
            "Initialized isolate box {} at {} (cgroups: {})",
            box_id, box_path, config.use_cgroups
        );

        Ok(Self {
            box_id,
            box_path,
            config,
            spec,
            created_at: Instant::now(),
            terminated: AtomicBool::new(false),
        })
    }

    /// Get the path to the box/box subdirectory (bound to the sandbox work dir)
    pub fn work_dir(&self) -> PathBuf {
        Path::new(&self.box_path).join("box")
    }

    fn meta_file(&self) -> String {
        format!("/tmp/isolate_meta_{}.txt", self.box_id)
    }

    /// Time left before the context's lifetime ceiling
    fn remaining_lifetime(&self) -> Option<Duration> {
        self.spec
            .lifetime
            .checked_sub(self.created_at.elapsed())
            .filter(|left| !left.is_zero())
    }

    fn build_args(&self, command: &CommandSpec, wall_time: Duration) -> Vec<String> {
        let wall_secs = wall_time.as_secs_f64();

        let mut args = vec!["--box-id".to_string(), self.box_id.to_string()];

        if self.config.use_cgroups {
            args.push("--cg".to_string());
            args.push(format!("--cg-mem={}", self.config.memory_limit_mb * 1024));
        }

        args.extend([
            // CPU time may exceed wall time for multi-threaded runtimes like the JVM
            format!("--time={}", wall_secs * 2.0),
            format!("--wall-time={}", wall_secs),
            format!("--meta={}", self.meta_file()),
            format!("--processes={}", self.config.max_processes),
            "--open-files=256".to_string(),
            format!("--fsize={}", self.config.fsize_kb),
            "--silent".to_string(),
            // Mount directories needed for the language runtimes
            "--dir=/usr".to_string(),
            "--dir=/lib".to_string(),
            "--dir=/lib64:maybe".to_string(),
            "--dir=/etc:noexec".to_string(),
            format!("--dir={}={}:rw", SANDBOX_WORK_DIR, self.work_dir().display()),
            format!("--chdir={}", SANDBOX_WORK_DIR),
            // Environment variables
            "--env=PATH=/usr/local/bin:/usr/bin:/bin".to_string(),
            format!("--env=HOME={}", SANDBOX_WORK_DIR),
        ]);

        if self.spec.network == NetworkPolicy::Enabled {
            args.push("--share-net".to_string());
        }

        args.push("--run".to_string());
        args.push("--".to_string());
        args.push(resolve_program(&command.program));
        args.extend(command.args.iter().cloned());
        args
    }
}

#[async_trait]
impl Sandbox for IsolateBox {
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        let dest = self.work_dir().join(relative_to_work_dir(path)?);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&dest, contents)
            .await
            .with_context(|| format!("Failed to write {} into box {}", path, self.box_id))
    }

    async fn execute(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
        if self.terminated.load(Ordering::SeqCst) {
            anyhow::bail!("isolate box {} already terminated", self.box_id);
        }
        let remaining = self
            .remaining_lifetime()
            .ok_or_else(|| anyhow::anyhow!("sandbox lifetime timed out"))?;
        let wall_time = timeout.min(remaining);

        let args = self.build_args(command, wall_time);
        debug!("Running isolate with args: {:?}", args);

        let mut child = Command::new(&self.config.isolate_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to run isolate")?;

        let stdout = child.stdout.take().context("missing stdout pipe")?;
        let stderr = child.stderr.take().context("missing stderr pipe")?;
        let limit = self.config.max_capture_bytes;
        let stdout_task = tokio::spawn(async move { read_limited(stdout, limit).await });
        let stderr_task = tokio::spawn(async move { read_limited(stderr, limit).await });

        match tokio::time::timeout(wall_time + ISOLATE_GRACE, child.wait()).await {
            Ok(status) => {
                status.context("Failed to wait for isolate")?;
            }
            Err(_) => {
                let _ = child.kill().await;
                anyhow::bail!("isolate timed out after {:?}", wall_time);
            }
        }

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let meta_file = self.meta_file();
        let meta_content = fs::read_to_string(&meta_file).await.unwrap_or_default();
        let _ = fs::remove_file(&meta_file).await;

        if meta_content.trim().is_empty() {
            anyhow::bail!(
                "isolate produced no meta output: {}",
                String::from_utf8_lossy(&stderr).trim()
            );
        }

        let meta = parse_meta(&meta_content);
        match meta.status {
            IsolateStatus::TimeOut => {
                anyhow::bail!("command timed out after {:?}", wall_time)
            }
            IsolateStatus::InternalError => anyhow::bail!(
                "isolate internal error: {}",
                meta.message.as_deref().unwrap_or("unknown")
            ),
            _ => {}
        }

        debug!(
            "Box {} finished: status={:?}, time_ms={}, wall_ms={}, memory_kb={}",
            self.box_id, meta.status, meta.time_ms, meta.wall_time_ms, meta.memory_kb
        );

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: Some(meta.reported_exit_code()),
        })
    }

    /// Cleanup the isolate box
    async fn terminate(&self) -> Result<()> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        Command::new(&self.config.isolate_bin)
            .args(["--box-id", &self.box_id.to_string(), "--cleanup"])
            .output()
            .await
            .context("Failed to run isolate --cleanup")?;
        info!("Cleaned up isolate box {}", self.box_id);
        Ok(())
    }
}

/// isolate execs the program directly, so bare names need an absolute path
fn resolve_program(program: &str) -> String {
    if program.contains('/') {
        return program.to_string();
    }
    PROGRAM_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| candidate.is_file())
        .map(|found| found.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("/usr/bin/{}", program))
}
