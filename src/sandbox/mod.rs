//! Sandbox module - Isolated execution contexts
//!
//! This module defines the capability the executor consumes:
//! - `SandboxProvider` creates one network-isolated context per request
//! - `Sandbox` writes files into that context, runs commands, and tears it down
//!
//! Two backends implement it:
//! - `IsolateBox`: isolate-based boxes (production)
//! - `LocalSandbox`: plain processes in a temp directory (development only)
//!
//! The sandbox module does NOT:
//! - Know about languages, compilation, or harnesses
//! - Cap output for callers or classify failures

pub mod config;
pub mod isolate_box;
pub mod local;
pub mod meta;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use config::{SandboxBackendKind, SandboxConfig};
pub use isolate_box::IsolateProvider;
pub use local::LocalProvider;

/// Working directory every backend exposes inside the sandbox
pub const SANDBOX_WORK_DIR: &str = "/tmp";

/// Whether a context may reach the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkPolicy {
    #[default]
    Disabled,
    Enabled,
}

/// Parameters for creating a sandbox context
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub network: NetworkPolicy,
    /// Hard ceiling on the context's total lifetime
    pub lifetime: Duration,
}

impl SandboxSpec {
    pub fn isolated(lifetime: Duration) -> Self {
        Self {
            network: NetworkPolicy::Disabled,
            lifetime,
        }
    }
}

/// Command specification for execution inside a sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        Self {
            program,
            args: iter.cloned().collect(),
        }
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.iter().cloned());
        v
    }
}

/// Raw result of one command (no verdict interpretation)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the backend could not observe an exit status
    pub exit_code: Option<i32>,
}

/// A request-scoped, isolated execution context
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Materialize a file at an absolute in-sandbox path
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Run a command, bounded by `timeout` and the context's remaining lifetime
    async fn execute(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput>;

    /// Release the context. Safe to call more than once.
    async fn terminate(&self) -> Result<()>;
}

/// Factory for sandbox contexts
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create(&self, spec: &SandboxSpec) -> Result<Arc<dyn Sandbox>>;
}

/// Build the configured backend
pub async fn provider_from_config(config: &SandboxConfig) -> Result<Arc<dyn SandboxProvider>> {
    match config.backend {
        SandboxBackendKind::Isolate => {
            let provider = IsolateProvider::new(config.clone());
            provider.ensure_available().await?;
            Ok(Arc::new(provider))
        }
        SandboxBackendKind::Local => Ok(Arc::new(LocalProvider::new(config.max_capture_bytes))),
    }
}

/// Resolve an absolute in-sandbox path to a path relative to the work dir.
///
/// Only paths under [`SANDBOX_WORK_DIR`] made of plain components are accepted.
pub fn relative_to_work_dir(path: &str) -> Result<PathBuf> {
    let relative = Path::new(path)
        .strip_prefix(SANDBOX_WORK_DIR)
        .map_err(|_| anyhow::anyhow!("Path {} is outside {}", path, SANDBOX_WORK_DIR))?;

    if relative.as_os_str().is_empty() {
        anyhow::bail!("Path {} names the work directory itself", path);
    }
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        anyhow::bail!("Path {} contains disallowed components", path);
    }

    Ok(relative.to_path_buf())
}

/// Read a stream to the end, keeping at most `limit` bytes
pub(crate) async fn read_limited<R>(mut reader: R, limit: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(limit.min(8192));
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < limit {
                    let remaining = limit - out.len();
                    out.extend_from_slice(&chunk[..remaining.min(n)]);
                }
            }
            Err(_) => break,
        }
    }
    out
}
