//! Sandbox configuration
//!
//! Backend selection and isolate tuning, loaded from environment variables.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::env_parse;

/// Number of box IDs each process cycles through
pub const BOX_ID_RANGE: u32 = 1000;

/// Which sandbox implementation backs execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxBackendKind {
    #[default]
    Isolate,
    Local,
}

impl FromStr for SandboxBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(Self::Isolate),
            "local" | "process" => Ok(Self::Local),
            _ => Err(format!("unsupported sandbox backend: {s}")),
        }
    }
}

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub backend: SandboxBackendKind,
    /// Path or name of the isolate binary
    pub isolate_bin: String,
    /// Use cgroups for memory accounting (default: true)
    pub use_cgroups: bool,
    /// Memory ceiling per command in MB (default: 512MB)
    pub memory_limit_mb: u32,
    /// Maximum processes/threads per command (the JVM needs plenty)
    pub max_processes: u32,
    /// Maximum file size a command may write, in KB
    pub fsize_kb: u32,
    /// First box ID of this process's range (isolate supports 0-9999)
    pub box_id_base: u32,
    /// Bytes read per stream before capping
    pub max_capture_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackendKind::Isolate,
            isolate_bin: "isolate".to_string(),
            use_cgroups: true,
            memory_limit_mb: 512,
            max_processes: 128,
            fsize_kb: 65_536,
            box_id_base: 0,
            max_capture_bytes: 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: env_parse("SANDBOX_BACKEND", defaults.backend),
            isolate_bin: std::env::var("ISOLATE_BIN").unwrap_or(defaults.isolate_bin),
            use_cgroups: env_parse("SANDBOX_USE_CGROUPS", defaults.use_cgroups),
            memory_limit_mb: env_parse("SANDBOX_MEMORY_MB", defaults.memory_limit_mb),
            max_processes: env_parse("SANDBOX_PROCESSES", defaults.max_processes),
            fsize_kb: defaults.fsize_kb,
            box_id_base: env_parse("SANDBOX_BOX_ID_BASE", defaults.box_id_base),
            max_capture_bytes: env_parse("SANDBOX_MAX_CAPTURE_BYTES", defaults.max_capture_bytes),
        }
    }
}

/// Global counter for box ID allocation within this process's range
static BOX_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Get next box ID for an isolate sandbox.
/// Concurrent requests each take their own ID; the range wraps after `BOX_ID_RANGE`.
pub fn next_box_id(config: &SandboxConfig) -> u32 {
    let counter = BOX_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    box_id_for(config.box_id_base, counter)
}

fn box_id_for(base: u32, counter: u32) -> u32 {
    // isolate only accepts IDs below 10000
    (base + counter % BOX_ID_RANGE) % 10_000
}
