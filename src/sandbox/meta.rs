//! Reader for the key:value file `isolate --meta` leaves behind

/// Outcome class reported by isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolateStatus {
    #[default]
    Ok,
    /// Wall or CPU limit hit (`TO`)
    TimeOut,
    /// Killed by a signal (`SG`), number if isolate reported one
    Signal(Option<i32>),
    /// Exited non-zero (`RE`)
    RuntimeError,
    /// isolate itself failed (`XX`)
    InternalError,
}

impl IsolateStatus {
    fn from_code(code: &str, signal: Option<i32>, exit_code: i32) -> Self {
        match code {
            "TO" => Self::TimeOut,
            "XX" => Self::InternalError,
            "SG" => Self::Signal(signal),
            "RE" => Self::RuntimeError,
            _ if signal.is_some() => Self::Signal(signal),
            _ if exit_code != 0 => Self::RuntimeError,
            _ => Self::Ok,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IsolateMeta {
    pub status: IsolateStatus,
    pub exit_code: i32,
    pub time_ms: u32,
    pub wall_time_ms: u32,
    /// Peak of `cg-mem` and `max-rss`, in KB
    pub memory_kb: u32,
    pub message: Option<String>,
}

impl IsolateMeta {
    /// Exit code the way a shell reports it: 128 + signal for killed processes
    pub fn reported_exit_code(&self) -> i32 {
        match self.status {
            IsolateStatus::Signal(signal) => 128 + signal.unwrap_or(0),
            _ => self.exit_code,
        }
    }
}

fn seconds_to_ms(value: &str) -> Option<u32> {
    value.parse::<f64>().ok().map(|secs| (secs * 1000.0).round() as u32)
}

/// Parse meta file content. Unknown keys and malformed values are skipped.
pub fn parse_meta(content: &str) -> IsolateMeta {
    let mut meta = IsolateMeta::default();
    let mut code = "";
    let mut signal = None;

    let pairs = content
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()));

    for (key, value) in pairs {
        match key {
            "status" => code = value,
            "exitcode" => meta.exit_code = value.parse().unwrap_or(meta.exit_code),
            "exitsig" => signal = value.parse().ok(),
            "time" => meta.time_ms = seconds_to_ms(value).unwrap_or(meta.time_ms),
            "time-wall" => meta.wall_time_ms = seconds_to_ms(value).unwrap_or(meta.wall_time_ms),
            "cg-mem" | "max-rss" => {
                if let Ok(kb) = value.parse::<u32>() {
                    meta.memory_kb = meta.memory_kb.max(kb);
                }
            }
            "message" => meta.message = Some(value.to_string()),
            _ => {}
        }
    }

    meta.status = IsolateStatus::from_code(code, signal, meta.exit_code);
    meta
}
