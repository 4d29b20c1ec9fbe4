//! Python test harness
//!
//! The wrapper source is fixed (files/python_harness.py). Submitted code, the
//! function name, and the test cases travel as one base64-encoded JSON payload,
//! so no request data is ever interpreted as harness code.

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{HarnessPayload, HarnessProgram};
use crate::sandbox::SANDBOX_WORK_DIR;

const TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/python_harness.py"));

const PAYLOAD_PLACEHOLDER: &str = "{{PAYLOAD}}";

pub(crate) fn render(payload: &HarnessPayload<'_>) -> anyhow::Result<HarnessProgram> {
    let json = serde_json::to_vec(payload).context("Failed to serialize harness payload")?;
    let encoded = STANDARD.encode(json);

    Ok(HarnessProgram {
        path: format!("{}/harness.py", SANDBOX_WORK_DIR),
        source: TEMPLATE.replacen(PAYLOAD_PLACEHOLDER, &encoded, 1),
    })
}
