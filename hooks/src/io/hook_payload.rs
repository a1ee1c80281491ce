//! Reading the payload the hook framework passes to each hook.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::payload::HookPayload;

/// Parse the payload from inline JSON, a file, or neither.
///
/// With neither, every app value is `null`.
pub fn read_payload(inline: Option<&str>, file: Option<&Path>) -> Result<HookPayload> {
    if let Some(raw) = inline {
        return parse(raw).context("parse --payload");
    }
    if let Some(path) = file {
        let raw =
            fs::read_to_string(path).with_context(|| format!("read payload {}", path.display()))?;
        return parse(&raw).with_context(|| format!("parse payload {}", path.display()));
    }
    Ok(HookPayload::default())
}

fn parse(raw: &str) -> Result<HookPayload> {
    if raw.trim().is_empty() {
        return Ok(HookPayload::default());
    }
    Ok(serde_json::from_str(raw)?)
}
