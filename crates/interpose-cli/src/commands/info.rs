//! `interpose info`: Display version and configuration defaults.

use crate::output::StyledOutput;
use interpose_engine::{
    SwapMode, VmOptions, BUILTIN_INTERCEPTS, HANDLER_FIELD_DESCRIPTOR, HANDLER_FIELD_NAME,
};
use serde::Serialize;

const ENV_VARS: &[&str] = &["INTERPOSE_LOG", "NO_COLOR"];

/// Version and compiled-in defaults
#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    pub version: &'static str,
    pub os: &'static str,
    pub arch: &'static str,
    pub swap_mode: SwapMode,
    pub max_call_depth: usize,
    pub intercepts: usize,
    pub handler_field: String,
    /// Variable name and value, `None` when unset
    pub env: Vec<(&'static str, Option<String>)>,
}

pub fn collect() -> InfoReport {
    InfoReport {
        version: env!("CARGO_PKG_VERSION"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        swap_mode: SwapMode::default(),
        max_call_depth: VmOptions::default().max_call_depth,
        intercepts: BUILTIN_INTERCEPTS.len(),
        handler_field: format!("{}: {}", HANDLER_FIELD_NAME, HANDLER_FIELD_DESCRIPTOR),
        env: ENV_VARS
            .iter()
            .map(|name| (*name, std::env::var(name).ok()))
            .collect(),
    }
}

pub fn execute(out: &mut StyledOutput) -> anyhow::Result<()> {
    let info = collect();

    out.bold(&format!("Interpose v{}", info.version));
    out.newline();
    out.newline();

    out.field("Platform:", &format!("{} ({})", info.os, info.arch));
    out.field("Swap mode:", info.swap_mode.as_str());
    out.field("Call depth:", &info.max_call_depth.to_string());
    out.field("Intercepts:", &info.intercepts.to_string());
    out.field("Handler field:", &info.handler_field);

    out.newline();
    out.plain("Environment:");
    out.newline();
    for (name, value) in &info.env {
        out.field(&format!("  {}", name), value.as_deref().unwrap_or("(not set)"));
    }
    out.flush();
    Ok(())
}
