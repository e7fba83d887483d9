//! One-shot launch of the supervised script.
//!
//! Watch-and-restart orchestration lives outside this core; this module only
//! turns a disambiguated command line into a single `node` invocation with
//! the forwarded flags ahead of the script and the script arguments behind
//! it, untouched.

use std::process::Command;

use anyhow::{Context, Result};
use log::info;

use crate::cli::CommandLine;

/// Executable used to run the script.
const RUNTIME: &str = "node";

/// Spawns the runtime with `runtime_args`, the script, and the script
/// arguments, waits for it to exit, and returns its exit code.
pub fn run(cmd: &CommandLine) -> Result<i32> {
    info!(
        "spawning {} {:?} {} {:?}",
        RUNTIME, cmd.runtime_args, cmd.script, cmd.script_args
    );
    let status = Command::new(RUNTIME)
        .args(&cmd.runtime_args)
        .arg(&cmd.script)
        .args(&cmd.script_args)
        .status()
        .with_context(|| format!("failed to spawn {RUNTIME}"))?;
    Ok(status.code().unwrap_or(1))
}
