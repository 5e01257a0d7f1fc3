//! Show the kernel inotify limits

use anyhow::{Context, Result};
use dirwatch_core::KernelLimits;
use owo_colors::OwoColorize;

pub fn run() -> Result<()> {
    let limits = KernelLimits::read().context("Failed to read inotify limits")?;

    println!("{}", "inotify limits".bold());
    println!("  max_user_watches:   {}", limits.max_user_watches.cyan());
    println!("  max_user_instances: {}", limits.max_user_instances.cyan());
    println!("  max_queued_events:  {}", limits.max_queued_events.cyan());

    Ok(())
}
