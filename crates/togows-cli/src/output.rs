use std::io::Write;

use owo_colors::OwoColorize;
use togows_core::{CapabilityWarning, ClientConfig};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print capability warnings, one per line.
pub fn print_warnings(
    w: &mut dyn Write,
    warnings: &[CapabilityWarning],
    color: ColorMode,
) -> std::io::Result<()> {
    for warning in warnings {
        if color.enabled() {
            writeln!(w, "{} {}", "warning:".yellow().bold(), warning.yellow())?;
        } else {
            writeln!(w, "warning: {}", warning)?;
        }
    }
    Ok(())
}

/// Print a discovered capability list, one name per line.
pub fn print_names<'a>(
    w: &mut dyn Write,
    names: impl IntoIterator<Item = &'a String>,
) -> std::io::Result<()> {
    for name in names {
        writeln!(w, "{}", name)?;
    }
    Ok(())
}

/// Print the effective client configuration.
pub fn print_config(
    w: &mut dyn Write,
    config: &ClientConfig,
    color: ColorMode,
) -> std::io::Result<()> {
    let rows = [
        ("base_url", config.base_url.clone()),
        ("user_agent", config.user_agent.clone()),
        ("timeout_secs", config.timeout_secs.to_string()),
        ("min_interval_ms", config.min_interval_ms.to_string()),
        ("search_batch_size", config.search_batch_size.to_string()),
        ("strict_capabilities", config.strict_capabilities.to_string()),
    ];
    for (key, value) in rows {
        if color.enabled() {
            writeln!(w, "{:<20} {}", key.bold(), value)?;
        } else {
            writeln!(w, "{:<20} {}", key, value)?;
        }
    }
    Ok(())
}
