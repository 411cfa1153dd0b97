//! Logger initialization and the small colored per-formatter prefix helper,
//! carried over from the old `customlog`/`emoji` idiom but as plain
//! functions instead of a global `CLOG` singleton.

use clap_verbosity_flag::{Verbosity, WarnLevel};
use console::Style;
use log::Level;

/// Initialize `env_logger` at the verbosity selected on the CLI.
pub fn init(verbosity: &Verbosity<WarnLevel>) {
    env_logger::Builder::new()
        .filter_level(verbosity.log_level_filter())
        .format_timestamp(None)
        .init();
}

/// A short, colored `#name` prefix for a formatter's log lines, styled by
/// log level the way the old emoji-prefixed `CustomLogOutput` did.
pub fn formatter_prefix(name: &str, level: Level) -> String {
    let style = match level {
        Level::Error => Style::new().red().bold(),
        Level::Warn => Style::new().yellow().bold(),
        Level::Info => Style::new().green(),
        Level::Debug | Level::Trace => Style::new().dim(),
    };
    style.apply_to(format!("#{name}")).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_always_contains_the_name() {
        for level in [Level::Error, Level::Warn, Level::Info, Level::Debug, Level::Trace] {
            assert!(formatter_prefix("black", level).contains("black"));
        }
    }
}
