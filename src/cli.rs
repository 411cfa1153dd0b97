//! The CLI surface: one `clap::Parser` derive covering every flag the
//! formatting run understands, plus the `init` and `completions`
//! out-of-scope utility subcommands.

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::PathBuf;

/// Format (or check) the files in a project tree with whatever tools
/// `treefmt.toml` configures.
#[derive(Debug, Parser)]
#[command(name = "treefmt", version, about)]
pub struct Cli {
    /// Paths to format, relative to the current directory. Defaults to the
    /// whole tree when empty.
    pub paths: Vec<PathBuf>,

    /// Path to the project's `treefmt.toml`. Overrides upward search.
    #[arg(long, env = "TREEFMT_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Root of the tree to format. Overrides the config's tree-root options.
    #[arg(long, env = "PRJ_ROOT")]
    pub tree_root: Option<PathBuf>,

    /// Format a single file whose content is read from stdin, pretending it
    /// lives at this path. Disables tree traversal.
    #[arg(long)]
    pub stdin: Option<PathBuf>,

    /// Don't use the persistent cache for this run.
    #[arg(long, env = "TREEFMT_NO_CACHE")]
    pub no_cache: bool,

    /// Wipe the persistent cache before running.
    #[arg(long, env = "TREEFMT_CLEAR_CACHE")]
    pub clear_cache: bool,

    /// Don't format anything; exit non-zero if anything would change.
    #[arg(long, env = "TREEFMT_FAIL_ON_CHANGE")]
    pub fail_on_change: bool,

    /// Include hidden (dot) files in the filesystem walker.
    #[arg(long, env = "TREEFMT_HIDDEN")]
    pub hidden: bool,

    /// Restrict formatting to these named formatters.
    #[arg(long = "formatters", value_delimiter = ',')]
    pub formatters: Vec<String>,

    /// Skip formatters whose executable can't be found.
    #[arg(long, env = "TREEFMT_ALLOW_MISSING_FORMATTER")]
    pub allow_missing_formatter: bool,

    /// Number of worker threads. Defaults to the available parallelism.
    #[arg(long, env = "TREEFMT_WORKERS")]
    pub workers: Option<usize>,

    /// Reserved for compatibility; capturing a CPU profile is out of scope.
    #[arg(long, hide = true)]
    pub cpu_profile: Option<PathBuf>,

    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a starter `treefmt.toml` in the current directory.
    Init,
    /// Emit a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_bare_invocation() {
        let cli = Cli::parse_from(["treefmt"]);
        assert!(cli.paths.is_empty());
        assert!(!cli.no_cache);
    }

    #[test]
    fn parses_formatters_list() {
        let cli = Cli::parse_from(["treefmt", "--formatters", "a,b"]);
        assert_eq!(cli.formatters, vec!["a".to_string(), "b".to_string()]);
    }
}
