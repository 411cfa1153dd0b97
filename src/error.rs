//! Typed errors that map onto the process exit codes described in the
//! configuration contract: most failures are fatal and indistinguishable,
//! but formatting failures and the fail-on-change condition each need their
//! own exit status.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading and validating `treefmt.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The formatter name did not match `^[A-Za-z0-9_-]+$`.
    #[error("formatter name {0:?} must match ^[A-Za-z0-9_-]+$")]
    InvalidFormatterName(String),

    /// A formatter had no `includes` entries.
    #[error("formatter #{0} doesn't have any includes")]
    NoIncludes(String),

    /// A glob pattern failed to compile.
    #[error("invalid glob pattern {pattern:?} in formatter #{formatter}: {source}")]
    InvalidGlob {
        /// Formatter the pattern belongs to.
        formatter: String,
        /// The offending pattern.
        pattern: String,
        /// Underlying compile error.
        #[source]
        source: globset::Error,
    },

    /// More than one of `tree-root` / `tree-root-file` / `tree-root-cmd` was set.
    #[error("tree-root, tree-root-file and tree-root-cmd are mutually exclusive")]
    ConflictingTreeRoot,

    /// No config file could be found and `--init` was not requested.
    #[error("{0} could not be found in {1} or any parent directory")]
    NotFound(String, PathBuf),

    /// The config file did not parse as valid TOML for this schema.
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
}

/// Top-level error returned by a run of the engine.
#[derive(Debug, Error)]
pub enum TreefmtError {
    /// Configuration could not be loaded or was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A configured formatter's executable could not be resolved and
    /// `allow-missing-formatter` was not set.
    #[error("formatter #{name} not found: {source}")]
    MissingFormatter {
        /// Name of the formatter.
        name: String,
        /// Underlying lookup error.
        #[source]
        source: anyhow::Error,
    },

    /// The cache could not be opened or closed.
    #[error("cache error: {0}")]
    Cache(#[source] anyhow::Error),

    /// Traversal hit an unreadable directory or a path outside the tree root.
    #[error("traversal error: {0}")]
    Traversal(#[source] anyhow::Error),

    /// At least one batch failed to apply one of its formatters.
    #[error("one or more formatters failed to apply cleanly")]
    FormattingFailures,

    /// A file matched no formatter and `on-unmatched` was set to `fatal`.
    #[error("no formatter matched {0} and on-unmatched is set to fatal")]
    UnmatchedFatal(PathBuf),

    /// `--fail-on-change` was set and at least one file changed.
    #[error("{0} file(s) were reformatted and --fail-on-change is set")]
    FailOnChange(usize),

    /// The run was cancelled by `SIGINT`/`SIGTERM` before it finished
    /// traversing the tree. Already-dispatched batches still ran to
    /// completion and the cache/stats were flushed normally.
    #[error("run cancelled")]
    Cancelled,

    /// Catch-all for anything else (I/O, subprocess spawn, etc).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TreefmtError {
    /// The process exit code this error should produce.
    pub fn exit_code(&self) -> i32 {
        match self {
            TreefmtError::FormattingFailures => 2,
            TreefmtError::FailOnChange(_) => 3,
            _ => 1,
        }
    }
}
