//! `treefmt.toml` schema, discovery and parsing.
//!
//! Loading, upward directory search, env var overrides and CLI merging are
//! ambient plumbing around the core pipeline (spec treats this subsystem as
//! an external collaborator); it is implemented fully here because the core
//! needs a real config to build `Formatter`s from.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

/// Name of the config file, searched for from the current directory upward.
pub const FILENAME: &str = "treefmt.toml";

/// How aggressively to react to a file no formatter wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnUnmatched {
    /// Log at debug level.
    Debug,
    /// Log at info level.
    Info,
    /// Log at warn level.
    Warn,
    /// Log at error level.
    Error,
    /// Log at error level and abort the run.
    Fatal,
}

impl Default for OnUnmatched {
    fn default() -> Self {
        OnUnmatched::Warn
    }
}

/// Which walker backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalkBackend {
    /// Try git, fall back to filesystem.
    Auto,
    /// Read a single file from stdin.
    Stdin,
    /// Plain gitignore-aware filesystem traversal.
    Filesystem,
    /// `git ls-files`-backed traversal.
    Git,
}

impl Default for WalkBackend {
    fn default() -> Self {
        WalkBackend::Auto
    }
}

/// `treefmt.toml`'s top-level schema.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Root {
    /// Paths excluded from every formatter, applied before per-formatter
    /// matching.
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Deprecated alias for `excludes`; folded in at load time.
    #[serde(default)]
    pub global: Option<GlobalAlias>,

    /// Skip formatters whose executable can't be found instead of failing.
    #[serde(default)]
    pub allow_missing_formatter: bool,

    /// CI mode: currently only affects defaults elsewhere in the CLI.
    #[serde(default)]
    pub ci: bool,

    /// Exit with a distinct error if any file changed.
    #[serde(default)]
    pub fail_on_change: bool,

    /// Restrict to this subset of configured formatter names.
    pub formatters: Option<Vec<String>>,

    /// What to do with a file no formatter matched.
    #[serde(default)]
    pub on_unmatched: OnUnmatched,

    /// Explicit tree root. Mutually exclusive with the other two.
    pub tree_root: Option<PathBuf>,
    /// File whose parent directory is the tree root.
    pub tree_root_file: Option<PathBuf>,
    /// Command whose stdout is the tree root.
    pub tree_root_cmd: Option<String>,

    /// Which walker backend to use.
    #[serde(default)]
    pub walk: WalkBackend,

    /// Per-formatter configuration, keyed by formatter name.
    #[serde(default)]
    pub formatter: BTreeMap<String, FormatterConfig>,
}

/// The deprecated `[global] excludes = [...]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalAlias {
    /// Falls back into the top-level `excludes` if that list is empty.
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// One `[formatter.<name>]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FormatterConfig {
    /// Executable name or path.
    pub command: String,
    /// Extra arguments, prepended before the file list.
    #[serde(default)]
    pub options: Vec<String>,
    /// Include globs, matched against `rel_path`.
    #[serde(default)]
    pub includes: Vec<String>,
    /// Exclude globs, matched against `rel_path`.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Lower numbers run earlier in a batch.
    #[serde(default)]
    pub priority: i32,
}

impl Root {
    /// Resolve the effective global excludes, folding in the deprecated
    /// `[global]` alias when the top-level list is empty.
    pub fn effective_excludes(&self) -> Vec<String> {
        if !self.excludes.is_empty() {
            self.excludes.clone()
        } else if let Some(global) = &self.global {
            global.excludes.clone()
        } else {
            Vec::new()
        }
    }

    /// Check that at most one of the tree-root options was set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let set = [
            self.tree_root.is_some(),
            self.tree_root_file.is_some(),
            self.tree_root_cmd.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if set > 1 {
            return Err(ConfigError::ConflictingTreeRoot);
        }
        Ok(())
    }
}

/// Parse a `Root` from a TOML string.
pub fn from_str(content: &str) -> Result<Root, toml::de::Error> {
    toml::from_str(content)
}

/// Load and parse the config file at `path`.
pub fn from_path(path: &Path) -> Result<Root, ConfigError> {
    let content = read_to_string(path).map_err(|e| {
        ConfigError::NotFound(format!("{e}"), path.to_path_buf())
    })?;
    let root: Root = toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
    root.validate()?;
    Ok(root)
}

/// Walk up from `dir` looking for `treefmt.toml`, returning the directory
/// that contains it.
pub fn lookup(dir: &Path) -> Option<PathBuf> {
    let mut cwd = dir.to_path_buf();
    loop {
        if cwd.join(FILENAME).exists() {
            return Some(cwd);
        }
        cwd = match cwd.parent() {
            Some(p) => p.to_path_buf(),
            None => return None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
        [formatter.python]
        command = "black"
        includes = ["*.py"]
        "#;
        let root = from_str(toml).unwrap();
        assert_eq!(root.formatter.len(), 1);
        let python = &root.formatter["python"];
        assert_eq!(python.command, "black");
        assert_eq!(python.priority, 0);
    }

    #[test]
    fn deprecated_global_excludes_fall_back() {
        let toml = r#"
        [global]
        excludes = ["*.lock"]
        "#;
        let root = from_str(toml).unwrap();
        assert_eq!(root.effective_excludes(), vec!["*.lock".to_string()]);
    }

    #[test]
    fn top_level_excludes_win_over_global_alias() {
        let toml = r#"
        excludes = ["*.top"]
        [global]
        excludes = ["*.lock"]
        "#;
        let root = from_str(toml).unwrap();
        assert_eq!(root.effective_excludes(), vec!["*.top".to_string()]);
    }

    #[test]
    fn conflicting_tree_root_options_are_rejected() {
        let toml = r#"
        tree-root = "/a"
        tree-root-cmd = "git rev-parse"
        "#;
        let root = from_str(toml).unwrap();
        assert!(root.validate().is_err());
    }

    #[test]
    fn lookup_walks_up_to_find_config() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(tmp.path().join(FILENAME), "").unwrap();

        let found = lookup(&nested).unwrap();
        assert_eq!(found, tmp.path());
    }

    #[test]
    fn lookup_returns_none_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(lookup(tmp.path()).is_none());
    }
}
