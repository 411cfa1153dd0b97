//! Decides whether a formatter wants a given file: compiled include/exclude
//! glob sets matched purely syntactically against `rel_path`. No filesystem
//! access happens here.

use crate::error::ConfigError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// A compiled include/exclude rule set for one formatter (or the top-level
/// global excludes).
#[derive(Debug, Clone)]
pub struct Matcher {
    includes: GlobSet,
    excludes: GlobSet,
}

impl Matcher {
    /// Compile a matcher from raw glob patterns. Patterns are right-anchored
    /// and matched against the full `rel_path`.
    pub fn compile(
        formatter_name: &str,
        includes: &[String],
        excludes: &[String],
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            includes: build_glob_set(formatter_name, includes)?,
            excludes: build_glob_set(formatter_name, excludes)?,
        })
    }

    /// True iff `rel_path` matches at least one include and no exclude.
    pub fn is_match(&self, rel_path: &Path) -> bool {
        if self.excludes.is_match(rel_path) {
            return false;
        }
        self.includes.is_match(rel_path)
    }
}

fn build_glob_set(formatter_name: &str, patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidGlob {
            formatter: formatter_name.to_string(),
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ConfigError::InvalidGlob {
        formatter: formatter_name.to_string(),
        pattern: patterns.join(","),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn matches_include_and_not_exclude() {
        let m = Matcher::compile(
            "python",
            &["*.py".to_string()],
            &["test_*.py".to_string()],
        )
        .unwrap();
        assert!(m.is_match(&PathBuf::from("foo.py")));
        assert!(!m.is_match(&PathBuf::from("test_foo.py")));
        assert!(!m.is_match(&PathBuf::from("foo.rs")));
    }

    #[test]
    fn no_includes_matches_nothing() {
        let m = Matcher::compile("python", &[], &[]).unwrap();
        assert!(!m.is_match(&PathBuf::from("foo.py")));
    }

    #[test]
    fn invalid_glob_is_a_config_error() {
        let err = Matcher::compile("python", &["[".to_string()], &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGlob { .. }));
    }
}
