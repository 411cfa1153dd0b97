//! `treefmt init`: write a starter `treefmt.toml` in the current directory.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const TEMPLATE: &str = r#"# One CLI to format the code tree - https://github.com/numtide/treefmt

[formatter.mylanguage]
# Formatter to run.
command = "command-to-run"
# Command-line arguments, prepended before the file list.
options = []
# Glob patterns of files to include.
includes = ["*.<language-extension>"]
# Glob patterns of files to exclude.
excludes = []
"#;

/// Write `treefmt.toml` under `dir`, refusing to clobber an existing file.
pub fn run(dir: &Path) -> Result<()> {
    let path = dir.join(crate::config::FILENAME);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    fs::write(&path, TEMPLATE).with_context(|| format!("writing {}", path.display()))?;
    log::info!("wrote a starter config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_template_once() {
        let tmp = tempfile::tempdir().unwrap();
        run(tmp.path()).unwrap();
        assert!(tmp.path().join("treefmt.toml").exists());
        assert!(run(tmp.path()).is_err());
    }
}
