//! Git-index-backed walker: lists tracked and untracked-but-not-ignored
//! files via `git ls-files`, skipping submodules and symlinks.

use crate::file::{File, Info};
use crate::walk::{Cancel, Cancelled, Reader};
use anyhow::{Context, Result};
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::Ordering;

/// Parsed output of `git ls-files --cached --others --exclude-standard
/// --stage`, converted into `File`s one at a time as `read()` is called.
pub struct GitWalker {
    root: PathBuf,
    entries: std::vec::IntoIter<ParsedEntry>,
    cancel: Cancel,
}

struct ParsedEntry {
    mode: Option<u32>,
    rel_path: PathBuf,
}

impl GitWalker {
    /// Run `git ls-files` rooted at `root`, restricted to `sub_path` (usually
    /// `root` itself, but may be a narrower subdirectory passed on the CLI).
    pub fn new(root: PathBuf, sub_path: &Path, cancel: Cancel) -> Result<Self> {
        let output = Command::new("git")
            .arg("ls-files")
            .arg("--cached")
            .arg("--others")
            .arg("--exclude-standard")
            .arg("--stage")
            .arg("-z")
            .arg("--")
            .arg(sub_path)
            .current_dir(&root)
            .output()
            .context("spawning git ls-files")?;

        if !output.status.success() {
            anyhow::bail!(
                "git ls-files failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let entries = parse_ls_files(&output.stdout);
        Ok(Self {
            root,
            entries: entries.into_iter(),
            cancel,
        })
    }
}

impl Reader for GitWalker {
    fn read(&mut self, out: &mut Vec<File>) -> Result<usize> {
        let cap = out.capacity().max(1);
        let mut n = 0;
        while n < cap {
            if self.cancel.load(Ordering::Relaxed) {
                // Hand back whatever was already collected this call before
                // signalling cancellation, so nothing pushed into `out` is
                // lost; the next call observes the flag again with n == 0.
                return if n == 0 { Err(Cancelled.into()) } else { Ok(n) };
            }
            let Some(entry) = self.entries.next() else {
                break;
            };
            // Mode 160000 is a submodule gitlink; `--others` entries have no
            // mode at all and are treated as plain files.
            if entry.mode == Some(0o160000) {
                continue;
            }
            let path = self.root.join(&entry.rel_path);
            let meta = match fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(_) => {
                    warn!(
                        "{} is tracked but missing on disk, skipping",
                        entry.rel_path.display()
                    );
                    continue;
                }
            };
            if meta.file_type().is_symlink() {
                continue;
            }
            let info = Info::from_metadata(&meta);
            out.push(File::new(path, entry.rel_path, info));
            n += 1;
        }
        Ok(n)
    }
}

/// Parse NUL-separated `git ls-files --stage -z` output. Staged/cached lines
/// look like `<mode> <sha> <stage>\t<path>`; `--others` lines are bare
/// paths with no tab.
fn parse_ls_files(raw: &[u8]) -> Vec<ParsedEntry> {
    raw.split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .filter_map(|chunk| {
            let line = String::from_utf8_lossy(chunk);
            if let Some(tab) = line.find('\t') {
                let meta = &line[..tab];
                let path = &line[tab + 1..];
                let mode = meta
                    .split_whitespace()
                    .next()
                    .and_then(|m| u32::from_str_radix(m, 8).ok());
                Some(ParsedEntry {
                    mode,
                    rel_path: unquote_path(path),
                })
            } else {
                Some(ParsedEntry {
                    mode: None,
                    rel_path: unquote_path(&line),
                })
            }
        })
        .collect()
}

/// Undo git's C-style quoting of paths containing unusual bytes. With `-z`
/// this is rare (git only quotes without `-z`), but tolerate it defensively
/// since some git versions still quote control characters.
fn unquote_path(raw: &str) -> PathBuf {
    if !(raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2) {
        return PathBuf::from(raw);
    }
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    PathBuf::from(out)
}
