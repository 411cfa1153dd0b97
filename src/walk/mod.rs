//! Tree walkers: lazy, single-producer single-consumer streams of `File`
//! records from a root, backed by git, the filesystem, or stdin.

pub mod composite;
pub mod fs;
pub mod git;
pub mod stdin;

use crate::config::WalkBackend;
use crate::file::File;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;

/// Shared cancellation flag: set when SIGINT/SIGTERM is observed or a fatal
/// error occurred elsewhere in the pipeline.
pub type Cancel = Arc<AtomicBool>;

/// Returned by a `Reader` in place of EOF when it stopped early because
/// `Cancel` was observed set, so a cancelled run is never mistaken for one
/// that traversed everything.
#[derive(Debug, Error)]
#[error("traversal cancelled")]
pub struct Cancelled;

/// A stream of `File` records. Implementations are single-producer
/// single-consumer: one background task feeds an in-memory bounded queue,
/// and `read` drains from it.
pub trait Reader: Send {
    /// Fill up to `out.len()` entries. Returns the number of entries
    /// written; `0` means the stream is exhausted (EOF). Returns
    /// [`Cancelled`] if cancelled, or another error if the underlying
    /// source failed.
    fn read(&mut self, out: &mut Vec<File>) -> Result<usize>;
}

/// Normalize a possibly-relative path into an absolute one, using `base` as
/// the reference directory. Does not resolve symlinks (tree roots and user
/// paths may themselves be symlinks; only `path-clean`-style normalization
/// happens here).
pub fn expand_path(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    path_clean::clean(joined.to_string_lossy().as_ref()).into()
}

/// Detect whether `auto` walk mode should use the git backend: true iff
/// `tree_root` is inside a git work tree.
pub fn git_available(tree_root: &Path) -> bool {
    std::process::Command::new("git")
        .arg("rev-parse")
        .arg("--is-inside-work-tree")
        .current_dir(tree_root)
        .output()
        .map(|out| out.status.success() && out.stdout.starts_with(b"true"))
        .unwrap_or(false)
}

/// Where to read the file list from: either one pseudo file given on stdin,
/// or one or more real paths under `root`.
pub enum Source<'a> {
    Stdin { pseudo_path: &'a Path },
    Paths(Vec<PathBuf>),
}

/// Build the `Reader` for one run, picking a backend per `WalkBackend` and
/// (for `Auto`) probing for a git work tree.
pub fn build(
    backend: WalkBackend,
    root: &Path,
    hidden: bool,
    channel_capacity: usize,
    cancel: Cancel,
    source: Source,
) -> Result<Box<dyn Reader>> {
    let paths = match source {
        Source::Stdin { pseudo_path } => {
            return Ok(Box::new(stdin::StdinWalker::new(root, pseudo_path, cancel)?));
        }
        Source::Paths(paths) => paths,
    };

    let use_git = match backend {
        WalkBackend::Git => true,
        WalkBackend::Filesystem => false,
        WalkBackend::Stdin => {
            anyhow::bail!("walk backend is \"stdin\" but no --stdin path was given")
        }
        WalkBackend::Auto => git_available(root),
    };

    if use_git {
        // git ls-files takes one path spec; multiple explicit paths are
        // passed through a composite of one GitWalker per path when more
        // than one was given, otherwise the root itself.
        if paths.len() <= 1 {
            let sub_path = paths.first().map(|p| p.as_path()).unwrap_or(root);
            Ok(Box::new(git::GitWalker::new(
                root.to_path_buf(),
                sub_path,
                cancel,
            )?))
        } else {
            let readers = paths
                .iter()
                .map(|p| -> Result<Box<dyn Reader>> {
                    Ok(Box::new(git::GitWalker::new(
                        root.to_path_buf(),
                        p,
                        cancel.clone(),
                    )?))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Box::new(composite::CompositeWalker::new(readers)))
        }
    } else {
        let paths = if paths.is_empty() {
            vec![root.to_path_buf()]
        } else {
            paths
        };
        Ok(Box::new(fs::FsWalker::spawn(
            root.to_path_buf(),
            paths,
            hidden,
            channel_capacity,
            cancel,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_joins_relative_paths() {
        let base = Path::new("/a/b");
        assert_eq!(expand_path(Path::new("c"), base), PathBuf::from("/a/b/c"));
    }

    #[test]
    fn expand_path_cleans_dot_segments() {
        let base = Path::new("/a/b");
        assert_eq!(
            expand_path(Path::new("../c"), base),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn expand_path_leaves_absolute_paths_alone() {
        let base = Path::new("/a/b");
        assert_eq!(expand_path(Path::new("/x/y"), base), PathBuf::from("/x/y"));
    }
}
