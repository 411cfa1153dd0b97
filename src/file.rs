//! The per-file value object that flows through the whole pipeline: produced
//! by a walker, annotated by the cached walker, matched and batched by the
//! engine and scheduler, and finally released exactly once.

use anyhow::Result;
use filetime::FileTime;
use std::fmt;
use std::path::PathBuf;

/// Size + mtime observed at some point in a file's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    /// File size in bytes.
    pub size: u64,
    /// Modification time, truncated to whole seconds.
    ///
    /// Many formatters (line-ending normalisers in particular) bump the
    /// sub-second mtime without touching file content; comparing full
    /// precision would flag those as changes.
    pub mtime_secs: i64,
}

impl Info {
    /// Capture the current `Info` for a path that is known to exist.
    pub fn stat(path: &std::path::Path) -> Result<Self> {
        let meta = std::fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&meta))
    }

    /// Build an `Info` from already-fetched metadata.
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let ft = FileTime::from_last_modification_time(meta);
        Self {
            size: meta.len(),
            mtime_secs: ft.seconds(),
        }
    }
}

type ReleaseHook = Box<dyn FnOnce(&File, bool) -> Result<()> + Send>;

/// A file under consideration for formatting during one run.
///
/// Created by a walker, destroyed after `release()` runs. `rel_path` is the
/// stable cache key; it is never empty and unique within a run.
pub struct File {
    /// Absolute filesystem path.
    pub path: PathBuf,
    /// Path relative to the tree root. The cache key.
    pub rel_path: PathBuf,
    /// Populated when formatting from stdin via a temp file; the formatter
    /// is invoked on this path instead of `path`.
    pub tmp_path: Option<PathBuf>,
    /// Size + mtime captured at traversal time. Never mutated after creation.
    pub info: Info,
    /// Size + mtime captured after formatters ran, if any did.
    pub formatted_info: Option<Info>,
    /// Digest identifying the exact ordered set of formatter+config+binary
    /// that was (or will be) applied to this file.
    pub formatters_signature: Option<[u8; 16]>,
    /// The format signature persisted from a prior run, if any.
    pub cached_format_signature: Option<[u8; 16]>,
    release_hooks: Vec<ReleaseHook>,
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("rel_path", &self.rel_path)
            .field("tmp_path", &self.tmp_path)
            .field("info", &self.info)
            .field("formatted_info", &self.formatted_info)
            .finish()
    }
}

impl File {
    /// Construct a new file, freshly observed by a walker.
    pub fn new(path: PathBuf, rel_path: PathBuf, info: Info) -> Self {
        assert!(!rel_path.as_os_str().is_empty(), "rel_path must not be empty");
        Self {
            path,
            rel_path,
            tmp_path: None,
            info,
            formatted_info: None,
            formatters_signature: None,
            cached_format_signature: None,
            release_hooks: Vec::new(),
        }
    }

    /// The path formatters should actually be invoked on: the temp path if
    /// this file came from stdin, the real path otherwise.
    pub fn format_path(&self) -> &std::path::Path {
        self.tmp_path.as_deref().unwrap_or(&self.path)
    }

    /// Re-stat the file and report whether it changed (size or
    /// floor-to-second mtime differs from `info`).
    pub fn stat(&self) -> Result<(bool, Info)> {
        let new_info = Info::stat(&self.path)?;
        let changed = new_info.size != self.info.size || new_info.mtime_secs != self.info.mtime_secs;
        Ok((changed, new_info))
    }

    /// Append a release hook. Hooks run in insertion order, exactly once,
    /// after every formatter on this file's batch has completed.
    pub fn add_release_hook(&mut self, hook: ReleaseHook) {
        self.release_hooks.push(hook);
    }

    /// Run every release hook in insertion order. The first error aborts
    /// the chain; `no_cache` is forwarded to every hook so a cache-updating
    /// hook can skip writing when the batch failed.
    pub fn release(&mut self, no_cache: bool) -> Result<()> {
        for hook in self.release_hooks.drain(..) {
            hook(self, no_cache)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn release_hooks_run_once_in_order() {
        let mut file = File::new(
            PathBuf::from("/tmp/a"),
            PathBuf::from("a"),
            Info { size: 0, mtime_secs: 0 },
        );
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            file.add_release_hook(Box::new(move |_, _| {
                order.lock().unwrap().push(i);
                Ok(())
            }));
        }
        file.release(false).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        // A second release is a no-op: hooks were drained.
        file.release(false).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn first_hook_error_aborts_the_chain() {
        let mut file = File::new(
            PathBuf::from("/tmp/a"),
            PathBuf::from("a"),
            Info { size: 0, mtime_secs: 0 },
        );
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        file.add_release_hook(Box::new(move |_, _| {
            ran2.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("boom")
        }));
        let ran3 = ran.clone();
        file.add_release_hook(Box::new(move |_, _| {
            ran3.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert!(file.release(false).is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic]
    fn empty_rel_path_panics() {
        File::new(
            PathBuf::from("/tmp/a"),
            PathBuf::new(),
            Info { size: 0, mtime_secs: 0 },
        );
    }
}
