//! Filesystem walker: gitignore-aware traversal of one or more absolute
//! paths under a tree root, built on `ignore::WalkBuilder` the same way the
//! teacher crate already did for its tree walk.

use crate::file::{File, Info};
use crate::walk::{Cancel, Cancelled, Reader};
use anyhow::Result;
use crossbeam_channel::{bounded, Receiver};
use ignore::WalkBuilder;
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

/// Walks `paths` (all required to be under `root`) on a background thread,
/// skipping directories and symlinks, and rejecting any path whose cleaned
/// form is not a prefix of `root`.
pub struct FsWalker {
    rx: Receiver<File>,
    handle: Option<JoinHandle<()>>,
    cancel: Cancel,
}

impl FsWalker {
    /// Spawn the background traversal. `channel_capacity` bounds the
    /// in-memory queue between the producer thread and `read()`.
    pub fn spawn(
        root: PathBuf,
        paths: Vec<PathBuf>,
        hidden: bool,
        channel_capacity: usize,
        cancel: Cancel,
    ) -> Self {
        let (tx, rx) = bounded(channel_capacity);
        let producer_cancel = cancel.clone();
        let handle = std::thread::spawn(move || {
            let cancel = producer_cancel;
            let paths: Vec<PathBuf> = paths
                .into_iter()
                .filter(|p| {
                    let ok = p.starts_with(&root);
                    if !ok {
                        warn!("ignoring path {} outside tree root {}", p.display(), root.display());
                    }
                    ok
                })
                .collect();
            if paths.is_empty() {
                return;
            }

            let mut builder = WalkBuilder::new(&paths[0]);
            for p in &paths[1..] {
                builder.add(p);
            }
            builder.hidden(!hidden);
            builder.standard_filters(true);

            for entry in builder.build() {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                match entry {
                    Ok(dir_entry) => {
                        let Some(file_type) = dir_entry.file_type() else {
                            warn!("couldn't get file type for {:?}", dir_entry.path());
                            continue;
                        };
                        if file_type.is_dir() || file_type.is_symlink() {
                            continue;
                        }
                        let path = dir_entry.path().to_path_buf();
                        let rel_path = match path.strip_prefix(&root) {
                            Ok(p) => p.to_path_buf(),
                            Err(_) => continue,
                        };
                        let info = match dir_entry
                            .metadata()
                            .ok()
                            .map(|m| Info::from_metadata(&m))
                        {
                            Some(info) => info,
                            None => continue,
                        };
                        if tx.send(File::new(path, rel_path, info)).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!("traversal error: {err}"),
                }
            }
        });
        Self {
            rx,
            handle: Some(handle),
            cancel,
        }
    }
}

impl Reader for FsWalker {
    fn read(&mut self, out: &mut Vec<File>) -> Result<usize> {
        let cap = out.capacity().max(1);
        let mut n = 0;
        while n < cap {
            match self.rx.recv() {
                Ok(file) => {
                    out.push(file);
                    n += 1;
                }
                Err(_) => break,
            }
        }
        // The producer thread stops sending (and the channel disconnects)
        // both on cancellation and on normal exhaustion; only the cancel
        // flag tells them apart. A partial batch is returned as-is; the
        // next call sees the disconnected channel again and, if cancelled,
        // reports it instead of a second identical EOF.
        if n == 0 && self.cancel.load(Ordering::Relaxed) {
            return Err(Cancelled.into());
        }
        Ok(n)
    }
}

impl Drop for FsWalker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Reject any path whose `path-clean`-normalized form is not a prefix of
/// `root`; used by callers before handing paths to the walker.
pub fn is_within_root(path: &Path, root: &Path) -> bool {
    let cleaned: PathBuf = path_clean::clean(path.to_string_lossy().as_ref()).into();
    cleaned.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn drain(walker: &mut FsWalker) -> Vec<File> {
        let mut all = Vec::new();
        loop {
            let mut buf = Vec::with_capacity(16);
            let n = walker.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            all.extend(buf);
        }
        all
    }

    #[test]
    fn walks_plain_files_skipping_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(&tmp.path().join("a.py"), "x");
        write_file(&tmp.path().join("sub/b.py"), "x");

        let mut walker = FsWalker::spawn(
            tmp.path().to_path_buf(),
            vec![tmp.path().to_path_buf()],
            false,
            16,
            Arc::new(AtomicBool::new(false)),
        );
        let files = drain(&mut walker);
        let mut rels: Vec<_> = files.iter().map(|f| f.rel_path.clone()).collect();
        rels.sort();
        assert_eq!(rels, vec![PathBuf::from("a.py"), PathBuf::from("sub/b.py")]);
    }

    #[test]
    fn skips_hidden_unless_requested() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(&tmp.path().join(".hidden.py"), "x");
        write_file(&tmp.path().join("visible.py"), "x");

        let mut walker = FsWalker::spawn(
            tmp.path().to_path_buf(),
            vec![tmp.path().to_path_buf()],
            false,
            16,
            Arc::new(AtomicBool::new(false)),
        );
        let files = drain(&mut walker);
        assert_eq!(files.len(), 1);

        let mut walker = FsWalker::spawn(
            tmp.path().to_path_buf(),
            vec![tmp.path().to_path_buf()],
            true,
            16,
            Arc::new(AtomicBool::new(false)),
        );
        let files = drain(&mut walker);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn path_outside_root_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        write_file(&outside.join("a.py"), "x");

        let mut walker = FsWalker::spawn(
            root.clone(),
            vec![outside],
            false,
            16,
            Arc::new(AtomicBool::new(false)),
        );
        let files = drain(&mut walker);
        assert!(files.is_empty());
    }

    #[test]
    fn is_within_root_rejects_dotdot_escapes() {
        let root = Path::new("/a/b");
        assert!(is_within_root(Path::new("/a/b/c"), root));
        assert!(!is_within_root(Path::new("/a/b/../c"), root));
    }

    #[test]
    fn cancellation_is_reported_distinctly_from_eof() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(&tmp.path().join("a.py"), "x");

        let cancel = Arc::new(AtomicBool::new(true));
        let mut walker = FsWalker::spawn(
            tmp.path().to_path_buf(),
            vec![tmp.path().to_path_buf()],
            false,
            16,
            cancel,
        );
        let mut out = Vec::with_capacity(16);
        let err = walker.read(&mut out).unwrap_err();
        assert!(err.downcast_ref::<Cancelled>().is_some());
    }
}
