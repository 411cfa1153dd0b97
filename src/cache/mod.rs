//! The incremental cache: a two-namespace, on-disk key-value store scoped
//! per tree root.
//!
//! `paths` maps `rel_path -> format signature` (16-byte MD5 digest).
//! `formatters` maps `formatter name -> {size, mtime}`, the legacy
//! path-invalidation input: whenever a formatter's own identity changes, its
//! previously cached paths are wiped.
//!
//! Backed by `sled`, an embedded pure-Rust KV store; a `sled::Tree` is the
//! natural analogue of the two namespaces this cache needs.

use crate::formatter::Formatter;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest as Sha1Digest, Sha1};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Bound on how many path entries accumulate before a write transaction is
/// flushed, and how long a read transaction is allowed to stay open before
/// it is closed and reopened so it doesn't block writers.
pub const BATCH_SIZE: usize = 1024;

/// Metadata recorded about a formatter's executable, used purely to decide
/// whether the formatter changed since the last run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatterInfo {
    /// Executable size in bytes.
    pub exe_size: u64,
    /// Executable mtime, in whole seconds since the epoch.
    pub exe_mtime_secs: i64,
}

/// The on-disk incremental cache for one tree root.
pub struct Cache {
    db: sled::Db,
    paths: sled::Tree,
    formatters: sled::Tree,
    /// None when this is a real, persisted cache; Some(path) when it's a
    /// throwaway temp database that should be deleted on close.
    temp_dir: Option<tempfile::TempDir>,
}

impl Cache {
    /// Open (creating if needed) the persistent cache database for
    /// `tree_root`, rooted under `cache_dir`
    /// (`<xdg_cache_dir>/treefmt/eval-cache/`).
    pub fn open(cache_dir: &Path, tree_root: &Path) -> Result<Self> {
        let db_path = db_path(cache_dir, tree_root);
        std::fs::create_dir_all(cache_dir)
            .with_context(|| format!("creating cache directory {}", cache_dir.display()))?;
        let db = sled::open(&db_path).with_context(|| format!("opening cache db at {}", db_path.display()))?;
        Self::from_db(db, None)
    }

    /// A throwaway cache backed by a temp directory, used when the real
    /// cache is disabled or failed to open.
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::tempdir().context("creating temporary cache directory")?;
        let db = sled::open(dir.path().join("eval-cache.db"))
            .context("opening temporary cache db")?;
        Self::from_db(db, Some(dir))
    }

    fn from_db(db: sled::Db, temp_dir: Option<tempfile::TempDir>) -> Result<Self> {
        let paths = db.open_tree("paths").context("opening paths tree")?;
        let formatters = db.open_tree("formatters").context("opening formatters tree")?;
        Ok(Self {
            db,
            paths,
            formatters,
            temp_dir,
        })
    }

    /// Look up the cached format signature for a path, if any.
    pub fn get_path_signature(&self, rel_path: &Path) -> Result<Option<[u8; 16]>> {
        let key = path_key(rel_path);
        match self.paths.get(key)? {
            Some(bytes) if bytes.len() == 16 => {
                let mut sig = [0u8; 16];
                sig.copy_from_slice(&bytes);
                Ok(Some(sig))
            }
            Some(_) | None => Ok(None),
        }
    }

    /// Atomically insert-or-replace a batch of `(rel_path, signature)`
    /// entries. Batches bounded by `BATCH_SIZE` bound transaction cost.
    pub fn put_paths_batch(&self, entries: &[(PathBuf, [u8; 16])]) -> Result<()> {
        for chunk in entries.chunks(BATCH_SIZE) {
            let mut batch = sled::Batch::default();
            for (rel_path, sig) in chunk {
                batch.insert(path_key(rel_path), sig.as_slice());
            }
            self.paths.apply_batch(batch)?;
        }
        Ok(())
    }

    /// Wipe every path entry. Called whenever a formatter is added, removed
    /// or modified.
    pub fn clear_paths(&self) -> Result<()> {
        self.paths.clear()?;
        Ok(())
    }

    /// Iterate over every recorded formatter's info.
    pub fn for_each_formatter(&self, mut f: impl FnMut(&str, &FormatterInfo)) -> Result<()> {
        for entry in self.formatters.iter() {
            let (key, value) = entry?;
            let name = String::from_utf8_lossy(&key).into_owned();
            let info: FormatterInfo = serde_json::from_slice(&value)?;
            f(&name, &info);
        }
        Ok(())
    }

    /// Record (or update) one formatter's info.
    pub fn put_formatter(&self, name: &str, info: &FormatterInfo) -> Result<()> {
        let bytes = serde_json::to_vec(info)?;
        self.formatters.insert(name.as_bytes(), bytes)?;
        Ok(())
    }

    /// Remove a formatter's recorded info.
    pub fn delete_formatter(&self, name: &str) -> Result<()> {
        self.formatters.remove(name.as_bytes())?;
        Ok(())
    }

    /// Reconcile the `formatters` namespace against the currently
    /// configured set, wiping all path entries (cache invalidation) for any
    /// formatter that was added, removed or whose identity changed.
    ///
    /// The "identity" compared here is the executable's size and mtime:
    /// options/priority/name changes already produce a different
    /// formatters-signature at the scheduler layer, which is a stronger and
    /// more local invalidation than this blanket wipe; this namespace is
    /// kept for parity with the cache contract in the data model and to
    /// catch drive-by executable upgrades even when config is untouched.
    pub fn update_formatters(&self, formatters: &BTreeMap<String, Formatter>) -> Result<()> {
        let mut previous = BTreeMap::new();
        self.for_each_formatter(|name, info| {
            previous.insert(name.to_string(), info.clone());
        })?;

        let mut changed = false;
        let mut seen = std::collections::BTreeSet::new();
        for (name, fmt) in formatters {
            seen.insert(name.clone());
            let meta = std::fs::metadata(&fmt.command)
                .with_context(|| format!("stat formatter #{name} executable"))?;
            let mtime = filetime::FileTime::from_last_modification_time(&meta);
            let info = FormatterInfo {
                exe_size: meta.len(),
                exe_mtime_secs: mtime.seconds(),
            };
            if previous.get(name) != Some(&info) {
                changed = true;
            }
            self.put_formatter(name, &info)?;
        }
        for name in previous.keys() {
            if !seen.contains(name) {
                changed = true;
                self.delete_formatter(name)?;
            }
        }
        if changed {
            self.clear_paths()?;
        }
        Ok(())
    }

    /// Flush buffered writes to disk without consuming the cache. Safe to
    /// call while other `Arc<Cache>` handles are still alive.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Flush to disk and close. If this was a temporary cache, the backing
    /// directory is removed.
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.paths);
        drop(self.formatters);
        drop(self.db);
        drop(self.temp_dir);
        Ok(())
    }
}

fn path_key(rel_path: &Path) -> Vec<u8> {
    rel_path.to_string_lossy().into_owned().into_bytes()
}

/// Where `Cache::open` would put `tree_root`'s database under `cache_dir`.
/// Exposed so callers can remove it wholesale for `--clear-cache`.
pub fn db_path(cache_dir: &Path, tree_root: &Path) -> PathBuf {
    cache_dir.join(format!("{}.db", tree_root_hash(tree_root)))
}

/// `<xdg_cache>/treefmt/eval-cache/<sha1(tree_root_hex)>.db`'s filename stem.
fn tree_root_hash(tree_root: &Path) -> String {
    let mut hasher = Sha1::new();
    hasher.update(tree_root.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_path_signatures() {
        let cache = Cache::temporary().unwrap();
        let sig = [7u8; 16];
        cache
            .put_paths_batch(&[(PathBuf::from("a.py"), sig)])
            .unwrap();
        assert_eq!(cache.get_path_signature(Path::new("a.py")).unwrap(), Some(sig));
        assert_eq!(cache.get_path_signature(Path::new("b.py")).unwrap(), None);
    }

    #[test]
    fn clear_paths_wipes_everything() {
        let cache = Cache::temporary().unwrap();
        cache
            .put_paths_batch(&[(PathBuf::from("a.py"), [1u8; 16])])
            .unwrap();
        cache.clear_paths().unwrap();
        assert_eq!(cache.get_path_signature(Path::new("a.py")).unwrap(), None);
    }

    #[test]
    fn formatter_roundtrip() {
        let cache = Cache::temporary().unwrap();
        let info = FormatterInfo {
            exe_size: 123,
            exe_mtime_secs: 456,
        };
        cache.put_formatter("black", &info).unwrap();
        let mut seen = Vec::new();
        cache
            .for_each_formatter(|name, i| seen.push((name.to_string(), i.clone())))
            .unwrap();
        assert_eq!(seen, vec![("black".to_string(), info)]);

        cache.delete_formatter("black").unwrap();
        let mut seen = Vec::new();
        cache.for_each_formatter(|name, i| seen.push((name.to_string(), i.clone()))).unwrap();
        assert!(seen.is_empty());
    }

    #[test]
    fn tree_root_hash_is_stable() {
        let a = tree_root_hash(Path::new("/some/tree"));
        let b = tree_root_hash(Path::new("/some/tree"));
        let c = tree_root_hash(Path::new("/some/other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 40);
    }
}
