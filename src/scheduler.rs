//! Batches files by their exact ordered formatter sequence and dispatches
//! each batch to a worker pool once it's full or the run is closing.
//!
//! A batch key is the priority-then-name-sorted, colon-joined list of
//! formatter names that apply to a file; every file sharing a key is
//! guaranteed to run through the same formatters in the same order, so they
//! can be formatted together in one subprocess invocation per formatter.

use crate::file::File;
use crate::formatter::Formatter;
use crate::stats::Stats;
use crate::walk::Cancel;
use anyhow::Result;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Files are dispatched as soon as a batch reaches this size, independent of
/// how many more files are still being discovered by the walker. Kept as an
/// internal constant; not exposed on the CLI or config schema.
pub const BATCH_SIZE: usize = 1024;

/// Outcome of submitting one file to the scheduler.
pub enum Submission {
    /// Queued for formatting (possibly dispatched immediately if the batch
    /// filled up).
    Queued,
    /// The file's cached signature already matches what this run would
    /// produce; nothing to do. The file is handed back so the caller can
    /// release it (with `no_cache = true`, since its signature is already
    /// current and doesn't need rewriting).
    CacheHit(File),
}

struct Batch {
    formatters: Vec<Arc<Formatter>>,
    files: Vec<File>,
}

struct SchedulerState {
    batches: BTreeMap<String, Batch>,
    signatures: BTreeMap<String, [u8; 16]>,
}

/// Shared handle used by in-flight dispatch closures to report completion.
struct Pending {
    count: Mutex<usize>,
    done: Condvar,
}

impl Pending {
    fn increment(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.done.notify_all();
        }
    }

    fn wait_for_zero(&self) {
        let mut count = self.count.lock().unwrap();
        while *count != 0 {
            count = self.done.wait(count).unwrap();
        }
    }
}

pub struct Scheduler {
    tree_root: PathBuf,
    pool: rayon::ThreadPool,
    state: Mutex<SchedulerState>,
    pending: Arc<Pending>,
    format_error: Arc<AtomicBool>,
    changed: Arc<AtomicUsize>,
    stats: Arc<Stats>,
    cancel: Cancel,
}

impl Scheduler {
    /// `num_threads` is typically `std::thread::available_parallelism()`.
    /// `cancel` is forwarded to every formatter invocation so an in-flight
    /// subprocess can be interrupted on SIGINT/SIGTERM.
    pub fn new(tree_root: PathBuf, stats: Arc<Stats>, num_threads: usize, cancel: Cancel) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .build()?;
        Ok(Self {
            tree_root,
            pool,
            state: Mutex::new(SchedulerState {
                batches: BTreeMap::new(),
                signatures: BTreeMap::new(),
            }),
            pending: Arc::new(Pending {
                count: Mutex::new(0),
                done: Condvar::new(),
            }),
            format_error: Arc::new(AtomicBool::new(false)),
            changed: Arc::new(AtomicUsize::new(0)),
            stats,
            cancel,
        })
    }

    /// Submit one file along with the formatters that matched it. Files are
    /// grouped into batches by their exact ordered formatter sequence and
    /// dispatched once a batch reaches `BATCH_SIZE`.
    pub fn submit(&self, mut file: File, mut matches: Vec<Arc<Formatter>>) -> Result<Submission> {
        matches.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        let key = batch_key(&matches);

        let mut state = self.state.lock().unwrap();
        let signature = match state.signatures.get(&key) {
            Some(sig) => *sig,
            None => {
                let sig = formatters_signature(&matches)?;
                state.signatures.insert(key.clone(), sig);
                sig
            }
        };
        file.formatters_signature = Some(signature);

        let desired_sig = format_signature(signature, &file.info);
        if file.cached_format_signature == Some(desired_sig) {
            return Ok(Submission::CacheHit(file));
        }

        let batch = state.batches.entry(key.clone()).or_insert_with(|| Batch {
            formatters: matches.clone(),
            files: Vec::new(),
        });
        batch.files.push(file);

        if batch.files.len() >= BATCH_SIZE {
            let batch = state.batches.remove(&key).unwrap();
            drop(state);
            self.dispatch(batch);
        }

        Ok(Submission::Queued)
    }

    fn dispatch(&self, batch: Batch) {
        self.pending.increment();
        let tree_root = self.tree_root.clone();
        let format_error = self.format_error.clone();
        let changed = self.changed.clone();
        let stats = self.stats.clone();
        let pending = self.pending.clone();
        let cancel = self.cancel.clone();

        self.pool.spawn(move || {
            let Batch { formatters, mut files } = batch;
            let refs: Vec<&File> = files.iter().collect();
            let mut failed = false;
            for formatter in &formatters {
                if let Err(err) = formatter.apply(&tree_root, &refs, &cancel) {
                    log::error!(
                        "{} {err}",
                        crate::logging::formatter_prefix(&formatter.name, log::Level::Error)
                    );
                    failed = true;
                }
            }
            if failed {
                format_error.store(true, Ordering::SeqCst);
            }
            stats.add_formatted(files.len());

            for file in &mut files {
                match file.stat() {
                    Ok((file_changed, new_info)) => {
                        if file_changed {
                            changed.fetch_add(1, Ordering::Relaxed);
                            stats.inc_changed();
                            file.formatted_info = Some(new_info);
                        }
                    }
                    Err(err) => log::warn!("re-stat after formatting failed: {err}"),
                }
                // Re-derive the signature from the post-format info (size/mtime
                // as they'll be observed on the *next* run) so the cached walker
                // persists a signature that actually matches next run's stat.
                if let Some(fmt_sig) = file.formatters_signature {
                    let final_info = file.formatted_info.unwrap_or(file.info);
                    file.formatters_signature = Some(format_signature(fmt_sig, &final_info));
                }
                if let Err(err) = file.release(failed) {
                    log::error!("release hook failed for {}: {err}", file.rel_path.display());
                }
            }
            pending.decrement();
        });
    }

    /// Flush every partial batch and block until every dispatched batch has
    /// finished. Returns `true` if any formatter invocation failed.
    pub fn close(&self) -> Result<bool> {
        let remaining: Vec<Batch> = {
            let mut state = self.state.lock().unwrap();
            let keys: Vec<String> = state.batches.keys().cloned().collect();
            keys.into_iter()
                .map(|k| state.batches.remove(&k).unwrap())
                .collect()
        };
        for batch in remaining {
            self.dispatch(batch);
        }
        self.pending.wait_for_zero();
        Ok(self.format_error.load(Ordering::SeqCst))
    }

    /// Total number of files whose content changed during this run.
    pub fn changed_count(&self) -> usize {
        self.changed.load(Ordering::Relaxed)
    }
}

/// The batch key: formatter names already sorted by (priority, name),
/// colon-joined.
fn batch_key(matches: &[Arc<Formatter>]) -> String {
    matches
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(":")
}

/// The MD5 digest identifying this exact ordered sequence of formatters.
fn formatters_signature(matches: &[Arc<Formatter>]) -> Result<[u8; 16]> {
    let mut hasher = Md5::new();
    for formatter in matches {
        formatter.hash_into(&mut hasher)?;
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// The format signature: `MD5(formatters_signature ‖ mtime ‖ size)`. A file
/// is considered already-formatted when a freshly computed one matches the
/// signature persisted from a prior run.
fn format_signature(formatters_sig: [u8; 16], info: &crate::file::Info) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(formatters_sig);
    hasher.update(info.mtime_secs.to_le_bytes());
    hasher.update(info.size.to_le_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormatterConfig;
    use crate::file::Info;
    use std::fs::File as StdFile;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_fake_binary(path: &Path) {
        let mut f = StdFile::create(path).unwrap();
        f.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        let mut perms = f.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        f.set_permissions(perms).unwrap();
    }

    fn make_formatter(tmp: &Path, name: &str, priority: i32) -> Arc<Formatter> {
        let bin = tmp.join(format!("{name}-bin"));
        write_fake_binary(&bin);
        let cfg = FormatterConfig {
            command: bin.display().to_string(),
            options: vec![],
            includes: vec!["*".into()],
            excludes: vec![],
            priority,
        };
        Arc::new(Formatter::construct(tmp, name, &cfg).unwrap())
    }

    fn file(tmp: &Path, name: &str) -> File {
        let path = tmp.join(name);
        std::fs::write(&path, "x").unwrap();
        File::new(path.clone(), PathBuf::from(name), Info::stat(&path).unwrap())
    }

    #[test]
    fn batch_key_is_sorted_and_colon_joined() {
        let tmp = tempfile::tempdir().unwrap();
        let a = make_formatter(tmp.path(), "zeta", 0);
        let b = make_formatter(tmp.path(), "alpha", 0);
        assert_eq!(batch_key(&[a, b]), "zeta:alpha");
    }

    #[test]
    fn cache_hit_short_circuits_formatting() {
        let tmp = tempfile::tempdir().unwrap();
        let fmt = make_formatter(tmp.path(), "noop", 0);
        let stats = Arc::new(Stats::new());
        let cancel: Cancel = Arc::new(AtomicBool::new(false));
        let scheduler = Scheduler::new(tmp.path().to_path_buf(), stats, 1, cancel).unwrap();

        let mut f = file(tmp.path(), "a.txt");
        let sig = formatters_signature(&[fmt.clone()]).unwrap();
        f.cached_format_signature = Some(format_signature(sig, &f.info));

        match scheduler.submit(f, vec![fmt]).unwrap() {
            Submission::CacheHit(returned) => assert_eq!(returned.rel_path, PathBuf::from("a.txt")),
            Submission::Queued => panic!("expected a cache hit"),
        }
        assert!(!scheduler.close().unwrap());
        assert_eq!(scheduler.changed_count(), 0);
    }

    #[test]
    fn stale_cached_signature_is_not_a_cache_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let fmt = make_formatter(tmp.path(), "noop", 0);
        let stats = Arc::new(Stats::new());
        let cancel: Cancel = Arc::new(AtomicBool::new(false));
        let scheduler = Scheduler::new(tmp.path().to_path_buf(), stats, 1, cancel).unwrap();

        let mut f = file(tmp.path(), "a.txt");
        let sig = formatters_signature(&[fmt.clone()]).unwrap();
        // A signature computed against a different mtime/size (as if the file
        // had been edited since it was last cached) must not short-circuit.
        let stale_info = crate::file::Info {
            size: f.info.size + 1,
            mtime_secs: f.info.mtime_secs,
        };
        f.cached_format_signature = Some(format_signature(sig, &stale_info));

        match scheduler.submit(f, vec![fmt]).unwrap() {
            Submission::Queued => {}
            Submission::CacheHit(_) => panic!("stale signature must not cache-hit"),
        }
    }

    #[test]
    fn close_flushes_partial_batches_and_reports_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let fmt = make_formatter(tmp.path(), "noop", 0);
        let stats = Arc::new(Stats::new());
        let cancel: Cancel = Arc::new(AtomicBool::new(false));
        let scheduler = Scheduler::new(tmp.path().to_path_buf(), stats, 2, cancel).unwrap();

        let f = file(tmp.path(), "a.txt");
        matches!(scheduler.submit(f, vec![fmt]).unwrap(), Submission::Queued);
        let failed = scheduler.close().unwrap();
        assert!(!failed);
    }
}
