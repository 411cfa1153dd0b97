//! The composite formatter: wires together config, formatters, cache,
//! walker and scheduler into one run, the way `numtide-treefmt`'s
//! `run_treefmt` did, but restructured into a streaming
//! walker → cached-walker → scheduler pipeline instead of one
//! walk-everything-then-batch-by-name pass.

use crate::cache::Cache;
use crate::cached_walker::CachedWalker;
use crate::config::{FormatterConfig, OnUnmatched, Root};
use crate::error::TreefmtError;
use crate::formatter::Formatter;
use crate::matcher::Matcher;
use crate::scheduler::{Scheduler, Submission};
use crate::stats::Stats;
use crate::walk::{self, Cancel, Reader, Source};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Knobs derived from the CLI that aren't part of `treefmt.toml` itself.
pub struct RunOptions {
    pub tree_root: PathBuf,
    pub cache_dir: PathBuf,
    pub no_cache: bool,
    pub clear_cache: bool,
    pub hidden: bool,
    /// Restrict traversal to these paths (must resolve under `tree_root`).
    /// Empty means "the whole tree".
    pub paths: Vec<PathBuf>,
    pub stdin_pseudo_path: Option<PathBuf>,
    pub num_threads: usize,
    pub channel_capacity: usize,
    pub cancel: Cancel,
}

/// One fully-constructed run, ready to walk the tree.
pub struct Engine {
    tree_root: PathBuf,
    global_matcher: Matcher,
    formatters: BTreeMap<String, Arc<Formatter>>,
    on_unmatched: OnUnmatched,
    fail_on_change: bool,
    reader: Box<dyn Reader>,
    scheduler: Scheduler,
    stats: Arc<Stats>,
    cache: Arc<Cache>,
    /// Stdin mode writes the formatted file to stdout; the stats line must
    /// stay off stdout so it doesn't end up mixed into that output.
    stdin_mode: bool,
}

impl Engine {
    /// Validate the config, resolve every formatter, open the cache and
    /// build the walker for this run. Nothing is read from the tree yet.
    pub fn build(cfg: &Root, opts: RunOptions) -> Result<Self, TreefmtError> {
        cfg.validate().map_err(TreefmtError::Config)?;

        let global_matcher = Matcher::compile("<global>", &["**".to_string()], &cfg.effective_excludes())
            .map_err(TreefmtError::Config)?;

        let mut formatters = BTreeMap::new();
        let wanted: Option<&Vec<String>> = cfg.formatters.as_ref();
        for (name, fcfg) in &cfg.formatter {
            if let Some(wanted) = wanted {
                if !wanted.contains(name) {
                    continue;
                }
            }
            match construct_formatter(&opts.tree_root, name, fcfg) {
                Ok(formatter) => {
                    formatters.insert(name.clone(), Arc::new(formatter));
                }
                Err(err) => {
                    if cfg.allow_missing_formatter {
                        warn!("formatter #{name} unavailable, skipping: {err}");
                    } else {
                        return Err(TreefmtError::MissingFormatter {
                            name: name.clone(),
                            source: err,
                        });
                    }
                }
            }
        }

        let stats = Arc::new(Stats::new());

        let cache = if opts.no_cache {
            Cache::temporary().map_err(TreefmtError::Cache)?
        } else {
            if opts.clear_cache {
                let _ = std::fs::remove_dir_all(crate::cache::db_path(&opts.cache_dir, &opts.tree_root));
            }
            match Cache::open(&opts.cache_dir, &opts.tree_root) {
                Ok(cache) => cache,
                Err(err) => {
                    warn!("failed to open cache, falling back to no-cache mode: {err}");
                    Cache::temporary().map_err(TreefmtError::Cache)?
                }
            }
        };
        cache.update_formatters(&deref_formatters(&formatters)).map_err(TreefmtError::Cache)?;
        let cache = Arc::new(cache);

        let source = match &opts.stdin_pseudo_path {
            Some(pseudo) => Source::Stdin {
                pseudo_path: pseudo.as_path(),
            },
            None => Source::Paths(opts.paths.clone()),
        };
        let reader = walk::build(
            cfg.walk,
            &opts.tree_root,
            opts.hidden,
            opts.channel_capacity,
            opts.cancel.clone(),
            source,
        )
        .map_err(TreefmtError::Traversal)?;
        let reader: Box<dyn Reader> = Box::new(CachedWalker::new(
            BoxedReader(reader),
            cache.clone(),
            opts.channel_capacity,
        ));

        let scheduler = Scheduler::new(opts.tree_root.clone(), stats.clone(), opts.num_threads, opts.cancel.clone())
            .map_err(TreefmtError::Other)?;
        let stdin_mode = opts.stdin_pseudo_path.is_some();

        Ok(Self {
            tree_root: opts.tree_root,
            global_matcher,
            formatters,
            on_unmatched: cfg.on_unmatched,
            fail_on_change: cfg.fail_on_change,
            reader,
            scheduler,
            stats,
            cache,
            stdin_mode,
        })
    }

    /// Drain the walker, matching and submitting every file, then flush the
    /// scheduler and report the run's final status.
    pub fn run(mut self) -> Result<Arc<Stats>, TreefmtError> {
        let mut buf = Vec::with_capacity(256);
        let mut cancelled = false;
        loop {
            buf.clear();
            let n = match self.reader.read(&mut buf) {
                Ok(n) => n,
                Err(err) if err.downcast_ref::<walk::Cancelled>().is_some() => {
                    cancelled = true;
                    0
                }
                Err(err) => return Err(TreefmtError::Traversal(err)),
            };
            if n == 0 {
                break;
            }
            for mut file in buf.drain(..) {
                self.stats.inc_traversed();

                if !self.global_matcher.is_match(&file.rel_path) {
                    debug!("{} excluded globally", file.rel_path.display());
                    file.release(true).map_err(TreefmtError::Other)?;
                    continue;
                }

                let matches: Vec<Arc<Formatter>> = self
                    .formatters
                    .values()
                    .filter(|f| f.wants(&file.rel_path))
                    .cloned()
                    .collect();

                if matches.is_empty() {
                    log_unmatched(self.on_unmatched, &file.rel_path);
                    if self.on_unmatched == OnUnmatched::Fatal {
                        return Err(TreefmtError::UnmatchedFatal(file.rel_path));
                    }
                    file.release(true).map_err(TreefmtError::Other)?;
                    continue;
                }

                self.stats.inc_matched();
                match self
                    .scheduler
                    .submit(file, matches)
                    .map_err(TreefmtError::Other)?
                {
                    Submission::Queued => {}
                    Submission::CacheHit(mut file) => {
                        // Already up to date: no batch will run it through
                        // a release hook, so release it here ourselves,
                        // with no_cache = true since its signature is
                        // already current and doesn't need rewriting.
                        file.release(true).map_err(TreefmtError::Other)?;
                    }
                }
            }
        }

        let format_error = self.scheduler.close().map_err(TreefmtError::Other)?;
        let changed = self.scheduler.changed_count();

        drop(self.reader); // releases the cached walker's write-back thread
        self.cache.flush().map_err(TreefmtError::Cache)?;

        if !self.stdin_mode {
            self.stats.print_summary();
        }

        if format_error {
            return Err(TreefmtError::FormattingFailures);
        }
        if self.fail_on_change && changed > 0 {
            return Err(TreefmtError::FailOnChange(changed));
        }
        if cancelled {
            return Err(TreefmtError::Cancelled);
        }
        Ok(self.stats)
    }

    pub fn tree_root(&self) -> &Path {
        &self.tree_root
    }
}

/// `walk::build` returns `Box<dyn Reader>`; `CachedWalker<R>` wants a
/// concrete, sized `R`. This newtype lets a boxed trait object itself
/// implement `Reader` so it can be wrapped without an extra enum.
struct BoxedReader(Box<dyn Reader>);

impl Reader for BoxedReader {
    fn read(&mut self, out: &mut Vec<crate::file::File>) -> Result<usize> {
        self.0.read(out)
    }
}

fn construct_formatter(tree_root: &Path, name: &str, cfg: &FormatterConfig) -> Result<Formatter> {
    Formatter::construct(tree_root, name, cfg).with_context(|| format!("constructing formatter #{name}"))
}

fn deref_formatters(formatters: &BTreeMap<String, Arc<Formatter>>) -> BTreeMap<String, Formatter> {
    formatters
        .iter()
        .map(|(k, v)| (k.clone(), (**v).clone()))
        .collect()
}

fn log_unmatched(level: OnUnmatched, rel_path: &Path) {
    let msg = format!("no formatter matched {}", rel_path.display());
    match level {
        OnUnmatched::Debug => debug!("{msg}"),
        OnUnmatched::Info => info!("{msg}"),
        OnUnmatched::Warn => warn!("{msg}"),
        OnUnmatched::Error | OnUnmatched::Fatal => error!("{msg}"),
    }
}
