//! Decorates any `Reader` with cache lookups: attaches the previously
//! recorded format signature to each file as it streams past, and queues a
//! background write-back of freshly computed signatures once files are
//! released.

use crate::cache::Cache;
use crate::file::File;
use crate::walk::Reader;
use anyhow::Result;
use crossbeam_channel::{bounded, Sender};
use log::warn;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

/// One pending write to the `paths` namespace, queued by a file's release
/// hook and drained by a single background writer thread.
struct PendingWrite {
    rel_path: PathBuf,
    signature: [u8; 16],
}

pub struct CachedWalker<R: Reader> {
    inner: R,
    cache: Arc<Cache>,
    tx: Option<Sender<PendingWrite>>,
    writer: Option<JoinHandle<()>>,
}

impl<R: Reader> CachedWalker<R> {
    /// Wrap `inner`, reading prior signatures from and queuing new ones into
    /// `cache`. `channel_capacity` bounds the write-back queue.
    pub fn new(inner: R, cache: Arc<Cache>, channel_capacity: usize) -> Self {
        let (tx, rx) = bounded::<PendingWrite>(channel_capacity);
        let writer_cache = cache.clone();
        let writer = std::thread::spawn(move || {
            let mut buf = Vec::new();
            for pending in rx.iter() {
                buf.push((pending.rel_path, pending.signature));
                if buf.len() >= crate::cache::BATCH_SIZE {
                    if let Err(err) = writer_cache.put_paths_batch(&buf) {
                        warn!("cache write-back failed: {err}");
                    }
                    buf.clear();
                }
            }
            if !buf.is_empty() {
                if let Err(err) = writer_cache.put_paths_batch(&buf) {
                    warn!("cache write-back failed: {err}");
                }
            }
        });

        Self {
            inner,
            cache,
            tx: Some(tx),
            writer: Some(writer),
        }
    }

    /// Stop accepting writes and wait for the background writer to drain.
    /// Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.tx.take();
        if let Some(handle) = self.writer.take() {
            handle.join().map_err(|_| anyhow::anyhow!("cache writer thread panicked"))?;
        }
        Ok(())
    }
}

impl<R: Reader> Reader for CachedWalker<R> {
    fn read(&mut self, out: &mut Vec<File>) -> Result<usize> {
        let start = out.len();
        let n = self.inner.read(out)?;
        let Some(tx) = self.tx.clone() else {
            return Ok(n);
        };
        for file in &mut out[start..] {
            // Stdin-backed files are a synthetic, one-off `rel_path` (the
            // caller's pseudo-path) that isn't tied to real tree content;
            // looking it up or writing it back would just pollute the
            // cache for whatever real file happens to share that name.
            if file.tmp_path.is_some() {
                continue;
            }
            file.cached_format_signature = self.cache.get_path_signature(&file.rel_path)?;

            let rel_path = file.rel_path.clone();
            let tx = tx.clone();
            file.add_release_hook(Box::new(move |file, no_cache| {
                if no_cache {
                    return Ok(());
                }
                if let Some(sig) = file.formatters_signature {
                    let _ = tx.send(PendingWrite { rel_path, signature: sig });
                }
                Ok(())
            }));
        }
        Ok(n)
    }
}

impl<R: Reader> Drop for CachedWalker<R> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Info;
    use std::path::PathBuf;

    struct Fixed(Vec<File>);
    impl Reader for Fixed {
        fn read(&mut self, out: &mut Vec<File>) -> Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let n = self.0.len();
            out.append(&mut self.0);
            Ok(n)
        }
    }

    fn file(name: &str) -> File {
        File::new(
            PathBuf::from(name),
            PathBuf::from(name),
            Info { size: 0, mtime_secs: 0 },
        )
    }

    #[test]
    fn attaches_cached_signature_when_present() {
        let cache = Arc::new(Cache::temporary().unwrap());
        cache
            .put_paths_batch(&[(PathBuf::from("a"), [9u8; 16])])
            .unwrap();

        let mut walker = CachedWalker::new(Fixed(vec![file("a"), file("b")]), cache, 16);
        let mut out = Vec::new();
        walker.read(&mut out).unwrap();
        assert_eq!(out[0].cached_format_signature, Some([9u8; 16]));
        assert_eq!(out[1].cached_format_signature, None);
        walker.close().unwrap();
    }

    #[test]
    fn release_hook_writes_back_new_signature() {
        let cache = Arc::new(Cache::temporary().unwrap());
        let mut walker = CachedWalker::new(Fixed(vec![file("a")]), cache.clone(), 16);
        let mut out = Vec::new();
        walker.read(&mut out).unwrap();
        out[0].formatters_signature = Some([1u8; 16]);
        out[0].release(false).unwrap();
        walker.close().unwrap();

        assert_eq!(
            cache.get_path_signature(std::path::Path::new("a")).unwrap(),
            Some([1u8; 16])
        );
    }

    #[test]
    fn no_cache_release_skips_write_back() {
        let cache = Arc::new(Cache::temporary().unwrap());
        let mut walker = CachedWalker::new(Fixed(vec![file("a")]), cache.clone(), 16);
        let mut out = Vec::new();
        walker.read(&mut out).unwrap();
        out[0].formatters_signature = Some([1u8; 16]);
        out[0].release(true).unwrap();
        walker.close().unwrap();

        assert_eq!(cache.get_path_signature(std::path::Path::new("a")).unwrap(), None);
    }
}
