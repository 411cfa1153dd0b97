//! Stdin walker: buffers stdin into a single temp file under the tree root
//! and yields it as the one and only `File`, with a release hook that
//! streams the (possibly formatted) result back out to real stdout.

use crate::file::{File, Info};
use crate::walk::{Cancel, Cancelled, Reader};
use anyhow::{Context, Result};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

/// Yields exactly one `File` backed by a temp file holding stdin's content,
/// named so include/exclude globs see the extension the caller asked for
/// (e.g. `--stdin foo.py` makes formatters see a `.py` file).
pub struct StdinWalker {
    pending: Option<File>,
    cancel: Cancel,
}

impl StdinWalker {
    /// `pseudo_path` is the path (relative or absolute) the caller claims
    /// this content lives at; only its file name/extension is used to name
    /// the temp file. `root` is the tree root the temp file is created
    /// under, so formatters run with the expected `current_dir`.
    pub fn new(root: &Path, pseudo_path: &Path, cancel: Cancel) -> Result<Self> {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("reading stdin")?;

        let file_name = pseudo_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "stdin".into());
        let suffix = Path::new(&file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut tmp = tempfile::Builder::new()
            .prefix("treefmt-stdin-")
            .suffix(&suffix)
            .tempfile_in(root)
            .context("creating temp file for stdin")?;
        tmp.write_all(&buf).context("writing stdin to temp file")?;
        tmp.flush()?;
        let (tmp_file, tmp_path) = tmp.keep().context("persisting stdin temp file")?;
        drop(tmp_file);

        let rel_path = PathBuf::from(file_name);
        let info = Info::stat(&tmp_path)?;
        let mut file = File::new(tmp_path.clone(), rel_path, info);
        file.tmp_path = Some(tmp_path.clone());

        file.add_release_hook(Box::new(move |file, _no_cache| {
            let contents = std::fs::read(file.format_path())
                .with_context(|| format!("reading formatted stdin output from {:?}", file.format_path()))?;
            io::stdout().write_all(&contents)?;
            io::stdout().flush()?;
            std::fs::remove_file(&tmp_path).ok();
            Ok(())
        }));

        Ok(Self {
            pending: Some(file),
            cancel,
        })
    }
}

impl Reader for StdinWalker {
    fn read(&mut self, out: &mut Vec<File>) -> Result<usize> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Cancelled.into());
        }
        match self.pending.take() {
            Some(file) => {
                out.push(file);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_path_extension_drives_temp_file_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        // can't easily redirect real stdin in a unit test; exercise the
        // suffix derivation in isolation instead.
        let file_name = Path::new("module.py").file_name().unwrap().to_os_string();
        let suffix = Path::new(&file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        assert_eq!(suffix, ".py");
        let _ = tmp;
    }
}
