//! One external formatting tool: name, command, options, priority,
//! include/exclude rules and hashability.

use crate::config::FormatterConfig;
use crate::error::ConfigError;
use crate::file::File;
use crate::matcher::Matcher;
use crate::walk::Cancel;
use anyhow::{Context, Result};
use md5::{Digest, Md5};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Regex-shaped constraint on formatter names: `^[A-Za-z0-9_-]+$`.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// One configured formatter, resolved and ready to run.
#[derive(Debug, Clone)]
pub struct Formatter {
    /// Name, as it appears in `[formatter.<name>]`.
    pub name: String,
    /// Resolved absolute path of the executable.
    pub command: PathBuf,
    /// Ordered argument list; files are appended after these.
    pub options: Vec<String>,
    /// Lower numbers run earlier within a batch.
    pub priority: i32,
    matcher: Matcher,
}

impl Formatter {
    /// Resolve and validate a formatter from its config fragment.
    ///
    /// `tree_root` is prepended to `PATH` so project-local formatter
    /// binaries are preferred over ones found elsewhere on `PATH`.
    pub fn construct(tree_root: &Path, name: &str, cfg: &FormatterConfig) -> Result<Self> {
        if !is_valid_name(name) {
            return Err(ConfigError::InvalidFormatterName(name.to_string()).into());
        }
        if cfg.includes.is_empty() {
            return Err(ConfigError::NoIncludes(name.to_string()).into());
        }

        let command = resolve_command(tree_root, &cfg.command)
            .with_context(|| format!("formatter #{name}: command {:?} not found", cfg.command))?;

        let matcher = Matcher::compile(name, &cfg.includes, &cfg.excludes)?;

        Ok(Self {
            name: name.to_string(),
            command,
            options: cfg.options.clone(),
            priority: cfg.priority,
            matcher,
        })
    }

    /// True iff this formatter's rules match `rel_path`.
    pub fn wants(&self, rel_path: &Path) -> bool {
        self.matcher.is_match(rel_path)
    }

    /// Run this formatter over a batch of files, in `tree_root`, inheriting
    /// the parent's environment.
    ///
    /// An empty `files` slice is an immediate success with no subprocess
    /// spawned. Files with a `tmp_path` are passed in place of their real
    /// path (used by the stdin walker). If `cancel` becomes set while the
    /// subprocess is running, it is sent an interrupt (not a kill) so it can
    /// clean up any temp state before exiting.
    pub fn apply(&self, tree_root: &Path, files: &[&File], cancel: &Cancel) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }

        let mut cmd = Command::new(&self.command);
        cmd.current_dir(tree_root);
        cmd.args(&self.options);
        for file in files {
            cmd.arg(file.format_path());
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn formatter #{}", self.name))?;

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");
        let stdout_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        });

        let status = wait_with_interrupt(&mut child, cancel)
            .with_context(|| format!("waiting for formatter #{}", self.name))?;

        let mut combined = stdout_reader.join().unwrap_or_default();
        combined.extend(stderr_reader.join().unwrap_or_default());

        if !status.success() {
            anyhow::bail!(
                "formatter #{} exited with {}: {}",
                self.name,
                status,
                String::from_utf8_lossy(&combined),
            );
        }
        Ok(())
    }

    /// Update a running hash with this formatter's identity: name, options,
    /// priority, and the executable's size + mtime. This is the unit of
    /// cache invalidation: any change here invalidates every path that was
    /// processed through this formatter.
    pub fn hash_into(&self, hasher: &mut Md5) -> Result<()> {
        hasher.update(self.name.as_bytes());
        hasher.update(b"\0");
        for opt in &self.options {
            hasher.update(opt.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(self.priority.to_le_bytes());

        let meta = fs::metadata(&self.command)
            .with_context(|| format!("formatter #{}: stat {:?}", self.name, self.command))?;
        hasher.update(meta.len().to_le_bytes());
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        hasher.update(mtime.seconds().to_le_bytes());
        hasher.update(mtime.nanoseconds().to_le_bytes());
        Ok(())
    }
}

impl fmt::Display for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name)
    }
}

/// Poll `child` for completion, sending it an interrupt (not a kill) the
/// first time `cancel` is observed set, and keep waiting so it gets a
/// chance to clean up. Polling keeps this portable without pulling in an
/// async runtime just for one subprocess wait.
fn wait_with_interrupt(child: &mut Child, cancel: &Cancel) -> Result<std::process::ExitStatus> {
    const POLL_INTERVAL: Duration = Duration::from_millis(25);
    let mut interrupted = false;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if cancel.load(Ordering::Relaxed) && !interrupted {
            interrupt(child);
            interrupted = true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Err(err) = kill(Pid::from_raw(child.id() as i32), Signal::SIGINT) {
        log::warn!("failed to send SIGINT to formatter process: {err}");
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) {
    let _ = child.kill();
}

/// Resolve `command` to an absolute path, preferring `tree_root`-relative
/// directories named on `PATH` itself (`which` already walks `PATH` in
/// order, so we just prepend the tree root to it).
fn resolve_command(tree_root: &Path, command: &str) -> Result<PathBuf> {
    let candidate = Path::new(command);
    if candidate.is_absolute() {
        if candidate.exists() {
            return Ok(candidate.to_path_buf());
        }
        anyhow::bail!("command not found: {}", candidate.display());
    }

    let mut path_var = OsString::from(tree_root.as_os_str());
    if let Some(existing) = std::env::var_os("PATH") {
        path_var.push(":");
        path_var.push(existing);
    }

    which::which_in(command, Some(path_var), tree_root)
        .with_context(|| format!("command not found on PATH: {command}"))
}
