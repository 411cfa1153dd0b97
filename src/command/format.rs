//! `treefmt [paths...]`: the default command. Loads config, resolves the
//! tree root, and runs the engine end to end.

use crate::cli::Cli;
use crate::config::{self, Root};
use crate::engine::{Engine, RunOptions};
use crate::error::TreefmtError;
use crate::stats::Stats;
use crate::walk::Cancel;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub fn run(cli: &Cli) -> Result<Arc<Stats>, TreefmtError> {
    let cwd = std::env::current_dir().map_err(|e| TreefmtError::Other(e.into()))?;

    let config_path = match &cli.config_file {
        Some(path) => path.clone(),
        None => config::lookup(&cwd)
            .map(|dir| dir.join(config::FILENAME))
            .ok_or_else(|| {
                crate::error::ConfigError::NotFound(
                    "treefmt.toml".to_string(),
                    cwd.clone(),
                )
            })
            .map_err(TreefmtError::Config)?,
    };
    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.clone());

    let mut cfg = config::from_path(&config_path).map_err(TreefmtError::Config)?;
    if !cli.formatters.is_empty() {
        cfg.formatters = Some(cli.formatters.clone());
    }
    cfg.fail_on_change = cfg.fail_on_change || cli.fail_on_change;
    cfg.allow_missing_formatter = cfg.allow_missing_formatter || cli.allow_missing_formatter;

    let tree_root = resolve_tree_root(cli, &config_dir, &cfg).map_err(TreefmtError::Other)?;

    let cache_dir = directories::ProjectDirs::from("", "", "treefmt")
        .map(|dirs| dirs.cache_dir().join("eval-cache"))
        .unwrap_or_else(|| tree_root.join(".treefmt-cache"));

    let num_threads = cli
        .workers
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1);

    let cancel: Cancel = Arc::new(AtomicBool::new(false));
    install_signal_handlers(&cancel);

    let paths = cli
        .paths
        .iter()
        .map(|p| crate::walk::expand_path(p, &cwd))
        .collect();

    let opts = RunOptions {
        tree_root,
        cache_dir,
        no_cache: cli.no_cache,
        clear_cache: cli.clear_cache,
        hidden: cli.hidden,
        paths,
        stdin_pseudo_path: cli.stdin.clone(),
        num_threads,
        channel_capacity: 4096,
        cancel,
    };

    let engine = Engine::build(&cfg, opts)?;
    engine.run()
}

/// Priority: `--tree-root` flag, then the config's tree-root options, then
/// the directory containing the config file itself.
fn resolve_tree_root(cli: &Cli, config_dir: &Path, cfg: &Root) -> anyhow::Result<PathBuf> {
    if let Some(root) = &cli.tree_root {
        return Ok(root.clone());
    }
    if let Some(root) = &cfg.tree_root {
        return Ok(config_dir.join(root));
    }
    if let Some(file) = &cfg.tree_root_file {
        let marker = config_dir.join(file);
        return marker
            .parent()
            .map(Path::to_path_buf)
            .context("tree-root-file has no parent directory");
    }
    if let Some(cmd) = &cfg.tree_root_cmd {
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(config_dir)
            .output()
            .with_context(|| format!("running tree-root-cmd {cmd:?}"))?;
        if !output.status.success() {
            anyhow::bail!("tree-root-cmd {cmd:?} exited with {}", output.status);
        }
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir.to_path_buf())
}

#[cfg(unix)]
fn install_signal_handlers(cancel: &Cancel) {
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, cancel.clone()) {
        log::warn!("failed to install SIGINT handler: {err}");
    }
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGTERM, cancel.clone()) {
        log::warn!("failed to install SIGTERM handler: {err}");
    }
}

#[cfg(not(unix))]
fn install_signal_handlers(_cancel: &Cancel) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use clap::Parser;

    #[test]
    fn tree_root_falls_back_to_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from(["treefmt"]);
        let cfg = config::from_str("").unwrap();
        let root = resolve_tree_root(&cli, tmp.path(), &cfg).unwrap();
        assert_eq!(root, tmp.path());
    }

    #[test]
    fn cli_tree_root_wins_over_config() {
        let tmp = tempfile::tempdir().unwrap();
        let other = tmp.path().join("elsewhere");
        let cli = Cli {
            tree_root: Some(other.clone()),
            ..Cli::parse_from(["treefmt"])
        };
        let cfg = config::from_str("tree-root = \"ignored\"").unwrap();
        let root = resolve_tree_root(&cli, tmp.path(), &cfg).unwrap();
        assert_eq!(root, other);
    }
}
