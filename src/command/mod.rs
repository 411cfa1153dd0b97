//! Subcommand dispatch: the default formatting run, plus `init` and
//! `completions`.

pub mod completions;
pub mod format;
pub mod init;

use crate::cli::{Cli, Command};
use crate::error::TreefmtError;

/// Run whichever subcommand `cli` selected, returning the process exit code.
pub fn run_cli(cli: Cli) -> i32 {
    let result = match &cli.command {
        Some(Command::Init) => init::run(&std::env::current_dir().unwrap_or_default())
            .map(|_| ())
            .map_err(TreefmtError::Other),
        Some(Command::Completions { shell }) => {
            completions::run(*shell);
            Ok(())
        }
        None => format::run(&cli).map(|_| ()),
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            log::error!("{err}");
            err.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn init_in_a_fresh_directory_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_current_dir(tmp.path()).unwrap();
        let cli = Cli::parse_from(["treefmt", "init"]);
        assert_eq!(run_cli(cli), 0);
    }
}
