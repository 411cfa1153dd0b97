//! `treefmt completions <shell>`: emit a shell completion script. Explicitly
//! out of scope for the core pipeline; this is a thin, self-contained shim.

use crate::cli::Cli;
use clap::CommandFactory;
use clap_complete::Shell;
use std::io;

pub fn run(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
}
