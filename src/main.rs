use clap::Parser;
use treefmt_multiplex::cli::Cli;
use treefmt_multiplex::command;
use treefmt_multiplex::logging;

fn main() {
    let cli = Cli::parse();
    logging::init(&cli.verbose);
    let code = command::run_cli(cli);
    std::process::exit(code);
}
