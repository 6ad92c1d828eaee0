//! Kiln CLI: declarative builds with a parallel goal graph and cached rules.

use clap::{CommandFactory, Parser};
use kiln::cli::Commands;

#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    version,
    about = "Declarative build orchestrator: parallel goal graph, fingerprinted rule cache"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        return;
    }
    if let Err(e) = kiln::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
