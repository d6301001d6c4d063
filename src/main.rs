use autotidy::cli::{run_cli, Cli};
use clap::Parser;

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(err) = run_cli(cli.command) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
