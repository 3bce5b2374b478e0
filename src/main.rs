use std::process::exit;

use clap::Parser;
use linnea::Cli;

fn main() {
    env_logger::init();
    let mut cli = Cli::parse();

    if let Err(error) = cli.execute() {
        eprintln!("{error}");
        exit(1)
    }
}
