use anyhow::Result;
use clap::Parser;
use sharpen::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run()
}
