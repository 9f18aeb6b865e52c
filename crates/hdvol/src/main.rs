//! hdvol CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;

use hdvol::cli::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    hdvol::logging::init(cli.driver.verbosity())?;

    cli.execute()
}
