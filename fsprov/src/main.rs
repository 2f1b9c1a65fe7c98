use clap::Parser;
mod cli;
mod commands;
mod logging;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    logging::init_with(cli.log_file.as_deref());
    commands::run(&cli)
}
