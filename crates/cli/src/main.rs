use clap::Parser;
use crosscheck::Commands;
use crosscheck_utils::tracing::Verbosity;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "crosscheck")]
#[command(about = "Check a candidate against an oracle over a fixture tree", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    crosscheck_utils::tracing::init(Verbosity::from_flags(cli.verbose, cli.quiet))
        .map_err(|e| eyre::eyre!("failed to initialise logging: {e}"))?;

    cli.command.execute().await
}
