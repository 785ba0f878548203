use crate::commands::{generate, run, worker, Commands};
use std::process::ExitCode;

impl Commands {
    pub async fn execute(self) -> eyre::Result<ExitCode> {
        match self {
            Commands::Run(args) => run::execute(args).await,
            Commands::GenerateCache(args) => generate::execute(args).await,
            Commands::Worker { candidate } => worker::execute(&candidate).await,
        }
    }
}
