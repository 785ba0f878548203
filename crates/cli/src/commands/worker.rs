use crosscheck_pool::serve;
use crosscheck_task::CommandChecker;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Serve checks for the parent `run` until it closes stdin or asks us to stop
pub async fn execute(candidate: &str) -> eyre::Result<ExitCode> {
    let candidate = CommandChecker::parse(candidate)?;
    serve(
        Arc::new(candidate),
        tokio::io::stdin(),
        tokio::io::stdout(),
        HEARTBEAT_INTERVAL,
    )
    .await?;
    Ok(ExitCode::SUCCESS)
}
