use super::GenerateArgs;
use crosscheck_cache::ResultCache;
use crosscheck_core::CROSSCHECK_FRESHNESS_KEY_VAR;
use crosscheck_task::{generate_cache, CommandChecker, SingleFileParser, TaskSource};
use std::process::ExitCode;
use std::sync::Arc;

pub async fn execute(args: GenerateArgs) -> eyre::Result<ExitCode> {
    let oracle = CommandChecker::parse(&args.oracle)?;
    let freshness_key = match &args.freshness_key {
        Some(key) => key.clone(),
        None => match std::env::var(CROSSCHECK_FRESHNESS_KEY_VAR) {
            Ok(key) if !key.is_empty() => key,
            _ => oracle.freshness_key(),
        },
    };
    let concurrency = args.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });

    tracing::info!(
        fixtures = %args.source.fixtures.display(),
        output = %args.output.display(),
        %freshness_key,
        concurrency,
        "Generating result cache"
    );

    let source = TaskSource::new(args.source.to_config());
    let store = ResultCache::new(&args.output);
    let summary = generate_cache(
        &source,
        Arc::new(oracle),
        &SingleFileParser,
        concurrency,
        &store,
        &freshness_key,
    )
    .await?;

    println!(
        "Wrote {} entries to {} ({} oracle crashes, {} skipped) in {:.1}s",
        summary.recorded,
        store.path().display(),
        summary.oracle_crashes,
        summary.skipped,
        summary.elapsed.as_secs_f64()
    );
    Ok(ExitCode::SUCCESS)
}
