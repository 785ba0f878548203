use super::RunArgs;
use crosscheck_core::UNKNOWN_FRESHNESS_KEY;
use crosscheck_pool::{parse_timeout, PoolConfig, ProcessLauncher};
use crosscheck_task::{render_summary, CommandChecker, RunConfig, Runner, TaskSource};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Instrument;

/// Log filter for worker processes when the user has not set one
const WORKER_LOG_FILTER: &str = "warn";

pub async fn execute(args: RunArgs) -> eyre::Result<ExitCode> {
    let oracle = CommandChecker::parse(&args.oracle)?;
    // Fail here rather than in every worker
    CommandChecker::parse(&args.candidate)?;

    let mut pool_config = PoolConfig::default().apply_env()?;
    if let Some(workers) = args.workers {
        pool_config = pool_config.with_workers(workers);
    }
    if let Some(secs) = args.timeout {
        pool_config = pool_config.with_timeout_override(parse_timeout(secs)?);
    }
    pool_config.validate()?;

    let mut run_config = RunConfig::default()
        .apply_env()
        .with_concurrency(pool_config.workers)
        .with_write_back(args.write_cache)
        .with_error_code(args.error_code)
        .with_print_test(args.print_test);
    if let Some(cache) = &args.cache {
        run_config = run_config.with_cache(cache);
    }
    if let Some(key) = &args.freshness_key {
        run_config = run_config.with_freshness_key(key);
    } else if run_config.cache_path.is_some() && run_config.freshness_key == UNKNOWN_FRESHNESS_KEY {
        run_config = run_config.with_freshness_key(oracle.freshness_key());
    }

    let mut launcher = ProcessLauncher::current_exe()?
        .arg("--candidate")
        .arg(&args.candidate);
    if std::env::var_os("RUST_LOG").is_none() {
        launcher = launcher.env("RUST_LOG", WORKER_LOG_FILTER);
    }

    tracing::info!(
        fixtures = %args.source.fixtures.display(),
        workers = pool_config.workers,
        cache = ?run_config.cache_path,
        freshness_key = %run_config.freshness_key,
        "Starting run"
    );

    let span = crosscheck_utils::tracing::run_span(pool_config.workers);
    let source = TaskSource::new(args.source.to_config());
    let runner = Runner::new(run_config, pool_config, Arc::new(oracle), Arc::new(launcher));
    let stats = runner.run(&source).instrument(span).await?;

    print!("{}", render_summary(&stats));
    Ok(if stats.all_matched() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
