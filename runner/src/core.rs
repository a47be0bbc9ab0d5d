use anyhow::Context;
use config::load_config;
use config::shared::DumperConfig;
use dumper::counter::CounterLayout;
use dumper::counter::redis::RedisHashCounter;
use dumper::registry::JobRegistry;
use dumper::store::postgres::PgStore;
use dumper::types::Params;
use tracing::info;

fn load_dumper_config() -> anyhow::Result<DumperConfig> {
    let config: DumperConfig = load_config().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    Ok(config)
}

/// Prints the configured job names, one per line.
pub fn list_jobs() -> anyhow::Result<()> {
    let config = load_dumper_config()?;
    for job in &config.jobs {
        println!("{}", job.name);
    }

    Ok(())
}

/// Runs `job` once for `args`.
///
/// Jobs run from configuration carry no lifecycle hooks: their common parameters are the run
/// arguments alone (when `inherit_args` is on). Parameters derived from the arguments, such as
/// the first day of the month of a `date` argument, must either be passed as extra `--arg`
/// values or come from an engine built in code through `dumper::registry::engine_builder` with
/// a `before_merge` hook.
pub async fn run_job(job: &str, args: Params) -> anyhow::Result<()> {
    let config = load_dumper_config()?;
    let Some(job_config) = config.job(job) else {
        anyhow::bail!("job `{job}` is not configured");
    };

    let store = PgStore::new(&config.database);
    let registry = JobRegistry::from_config(&config.jobs, store)?;

    let counter = RedisHashCounter::connect(
        &config.redis,
        CounterLayout::from(&job_config.counter),
        config.batch.max_size,
    )
    .await?;

    info!(job, ?args, "running job");
    let rows = registry.process(job, &counter, args).await?;
    info!(job, rows, "job finished");

    Ok(())
}
