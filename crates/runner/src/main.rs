use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use sluice_core::{Job, JobStatus, JobStore};
use sluice_infra::{InMemoryJobStore, JobContext, Scheduler, SchedulerConfig};

const DEMO_JOBS: u32 = 50;
const STATS_EVERY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Task {
    n: u32,
    label: String,
}

async fn run_task(ctx: JobContext, job: Job<Task>) -> anyhow::Result<()> {
    let Task { n, label } = &job.payload;
    let work = Duration::from_millis(u64::from((n * 37) % 400 + 50));

    tracing::debug!(job_id = %job.id, worker_id = ctx.worker_id(), label = %label, "working");
    tokio::time::sleep(work).await;
    if ctx.is_cancelled() {
        tracing::debug!(job_id = %job.id, "finished during shutdown");
    }

    if n % 13 == 0 {
        anyhow::bail!("task {label} rejected");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sluice_observability::init();

    let config = SchedulerConfig::from_env()
        .context("invalid scheduler configuration")?
        .with_name("sluice-demo");

    let store = InMemoryJobStore::<Task>::arc();
    for n in 0..DEMO_JOBS {
        let job = Job::new(Task {
            n,
            label: format!("task-{n}"),
        })
        .delayed(Duration::from_millis(u64::from(n) * 200));
        store.add_job(job).await?;
    }
    tracing::info!(jobs = DEMO_JOBS, "seeded demo jobs");

    let shutdown = CancellationToken::new();
    let handle = Scheduler::<Task, _, _>::new(store.clone(), config, run_task)?.run(shutdown.clone());

    let mut ticker = tokio::time::interval(STATS_EVERY);
    ticker.tick().await;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c; shutting down");
                }
                break;
            }
            _ = ticker.tick() => {
                let stats = serde_json::to_string(&handle.stats())?;
                tracing::info!(stats = %stats, "scheduler stats");
            }
        }
    }

    tracing::info!("shutdown requested");
    shutdown.cancel();
    let report = handle.wait().await?;

    tracing::info!(
        released = report.released.len(),
        degraded = report.degraded.len(),
        "shutdown complete"
    );
    for degraded in &report.degraded {
        tracing::warn!(error = %degraded, "job left invisible");
    }

    let jobs = serde_json::to_string(&store.stats(Utc::now())?)?;
    tracing::info!(jobs = %jobs, "final job counts");

    let failed: Vec<String> = store
        .snapshot()?
        .into_iter()
        .filter(|job| job.status == JobStatus::Failed)
        .map(|job| job.payload.label)
        .collect();
    tracing::info!(failed = ?failed, "failed tasks");
    Ok(())
}
