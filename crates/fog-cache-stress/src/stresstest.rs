use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use fog_cache::config::Config;
use parking_lot::Mutex;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{PreparedWorkload, WorkloadsConfig, prepare_workload, process_workload};

pub async fn perform_stresstest(
    config: Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // initialize workloads
    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| Arc::new(prepare_workload(i, &config, workload)))
        .collect();
    tracing::info!(workloads = workloads.len(), ?duration, "Starting stresstest");

    // warmup: run each workload once to make sure the caches are populated
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|workload| {
            let workload = Arc::clone(workload);
            tokio::spawn(async move {
                process_workload(&workload).await;
            })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for workload in workloads.into_iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let concurrency = workload.concurrency.max(1);

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let failures = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let workload = Arc::clone(&workload);
                        let task_durations = Arc::clone(&task_durations);
                        let failures = Arc::clone(&failures);
                        let task_start = Instant::now();

                        tokio::spawn(async move {
                            if !process_workload(&workload).await {
                                failures.fetch_add(1, Ordering::Relaxed);
                            }

                            task_durations.lock().add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let task_durations = std::mem::take(&mut *task_durations.lock());
            (workload, task_durations, failures.load(Ordering::Relaxed))
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (workload, task_durations, failures) = task?;
        let concurrency = workload.concurrency;
        let strategy = workload.strategy;

        let ops = task_durations.count();
        let ops_ps = ops as f64 / duration.as_secs_f64();
        println!(
            "Workload {i} ({strategy:?}, concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s"
        );
        println!(
            "  fetches: {}; failed operations: {failures}",
            workload.fetches()
        );

        if let Some(sum) = task_durations.sum() {
            let avg = Duration::from_secs_f64(sum / ops as f64);
            let p50 = quantile(&task_durations, 0.5);
            let p90 = quantile(&task_durations, 0.9);
            let p99 = quantile(&task_durations, 0.99);
            println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
        }
    }

    Ok(())
}

fn quantile(sketch: &DDSketch, q: f64) -> Duration {
    let secs = sketch.quantile(q).ok().flatten().unwrap_or_default();
    Duration::from_secs_f64(secs.max(0.0))
}
