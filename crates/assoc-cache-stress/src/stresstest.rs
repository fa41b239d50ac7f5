use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use sketches_ddsketch::DDSketch;

use crate::config::Config;
use crate::workloads::{Operation, PreparedWorkload, prepare_workload};

#[derive(Default)]
struct ThreadReport {
    latencies: DDSketch,
    removes: usize,
    puts: usize,
}

impl ThreadReport {
    fn merge(&mut self, other: ThreadReport) -> Result<()> {
        self.latencies
            .merge(&other.latencies)
            .map_err(|err| anyhow!("failed to merge latencies: {err:?}"))?;
        self.removes += other.removes;
        self.puts += other.puts;
        Ok(())
    }
}

pub fn perform_stresstest(config: Config, duration: Duration) -> Result<()> {
    let store = config.store;
    let workloads = config
        .workloads
        .into_iter()
        .map(|workload| prepare_workload(workload, store))
        .collect::<Result<Vec<_>>>()?;

    // warmup: compute every value once, so the measurement starts from a populated cache
    {
        let start = Instant::now();
        for workload in &workloads {
            workload
                .warm_up()
                .with_context(|| format!("warmup of workload {} failed", workload.name))?;
        }
        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let deadline = Instant::now() + duration;
    let reports = thread::scope(|s| {
        let handles: Vec<_> = workloads
            .iter()
            .map(|workload| {
                let threads: Vec<_> = (0..workload.threads)
                    .map(|_| s.spawn(move || run_thread(workload, deadline)))
                    .collect();
                (workload, threads)
            })
            .collect();

        handles
            .into_iter()
            .map(|(workload, threads)| {
                let mut report = ThreadReport::default();
                for thread in threads {
                    let thread_report = thread
                        .join()
                        .map_err(|_| anyhow!("a thread of workload {} panicked", workload.name))??;
                    report.merge(thread_report)?;
                }
                Ok((workload, report))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    for (i, (workload, report)) in reports.iter().enumerate() {
        print_report(i, workload, report, duration);
    }

    Ok(())
}

fn run_thread(workload: &PreparedWorkload, deadline: Instant) -> Result<ThreadReport> {
    let mut rng = rand::rng();
    let mut report = ThreadReport::default();

    while Instant::now() < deadline {
        let start = Instant::now();
        let operation = workload.run_operation(&mut rng)?;
        report.latencies.add(start.elapsed().as_secs_f64());
        match operation {
            Operation::Get => {}
            Operation::Remove => report.removes += 1,
            Operation::Put => report.puts += 1,
        }
    }

    tracing::debug!(
        workload = workload.name.as_str(),
        ops = report.latencies.count(),
        "Thread finished"
    );
    Ok(report)
}

fn quantile(latencies: &DDSketch, q: f64) -> Duration {
    let secs = latencies.quantile(q).ok().flatten().unwrap_or_default();
    Duration::from_secs_f64(secs)
}

fn print_report(i: usize, workload: &PreparedWorkload, report: &ThreadReport, duration: Duration) {
    let name = &workload.name;
    let threads = workload.threads;
    let ops = report.latencies.count();
    let ops_ps = ops as f64 / duration.as_secs_f64();
    println!("Workload {i} ({name}, threads: {threads}): {ops} operations, {ops_ps:.2} ops/s");

    let latencies = &report.latencies;
    if ops > 0 {
        let avg = Duration::from_secs_f64(latencies.sum().unwrap_or_default() / ops as f64);
        let p50 = quantile(latencies, 0.5);
        let p90 = quantile(latencies, 0.9);
        let p99 = quantile(latencies, 0.99);
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    let stats = workload.store_stats();
    println!(
        "  removes: {}; puts: {}; computations: {}",
        report.removes,
        report.puts,
        workload.computations()
    );
    println!(
        "  entries: {}; cache capacity: {}; cache load: {}",
        stats.entries, stats.cache_capacity, stats.cache_load
    );
}
