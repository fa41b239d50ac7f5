use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::config::Config;

mod config;
mod logging;
mod stresstest;
mod workloads;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to the configuration file with the workload definitions.
    #[arg(long, short, value_name = "FILE")]
    config: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(&cli.config)?;

    // SAFETY: The stresstest has not spawned any threads yet.
    unsafe { logging::init_logging(&config.logging) };
    logging::init_metrics(&config.metrics)?;

    stresstest::perform_stresstest(config, cli.duration)
}
