use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use nbody_bh::cli::{Args, Mode, SimConfig};

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config: SimConfig = SimConfig::try_from(args).context("invalid run configuration")?;

    info!(
        "starting run: mode={:?} n_particles={} n_threads={} n_iters={}",
        config.mode, config.n_particles, config.n_threads, config.n_iters
    );

    let output_path = Path::new("points.txt");
    let start = Instant::now();
    nbody_bh::run(&config, output_path).context("simulation run failed")?;
    let elapsed = start.elapsed();

    info!("elapsed time: {:.6} seconds", elapsed.as_secs_f64());
    if config.mode == Mode::Sequential {
        info!("n_threads was ignored (sequential mode)");
    }

    Ok(())
}
