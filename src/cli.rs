//! Command-line surface: `nbody <mode> <n_particles> <n_threads> <n_iters> [input_file]`.

use std::path::PathBuf;

use clap::Parser;

use crate::error::SimError;

/// Execution mode. `Sequential` opts out of the custom work-stealing
/// scheduler; `Parallel` drives it across `n_threads` workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Sequential,
    Parallel,
}

/// Time step is fixed, not a CLI flag, per the external interface contract.
pub const DT: f64 = 0.01;

#[derive(Parser, Debug)]
#[command(
    name = "nbody",
    about = "Parallel Barnes-Hut n-body gravitational simulator",
    version
)]
pub struct Args {
    /// "s" for sequential, "p" for parallel.
    mode: String,

    /// Number of particles to simulate.
    n_particles: usize,

    /// Number of worker threads; ignored in sequential mode.
    n_threads: usize,

    /// Number of simulation steps to run.
    n_iters: usize,

    /// Optional path to an initial-conditions file; random particles if omitted.
    input_file: Option<PathBuf>,
}

/// Fully resolved, validated run configuration.
#[derive(Debug)]
pub struct SimConfig {
    pub mode: Mode,
    pub n_particles: usize,
    pub n_threads: usize,
    pub n_iters: usize,
    pub dt: f64,
    pub input_file: Option<PathBuf>,
}

impl TryFrom<Args> for SimConfig {
    type Error = SimError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let mode = match args.mode.as_str() {
            "s" => Mode::Sequential,
            "p" => Mode::Parallel,
            other => {
                return Err(SimError::Argument(format!(
                    "mode must be \"s\" or \"p\", got {other:?}"
                )))
            }
        };

        if args.n_particles == 0 {
            return Err(SimError::Argument("n_particles must be positive".to_string()));
        }
        if mode == Mode::Parallel && args.n_threads == 0 {
            return Err(SimError::Argument("n_threads must be positive".to_string()));
        }

        Ok(Self {
            mode,
            n_particles: args.n_particles,
            n_threads: args.n_threads.max(1),
            n_iters: args.n_iters,
            dt: DT,
            input_file: args.input_file,
        })
    }
}

/// Parses `argv`, mapping clap's arity/parse failures onto [`SimError::Argument`].
pub fn parse_config<I, T>(argv: I) -> Result<SimConfig, SimError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let args = Args::try_parse_from(argv).map_err(|e| SimError::Argument(e.to_string()))?;
    SimConfig::try_from(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_mode() {
        let result = parse_config(["nbody", "x", "10", "2", "5"]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_arguments() {
        let result = parse_config(["nbody", "s", "10"]);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_well_formed_sequential_invocation() {
        let cfg = parse_config(["nbody", "s", "100", "4", "10"]).unwrap();
        assert_eq!(cfg.mode, Mode::Sequential);
        assert_eq!(cfg.n_particles, 100);
        assert_eq!(cfg.n_iters, 10);
        assert_eq!(cfg.dt, DT);
        assert!(cfg.input_file.is_none());
    }

    #[test]
    fn accepts_optional_input_file() {
        let cfg = parse_config(["nbody", "p", "50", "8", "3", "init.txt"]).unwrap();
        assert_eq!(cfg.mode, Mode::Parallel);
        assert_eq!(cfg.input_file.as_deref(), Some(std::path::Path::new("init.txt")));
    }

    #[test]
    fn rejects_zero_particles() {
        assert!(parse_config(["nbody", "s", "0", "4", "10"]).is_err());
    }
}
