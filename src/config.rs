//! Command-line configuration of the `voxelcore` diagnostic binary.
//!
//! The library itself takes no global configuration. The binary exercises an
//! image from many threads and reports what it observed:
//!
//! ```text
//! voxelcore stress   --threads 8 --iterations 5000 --extent 32,32,16,2 --format json
//! voxelcore scenario --format text
//! ```
//!
//! # Environment Variables
//!
//! - `VOXEL_THREADS` - Worker threads of a stress run (default: 4)
//! - `VOXEL_ITERATIONS` - Operations per worker (default: 1000)
//! - `VOXEL_EXTENT` - Image extents, comma-separated (default: 16,16,8,2)
//! - `VOXEL_SEED` - Seed of the operation sequence (default: 24301)
//! - `VOXEL_FORMAT` - Report format, `text` or `json` (default: text)

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::data::MAX_IMAGE_DIMENSIONS;
use crate::stress::StressConfig;

// =============================================================================
// Default Values
// =============================================================================

/// Default number of worker threads.
pub const DEFAULT_THREADS: usize = 4;

/// Default number of operations per worker.
pub const DEFAULT_ITERATIONS: usize = 1000;

/// Default image extents (x, y, z, t).
pub const DEFAULT_EXTENT: &str = "16,16,8,2";

/// Default seed of the operation sequence.
pub const DEFAULT_SEED: u64 = 0x5eed;

/// Upper bound on worker threads.
const MAX_THREADS: usize = 256;

// =============================================================================
// CLI Arguments
// =============================================================================

/// voxelcore - diagnostics for the multi-dimensional image container.
#[derive(Parser, Debug, Clone)]
#[command(name = "voxelcore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run concurrent slice and volume accessors against one image.
    Stress(StressArgs),

    /// Compose three slices into a volume and print the result.
    Scenario(ScenarioArgs),
}

/// Report output format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct StressArgs {
    /// Number of worker threads.
    #[arg(long, default_value_t = DEFAULT_THREADS, env = "VOXEL_THREADS")]
    pub threads: usize,

    /// Operations performed by each worker.
    #[arg(long, default_value_t = DEFAULT_ITERATIONS, env = "VOXEL_ITERATIONS")]
    pub iterations: usize,

    /// Image extents, x,y,z or x,y,z,t.
    #[arg(long, default_value = DEFAULT_EXTENT, env = "VOXEL_EXTENT", value_delimiter = ',')]
    pub extent: Vec<u32>,

    /// Seed of the operation sequence.
    #[arg(long, default_value_t = DEFAULT_SEED, env = "VOXEL_SEED")]
    pub seed: u64,

    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, env = "VOXEL_FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl StressArgs {
    /// Validate the arguments and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.threads == 0 || self.threads > MAX_THREADS {
            return Err(format!("threads must be between 1 and {}", MAX_THREADS));
        }
        if self.iterations == 0 {
            return Err("iterations must be greater than 0".to_string());
        }
        if self.extent.len() < 3 || self.extent.len() > MAX_IMAGE_DIMENSIONS {
            return Err(format!(
                "extent must list between 3 and {} axes, got {}",
                MAX_IMAGE_DIMENSIONS,
                self.extent.len()
            ));
        }
        if let Some(axis) = self.extent.iter().position(|&e| e == 0) {
            return Err(format!("extent of axis {} must be greater than 0", axis));
        }
        Ok(())
    }

    /// Library configuration of the run.
    pub fn to_stress_config(&self) -> StressConfig {
        StressConfig {
            threads: self.threads,
            iterations: self.iterations,
            extents: self.extent.clone(),
            seed: self.seed,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ScenarioArgs {
    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, env = "VOXEL_FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
