//! CLI argument parsing with clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use super::enums::InputFormat;

/// Convert float32 depth maps into 8-bit grayscale images
#[derive(Parser, Debug)]
#[command(name = "depth-grayscale")]
#[command(version, about = "Depth map to grayscale converter", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert a raw little-endian float32 depth plane and print statistics
    Convert(ConvertArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ConvertArgs {
    /// Raw float32 plane to read
    pub input: PathBuf,

    /// Frame width in pixels
    #[arg(long)]
    pub width: u32,

    /// Frame height in pixels
    #[arg(long)]
    pub height: u32,

    /// Bytes between row starts (default: width * 4)
    #[arg(long)]
    pub stride: Option<usize>,

    /// Sample type of the input plane
    #[arg(long, default_value = "depth")]
    pub format: InputFormat,

    /// Near bound in metres (overrides config)
    #[arg(long)]
    pub min_depth: Option<f32>,

    /// Far bound in metres (overrides config)
    #[arg(long)]
    pub max_depth: Option<f32>,

    /// Map near to white instead of black
    #[arg(long)]
    pub invert: bool,

    /// Output buffers to keep in the pool (overrides config)
    #[arg(long)]
    pub buffers: Option<NonZeroUsize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}
