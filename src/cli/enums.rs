//! CLI enum types.

use clap::ValueEnum;

use crate::depth::PixelFormat;

/// Sample type of a raw input plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum InputFormat {
    /// float32 distance in metres
    #[default]
    Depth,
    /// float32 inverse distance (1/m)
    Disparity,
}

impl From<InputFormat> for PixelFormat {
    fn from(f: InputFormat) -> Self {
        match f {
            InputFormat::Depth => PixelFormat::DepthFloat32,
            InputFormat::Disparity => PixelFormat::DisparityFloat32,
        }
    }
}
