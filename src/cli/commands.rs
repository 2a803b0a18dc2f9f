//! Subcommand handlers for convert and config actions.

use std::fmt;
use std::path::{Path, PathBuf};

use super::args::{ConfigAction, ConvertArgs};
use crate::config::{Config, ConfigError, DEFAULT_CONFIG_TOML, default_path};
use crate::depth::{Converter, ConverterError, DepthMap, GrayImage, resolve, sample_to_depth};

/// Errors reported by CLI subcommands.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "Config file already exists: {}\nUse 'depth-grayscale config show' to view it.",
        .0.display()
    )]
    AlreadyExists(PathBuf),

    #[error(transparent)]
    Convert(#[from] ConverterError),
}

/// Statistics of one converted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionSummary {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: usize,
    pub min: u8,
    pub max: u8,
    pub mean: f64,
    /// Input samples with no valid distance (NaN, infinite, zero disparity)
    pub dropout_pixels: usize,
}

impl ConversionSummary {
    fn from_image(image: &GrayImage, map: &DepthMap) -> Self {
        let packed = image.to_packed();
        let min = packed.iter().copied().min().unwrap_or(0);
        let max = packed.iter().copied().max().unwrap_or(0);
        let total: u64 = packed.iter().map(|&v| u64::from(v)).sum();
        let mean = if packed.is_empty() {
            0.0
        } else {
            total as f64 / packed.len() as f64
        };

        let stride = map.bytes_per_row / std::mem::size_of::<f32>();
        let dropout_pixels = (0..map.height as usize)
            .flat_map(|y| map.data[y * stride..y * stride + map.width as usize].iter())
            .filter(|&&s| !sample_to_depth(s, map.format).is_finite())
            .count();

        Self {
            width: image.width(),
            height: image.height(),
            bytes_per_row: image.bytes_per_row(),
            min,
            max,
            mean,
            dropout_pixels,
        }
    }
}

impl fmt::Display for ConversionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Output: {}x{} gray8 (stride {} bytes)",
            self.width, self.height, self.bytes_per_row
        )?;
        writeln!(f, "  Intensity min: {}", self.min)?;
        writeln!(f, "  Intensity max: {}", self.max)?;
        writeln!(f, "  Intensity mean: {:.1}", self.mean)?;
        write!(f, "  Dropout pixels: {}", self.dropout_pixels)
    }
}

/// Load a raw depth plane, convert it and summarize the result.
pub fn convert(args: &ConvertArgs, config: &Config) -> Result<ConversionSummary, CliError> {
    let mut config = config.clone();
    if let Some(min) = args.min_depth {
        config.converter.min_depth = min;
    }
    if let Some(max) = args.max_depth {
        config.converter.max_depth = max;
    }
    if let Some(buffers) = args.buffers {
        config.converter.retained_buffers = buffers.get();
    }
    config.converter.invert |= args.invert;
    let settings = config.converter_settings()?;

    let bytes = std::fs::read(&args.input).map_err(|e| CliError::Read {
        path: args.input.clone(),
        source: e,
    })?;
    let map = DepthMap::from_le_bytes(
        &bytes,
        args.width,
        args.height,
        args.stride,
        args.format.into(),
    )?;
    log::info!(
        "Loaded {}x{} {} plane from {}",
        map.width,
        map.height,
        map.format,
        args.input.display()
    );

    let converter = Converter::new(settings.normalizer);
    let frame = map.as_frame();
    let descriptor = resolve(&frame)?;
    converter.prepare(&descriptor, settings.retained_buffers)?;
    let image = converter.render(&frame)?;
    let summary = ConversionSummary::from_image(&image, &map);
    image.release();
    converter.reset();

    Ok(summary)
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: &ConfigAction, path: Option<&Path>) -> Result<(), CliError> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(default_path);
    match action {
        ConfigAction::Show => {
            let config = Config::load(Some(&config_path))?;
            println!("Current configuration:");
            println!("  Retained buffers: {}", config.converter.retained_buffers);
            println!(
                "  Depth range: {} m - {} m",
                config.converter.min_depth, config.converter.max_depth
            );
            println!(
                "  Invert: {}",
                if config.converter.invert { "yes" } else { "no" }
            );
            println!("  Log level: {}", config.logging.level);
            println!();

            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
        }
        ConfigAction::Init => {
            if config_path.exists() {
                return Err(CliError::AlreadyExists(config_path));
            }

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CliError::Write {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            std::fs::write(&config_path, DEFAULT_CONFIG_TOML).map_err(|e| CliError::Write {
                path: config_path.clone(),
                source: e,
            })?;

            println!("Created config file: {}", config_path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::InputFormat;
    use tempfile::TempDir;

    fn write_plane(dir: &TempDir, values: &[f32]) -> PathBuf {
        let path = dir.path().join("frame.raw");
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn convert_args(input: PathBuf, width: u32, height: u32) -> ConvertArgs {
        ConvertArgs {
            input,
            width,
            height,
            stride: None,
            format: InputFormat::Depth,
            min_depth: None,
            max_depth: None,
            invert: false,
            buffers: None,
        }
    }

    #[test]
    fn test_convert_summary() {
        let dir = TempDir::new().unwrap();
        let path = write_plane(&dir, &[0.2, 1.5, f32::NAN, 0.2]);
        let summary = convert(&convert_args(path, 2, 2), &Config::default()).unwrap();
        assert_eq!((summary.width, summary.height), (2, 2));
        assert_eq!(summary.bytes_per_row, 16);
        assert_eq!(summary.min, 0);
        assert_eq!(summary.max, 255);
        assert!((summary.mean - 63.75).abs() < 1e-9);
        assert_eq!(summary.dropout_pixels, 1);
    }

    #[test]
    fn test_convert_range_override() {
        let dir = TempDir::new().unwrap();
        let path = write_plane(&dir, &[1.0, 2.0]);
        let mut args = convert_args(path, 2, 1);
        args.min_depth = Some(1.0);
        args.max_depth = Some(2.0);
        let summary = convert(&args, &Config::default()).unwrap();
        assert_eq!((summary.min, summary.max), (0, 255));
    }

    #[test]
    fn test_convert_short_file() {
        let dir = TempDir::new().unwrap();
        let path = write_plane(&dir, &[1.0, 1.0, 1.0]);
        let err = convert(&convert_args(path, 2, 2), &Config::default()).unwrap_err();
        assert!(matches!(
            err,
            CliError::Convert(ConverterError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn test_convert_missing_file() {
        let dir = TempDir::new().unwrap();
        let args = convert_args(dir.path().join("absent.raw"), 1, 1);
        assert!(matches!(
            convert(&args, &Config::default()),
            Err(CliError::Read { .. })
        ));
    }

    #[test]
    fn test_convert_invalid_range() {
        let dir = TempDir::new().unwrap();
        let path = write_plane(&dir, &[1.0]);
        let mut args = convert_args(path, 1, 1);
        args.min_depth = Some(3.0);
        assert!(matches!(
            convert(&args, &Config::default()),
            Err(CliError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_config_init_then_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        handle_config_action(&ConfigAction::Init, Some(&path)).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, DEFAULT_CONFIG_TOML);
        assert!(matches!(
            handle_config_action(&ConfigAction::Init, Some(&path)),
            Err(CliError::AlreadyExists(_))
        ));
        handle_config_action(&ConfigAction::Show, Some(&path)).unwrap();
    }

    #[test]
    fn test_summary_display() {
        let summary = ConversionSummary {
            width: 4,
            height: 4,
            bytes_per_row: 16,
            min: 0,
            max: 255,
            mean: 127.5,
            dropout_pixels: 1,
        };
        let text = summary.to_string();
        assert!(text.contains("4x4 gray8"));
        assert!(text.contains("Intensity mean: 127.5"));
        assert!(text.contains("Dropout pixels: 1"));
    }
}
