//! Run configuration, built once at startup.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;

use crate::device::{DeviceFilter, Framework, UniqueId};
use crate::error::{GPUError, GPUResult};
use crate::loader::ProgramFormat;
use crate::pipeline::StreamMode;
use crate::validate::Comparison;

/// Environment variable that overrides the kernel directory.
pub const KERNEL_DIR_ENV: &str = "SAXPY_KERNEL_DIR";
/// Environment variable that overrides the number of elements.
pub const LENGTH_ENV: &str = "SAXPY_LENGTH";

/// The number of elements if nothing else is configured.
pub const DEFAULT_LENGTH: usize = 262_144;
/// The scalar `a` if nothing else is configured.
pub const DEFAULT_ALPHA: f32 = 2.0;

/// How the device is chosen.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceChoice {
    /// Position in the (filtered) device list.
    Index(usize),
    /// PCI-ID or UUID.
    Unique(UniqueId),
}

impl Default for DeviceChoice {
    fn default() -> Self {
        Self::Index(0)
    }
}

/// Everything a run depends on.
///
/// It is not changed once the pipeline started.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Number of elements of `x` and `y`.
    pub length: usize,
    /// Which device to run on.
    pub device: DeviceChoice,
    /// Restricts the candidate devices.
    pub filter: DeviceFilter,
    /// The framework to use, the preferred one of the device if `None`.
    pub framework: Option<Framework>,
    /// The representation the kernel is loaded from, the first one the device supports if
    /// `None`.
    pub format: Option<ProgramFormat>,
    /// The scalar `a`.
    pub alpha: f32,
    /// Seed of the input generator, a random one if `None`.
    pub seed: Option<u64>,
    /// Whether transfers and the kernel share a queue.
    pub streams: StreamMode,
    /// Directory the kernel files are loaded from.
    pub kernel_dir: PathBuf,
    /// How the device result is compared against the host reference.
    pub comparison: Comparison,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
            device: DeviceChoice::default(),
            filter: DeviceFilter::default(),
            framework: None,
            format: None,
            alpha: DEFAULT_ALPHA,
            seed: None,
            streams: StreamMode::default(),
            kernel_dir: default_kernel_dir(),
            comparison: Comparison::default(),
        }
    }
}

impl Config {
    /// The default configuration with the values of [`KERNEL_DIR_ENV`] and [`LENGTH_ENV`]
    /// applied, if they are set.
    pub fn from_env() -> GPUResult<Self> {
        Self::from_env_with_length(None)
    }

    /// Like [`Config::from_env`], but a given `length` takes precedence. [`LENGTH_ENV`] isn't
    /// read at all then.
    pub fn from_env_with_length(length: Option<usize>) -> GPUResult<Self> {
        let mut config = Self::default();
        if let Some(kernel_dir) = env::var_os(KERNEL_DIR_ENV) {
            debug!("Kernel directory set by {}.", KERNEL_DIR_ENV);
            config.kernel_dir = PathBuf::from(kernel_dir);
        }
        match length {
            Some(length) => config.length = length,
            None => {
                if let Ok(length) = env::var(LENGTH_ENV) {
                    config.length = parse_length(&length)?;
                }
            }
        }
        Ok(config)
    }
}

/// Parses a number of elements, it must be positive and fit into the 32-bit kernel argument.
pub fn parse_length(length: &str) -> GPUResult<usize> {
    let parsed = u32::from_str(length.trim())
        .ok()
        .filter(|length| *length > 0)
        .ok_or_else(|| {
            GPUError::InvalidArgument(format!(
                "length must be a positive 32-bit integer, got `{}`",
                length
            ))
        })?;
    Ok(parsed as usize)
}

/// The `kernels` directory next to the executable, if there is one, else the one shipped with
/// the crate.
pub fn default_kernel_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .map(|dir| dir.join("kernels"))
        .filter(|dir| dir.is_dir())
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("kernels"))
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::{parse_length, Config, DeviceChoice, DEFAULT_LENGTH, KERNEL_DIR_ENV, LENGTH_ENV};
    use crate::error::GPUError;

    #[test]
    fn test_defaults() {
        temp_env::with_vars_unset([KERNEL_DIR_ENV, LENGTH_ENV], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config, Config::default());
            assert_eq!(config.length, DEFAULT_LENGTH);
            assert_eq!(config.alpha, 2.0);
            assert_eq!(config.device, DeviceChoice::Index(0));
            assert!(config.kernel_dir.ends_with("kernels"));
        });
    }

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                (KERNEL_DIR_ENV, Some("/srv/saxpy/kernels")),
                (LENGTH_ENV, Some("1024")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.kernel_dir, PathBuf::from("/srv/saxpy/kernels"));
                assert_eq!(config.length, 1024);
            },
        );
    }

    #[test]
    fn test_from_env_invalid_length() {
        temp_env::with_var(LENGTH_ENV, Some("lots"), || {
            assert!(matches!(
                Config::from_env(),
                Err(GPUError::InvalidArgument(_))
            ));
        });
    }

    #[test]
    fn test_given_length_overrides_env() {
        temp_env::with_var(LENGTH_ENV, Some("lots"), || {
            let config = Config::from_env_with_length(Some(16)).unwrap();
            assert_eq!(config.length, 16);
        });
        temp_env::with_var(LENGTH_ENV, Some("1024"), || {
            assert_eq!(Config::from_env_with_length(Some(16)).unwrap().length, 16);
            assert_eq!(Config::from_env_with_length(None).unwrap().length, 1024);
        });
    }

    #[test]
    fn test_parse_length() {
        assert_eq!(parse_length("1").unwrap(), 1);
        assert_eq!(parse_length(" 1048576 ").unwrap(), 1_048_576);
        assert!(parse_length("0").is_err());
        assert!(parse_length("-3").is_err());
        assert!(parse_length("4294967296").is_err());
    }
}
