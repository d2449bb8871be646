//! Loading and building kernel programs from files.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info};

#[cfg(feature = "cuda")]
use crate::cuda;
use crate::device::{Capabilities, Device, Framework};
use crate::error::{GPUError, GPUResult};
use crate::host;
#[cfg(feature = "opencl")]
use crate::opencl;
use crate::program::Program;

/// The representation a program is loaded from.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ProgramFormat {
    /// Kernel source code, compiled at runtime.
    #[default]
    Source,
    /// An intermediate language like SPIR-V.
    Il,
    /// A precompiled device binary.
    Binary,
}

impl ProgramFormat {
    /// All formats, the preferred one first.
    pub const ALL: [ProgramFormat; 3] = [Self::Source, Self::Il, Self::Binary];

    /// Returns the file extension of a program in this format for the given framework.
    pub fn extension(&self, framework: Framework) -> &'static str {
        match (self, framework) {
            (Self::Source, _) => "cl",
            (Self::Il, _) => "spv",
            #[cfg(feature = "cuda")]
            (Self::Binary, Framework::Cuda) => "fatbin",
            (Self::Binary, _) => "bin",
        }
    }

    fn is_supported(&self, capabilities: Capabilities) -> bool {
        match self {
            Self::Source => capabilities.source,
            Self::Il => capabilities.il,
            Self::Binary => capabilities.binary,
        }
    }
}

impl FromStr for ProgramFormat {
    type Err = GPUError;

    fn from_str(format: &str) -> GPUResult<Self> {
        match format {
            "source" => Ok(Self::Source),
            "il" => Ok(Self::Il),
            "binary" => Ok(Self::Binary),
            _ => Err(GPUError::InvalidArgument(format!(
                "unknown program format `{}`, expected one of source, il, binary",
                format
            ))),
        }
    }
}

impl fmt::Display for ProgramFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = match self {
            Self::Source => "source",
            Self::Il => "il",
            Self::Binary => "binary",
        };
        write!(f, "{}", format)
    }
}

/// Loads programs from a kernel directory.
///
/// A kernel named `saxpy` is expected in `<kernel_dir>/saxpy.<extension>`, see
/// [`ProgramFormat::extension`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProgramLoader {
    kernel_dir: PathBuf,
}

impl ProgramLoader {
    /// Creates a loader that reads from `kernel_dir`.
    pub fn new<P: Into<PathBuf>>(kernel_dir: P) -> Self {
        Self {
            kernel_dir: kernel_dir.into(),
        }
    }

    /// Returns the directory the kernels are loaded from.
    pub fn kernel_dir(&self) -> &Path {
        &self.kernel_dir
    }

    /// Returns the path of the file `kernel` is loaded from.
    pub fn path(&self, framework: Framework, format: ProgramFormat, kernel: &str) -> PathBuf {
        self.kernel_dir
            .join(format!("{}.{}", kernel, format.extension(framework)))
    }

    /// Chooses the framework and format `kernel` is loaded with on `device`.
    ///
    /// Requested values are used as they are. Otherwise the frameworks of the device are tried in
    /// order of preference, each with the formats it supports. The first combination whose kernel
    /// file exists wins. If none exists, it's the first supported combination, loading it then
    /// reports the missing file.
    pub fn resolve(
        &self,
        device: &Device,
        framework: Option<Framework>,
        format: Option<ProgramFormat>,
        kernel: &str,
    ) -> GPUResult<(Framework, ProgramFormat)> {
        let frameworks = match framework {
            Some(framework) => vec![framework],
            None => device.frameworks(),
        };
        let candidates = frameworks
            .into_iter()
            .filter_map(|framework| {
                device
                    .capabilities(framework)
                    .map(|capabilities| (framework, capabilities))
            })
            .collect::<Vec<_>>();
        let resolved = resolve(&candidates, format, |framework, format| {
            self.path(framework, format, kernel).is_file()
        })
        .ok_or_else(|| {
            let framework = framework.unwrap_or_else(|| device.framework());
            GPUError::UnsupportedFormat {
                device: device.name(),
                format: match format {
                    Some(format) => format!("{} {}", framework, format),
                    None => framework.to_string(),
                },
            }
        })?;
        debug!(
            "Loading {} with {} {} on {}.",
            kernel,
            resolved.0,
            resolved.1,
            device.name()
        );
        Ok(resolved)
    }

    /// Loads and builds a program for a specific device.
    ///
    /// The format is checked against the capabilities of the device before any file is read. A
    /// failed build returns the build log of the device, there is no fallback to another format.
    pub fn load(
        &self,
        device: &Device,
        framework: Framework,
        format: ProgramFormat,
        kernel: &str,
    ) -> GPUResult<Program> {
        let unsupported = || GPUError::UnsupportedFormat {
            device: device.name(),
            format: format!("{} {}", framework, format),
        };
        let capabilities = device.capabilities(framework).ok_or_else(unsupported)?;
        if !format.is_supported(capabilities) {
            return Err(unsupported());
        }

        let path = self.path(framework, format, kernel);
        info!(
            "Loading {} program from {} for {}.",
            framework,
            path.display(),
            device.name()
        );
        let bytes = fs::read(&path).map_err(|error| {
            GPUError::IO(io::Error::new(
                error.kind(),
                format!("{}: {}", path.display(), error),
            ))
        })?;
        debug!("Read {} bytes from {}.", bytes.len(), path.display());

        match framework {
            Framework::Host => {
                let host_device = device.host_device().ok_or_else(unsupported)?;
                let source = source_text(&path, bytes)?;
                Ok(Program::Host(host::Program::from_source(
                    host_device,
                    &source,
                )?))
            }
            #[cfg(feature = "cuda")]
            Framework::Cuda => {
                let cuda_device = device.cuda_device().ok_or_else(unsupported)?;
                Ok(Program::Cuda(cuda::Program::from_bytes(cuda_device, &bytes)?))
            }
            #[cfg(feature = "opencl")]
            Framework::Opencl => {
                let opencl_device = device.opencl_device().ok_or_else(unsupported)?;
                let program = match format {
                    ProgramFormat::Source => {
                        let source = source_text(&path, bytes)?;
                        opencl::Program::from_opencl(opencl_device, &source)?
                    }
                    ProgramFormat::Il => opencl::Program::from_il(opencl_device, &bytes)?,
                    ProgramFormat::Binary => opencl::Program::from_binary(opencl_device, bytes)?,
                };
                Ok(Program::Opencl(program))
            }
        }
    }
}

/// Picks the first supported `(framework, format)` of `candidates` for which `exists` holds, or
/// the first supported one if there is none.
fn resolve<F>(
    candidates: &[(Framework, Capabilities)],
    format: Option<ProgramFormat>,
    exists: F,
) -> Option<(Framework, ProgramFormat)>
where
    F: Fn(Framework, ProgramFormat) -> bool,
{
    let formats = match format {
        Some(format) => vec![format],
        None => ProgramFormat::ALL.to_vec(),
    };
    let supported = candidates
        .iter()
        .flat_map(|(framework, capabilities)| {
            formats
                .iter()
                .filter(move |format| format.is_supported(*capabilities))
                .map(move |format| (*framework, *format))
        })
        .collect::<Vec<_>>();
    supported
        .iter()
        .copied()
        .find(|(framework, format)| exists(*framework, *format))
        .or_else(|| supported.first().copied())
}

fn source_text(path: &Path, bytes: Vec<u8>) -> GPUResult<String> {
    String::from_utf8(bytes).map_err(|error| {
        GPUError::IO(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: {}", path.display(), error),
        ))
    })
}
