//! Single-shot SAXPY (`y = a * x + y`) offload to a compute device, validated on the host.
//!
//! The orchestration is written once against the [`Backend`] trait: select a device, load and
//! build the kernel, upload the inputs, run the kernel, download the result and compare it with
//! a host computation. See [`pipeline`] for the whole flow.
//!
//! Feature flags
//! -------------
//!
//! There are two [feature flags], `cuda` and `opencl`. Both are disabled by default. The host
//! device, which runs kernels on worker threads of the current process, is always available. You
//! can enable both features at the same time.
//!
//! [feature flags]: https://doc.rust-lang.org/cargo/reference/manifest.html#the-features-section

#![warn(missing_docs)]

mod backend;
mod buffer;
pub mod config;
mod device;
mod error;
mod kernel;
mod loader;
pub mod pipeline;
mod program;
mod selector;
mod validate;

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use backend::{Access, Backend, Event, KernelArg};
pub use buffer::Buffer;
pub use config::{Config, DeviceChoice};
pub use device::{
    Capabilities, Device, DeviceFilter, DeviceType, DeviceUuid, Framework, PciId, UniqueId,
    Vendor,
};
pub use error::{GPUError, GPUResult, ValidationError, EXIT_FAILURE};
pub use kernel::{Kernel, KernelArgument};
pub use loader::{ProgramFormat, ProgramLoader};
pub use pipeline::{offload, run, Offload, Offloaded, Pipeline, Report, Stage, StreamMode, Workload};
pub use program::{Job, Program};
pub use selector::DeviceSelector;
pub use validate::{host_saxpy, validate, Comparison};
