//! The offload pipeline: select a device, build the program, move the data, run the kernel,
//! fetch and validate the result.
//!
//! The stages run strictly in that order, once. Any error ends the run.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{Access, Backend, Event};
use crate::buffer::Buffer;
use crate::config::{Config, DeviceChoice};
use crate::device::{Device, Framework, UniqueId};
use crate::error::{GPUError, GPUResult};
use crate::kernel::Kernel;
use crate::loader::{ProgramFormat, ProgramLoader};
use crate::program::Job;
use crate::selector::DeviceSelector;
use crate::validate::{host_saxpy, validate, Comparison};

/// Name of the kernel, it's also the name of the kernel file.
pub const KERNEL_NAME: &str = "saxpy";

/// Inputs are drawn uniformly from `[-INPUT_RANGE, INPUT_RANGE]`.
const INPUT_RANGE: f32 = 100.0;

/// Where a run is.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    /// Nothing happened yet.
    Start,
    /// A device was chosen.
    DeviceSelected,
    /// The kernel program is built for the device.
    ProgramBuilt,
    /// The inputs are allocated and their upload is enqueued.
    BuffersReady,
    /// The kernel is enqueued.
    Dispatched,
    /// The result is back on the host.
    Fetched,
    /// The result matches the host reference.
    Validated,
    /// A stage returned an error.
    Failed,
}

impl Stage {
    /// The stage that follows on success, `None` for the terminal ones.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Start => Some(Self::DeviceSelected),
            Self::DeviceSelected => Some(Self::ProgramBuilt),
            Self::ProgramBuilt => Some(Self::BuffersReady),
            Self::BuffersReady => Some(Self::Dispatched),
            Self::Dispatched => Some(Self::Fetched),
            Self::Fetched => Some(Self::Validated),
            Self::Validated | Self::Failed => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How transfers and the kernel are distributed over queues.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum StreamMode {
    /// Everything is submitted to a single in-order queue.
    #[default]
    Single,
    /// Uploads, the kernel and the download each get their own queue. The kernel waits for the
    /// uploads and the download waits for the kernel.
    Split,
}

impl FromStr for StreamMode {
    type Err = GPUError;

    fn from_str(mode: &str) -> GPUResult<Self> {
        match mode {
            "single" => Ok(Self::Single),
            "split" => Ok(Self::Split),
            _ => Err(GPUError::InvalidArgument(format!(
                "unknown stream mode `{}`, expected single or split",
                mode
            ))),
        }
    }
}

/// The inputs of a SAXPY run.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    /// The scalar `a`.
    pub alpha: f32,
    /// The vector that is scaled.
    pub x: Vec<f32>,
    /// The vector that is added to, it holds the result afterwards.
    pub y: Vec<f32>,
}

impl Workload {
    /// Generates `length` uniformly distributed values in `[-100, 100]` for each vector.
    ///
    /// The same seed always produces the same inputs.
    pub fn random(length: usize, alpha: f32, seed: Option<u64>) -> GPUResult<Self> {
        if length == 0 {
            return Err(GPUError::InvalidArgument(
                "the workload needs at least one element".to_string(),
            ));
        }
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let range = Uniform::new_inclusive(-INPUT_RANGE, INPUT_RANGE);
        let x = (&mut rng).sample_iter(range).take(length).collect();
        let y = (&mut rng).sample_iter(range).take(length).collect();
        Ok(Self { alpha, x, y })
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// The device side result of an [`Offload`].
#[derive(Clone, Debug, PartialEq)]
pub struct Offloaded {
    /// `a * x + y` as computed by the device.
    pub y: Vec<f32>,
    /// Execution time of the kernel, if the device can measure it.
    pub kernel_time: Option<Duration>,
}

/// Moves a [`Workload`] to the device, runs the kernel and fetches the result.
///
/// It is a [`Job`], so it runs on every framework.
pub struct Offload<'a> {
    workload: &'a Workload,
    mode: StreamMode,
    pipeline: Option<&'a mut Pipeline>,
}

impl<'a> Offload<'a> {
    /// Prepares the offload of `workload`.
    pub fn new(workload: &'a Workload, mode: StreamMode) -> Self {
        Self {
            workload,
            mode,
            pipeline: None,
        }
    }

    /// Reports the progress to `pipeline`.
    fn tracked(mut self, pipeline: &'a mut Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    fn advance(&mut self, next: Stage) -> GPUResult<()> {
        match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.advance(next),
            None => Ok(()),
        }
    }
}

impl Job for Offload<'_> {
    type Output = Offloaded;

    fn run<B: Backend>(mut self, backend: &B) -> GPUResult<Offloaded> {
        let workload = self.workload;
        let length = workload.len();
        let n = u32::try_from(length).map_err(|_| {
            GPUError::InvalidArgument(format!("{} elements don't fit a 32-bit index", length))
        })?;

        let split_queues;
        let (upload_queue, compute_queue, fetch_queue) = match self.mode {
            StreamMode::Single => (backend.queue(), backend.queue(), backend.queue()),
            StreamMode::Split => {
                split_queues = (
                    backend.create_queue()?,
                    backend.create_queue()?,
                    backend.create_queue()?,
                );
                (&split_queues.0, &split_queues.1, &split_queues.2)
            }
        };
        debug!("Offloading {} elements ({:?} queues).", length, self.mode);

        let mut x = Buffer::allocate(backend, length, Access::ReadOnly)?;
        let mut y = Buffer::allocate(backend, length, Access::ReadWrite)?;
        let x_uploaded = x.upload(backend, upload_queue, &workload.x)?;
        let y_uploaded = y.upload(backend, upload_queue, &workload.y)?;
        self.advance(Stage::BuffersReady)?;

        let kernel_done = Kernel::new(backend, compute_queue, KERNEL_NAME, length)
            .arg(&n)
            .arg(&workload.alpha)
            .arg(&x)
            .arg(&y)
            .wait_for(&x_uploaded)
            .wait_for(&y_uploaded)
            .run()?;
        self.advance(Stage::Dispatched)?;

        if self.mode == StreamMode::Split {
            backend.wait_for(fetch_queue, &kernel_done)?;
        }
        let result = y.download_vec(backend, fetch_queue)?;
        // Nothing may still be in flight once the queues are dropped.
        if self.mode == StreamMode::Split {
            backend.finish(upload_queue)?;
            backend.finish(compute_queue)?;
        }
        self.advance(Stage::Fetched)?;

        let kernel_time = kernel_done.elapsed()?;
        Ok(Offloaded {
            y: result,
            kernel_time,
        })
    }
}

/// Summary of a successful run.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    /// Name of the device the kernel ran on.
    pub device_name: String,
    /// Identifier of the device the kernel ran on.
    pub unique_id: UniqueId,
    /// The framework that was used.
    pub framework: Framework,
    /// The representation the kernel was loaded from.
    pub format: ProgramFormat,
    /// Number of elements.
    pub length: usize,
    /// Time of the host reference computation.
    pub host_time: Duration,
    /// Execution time of the kernel, if the device can measure it.
    pub device_time: Option<Duration>,
}

/// Tracks a single run through its [`Stage`]s.
#[derive(Debug)]
pub struct Pipeline {
    stage: Stage,
    // The last stage that was reached, before the run failed.
    failed_after: Option<Stage>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// A pipeline at [`Stage::Start`].
    pub fn new() -> Self {
        Self {
            stage: Stage::Start,
            failed_after: None,
        }
    }

    /// The current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// If the run failed, the last stage that completed successfully.
    pub fn failed_after(&self) -> Option<Stage> {
        self.failed_after
    }

    /// Moves to `next`, which must directly follow the current stage.
    fn advance(&mut self, next: Stage) -> GPUResult<()> {
        if self.stage.next() != Some(next) {
            return Err(GPUError::Generic(format!(
                "Pipeline cannot move from {} to {}.",
                self.stage, next
            )));
        }
        debug!("Pipeline stage: {}", next);
        self.stage = next;
        Ok(())
    }

    fn fail(&mut self) {
        if self.stage != Stage::Failed {
            self.failed_after = Some(self.stage);
            self.stage = Stage::Failed;
        }
    }

    /// Runs all stages on a device of `selector`, as configured.
    ///
    /// A pipeline runs only once.
    pub fn run(&mut self, selector: &DeviceSelector, config: &Config) -> GPUResult<Report> {
        if self.stage != Stage::Start {
            return Err(GPUError::Generic(format!(
                "Pipeline already ran, it is at {}.",
                self.stage
            )));
        }
        let result = self.run_stages(selector, config);
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn run_stages(&mut self, selector: &DeviceSelector, config: &Config) -> GPUResult<Report> {
        let device = match config.device {
            DeviceChoice::Index(index) => selector.select(index)?,
            DeviceChoice::Unique(unique_id) => selector.select_unique(unique_id)?,
        };
        self.advance(Stage::DeviceSelected)?;

        let loader = ProgramLoader::new(&config.kernel_dir);
        let (framework, format) =
            loader.resolve(device, config.framework, config.format, KERNEL_NAME)?;
        let program = loader.load(device, framework, format, KERNEL_NAME)?;
        self.advance(Stage::ProgramBuilt)?;

        let workload = Workload::random(config.length, config.alpha, config.seed)?;
        let host_start = Instant::now();
        let expected = host_saxpy(workload.alpha, &workload.x, &workload.y);
        let host_time = host_start.elapsed();

        let offloaded = program.run(Offload::new(&workload, config.streams).tracked(self))?;
        validate(&expected, &offloaded.y, config.comparison)?;
        self.advance(Stage::Validated)?;
        info!("Result of {} elements validated on {}.", workload.len(), device.name());

        Ok(Report {
            device_name: program.device_name().to_string(),
            unique_id: device.unique_id(),
            framework,
            format,
            length: workload.len(),
            host_time,
            device_time: offloaded.kernel_time,
        })
    }
}

/// Runs the pipeline on a device of the system, as configured.
pub fn run(config: &Config) -> GPUResult<Report> {
    let mut selector = DeviceSelector::from_system(config.filter);
    if let Some(framework) = config.framework {
        selector = selector.with_framework(framework);
    }
    Pipeline::new().run(&selector, config)
}

/// Offloads `workload` to `device` and compares the result with the host reference.
///
/// It's the pipeline without the device selection, for callers that already chose a device.
pub fn offload(
    loader: &ProgramLoader,
    device: &Device,
    workload: &Workload,
    mode: StreamMode,
    comparison: Comparison,
) -> GPUResult<Offloaded> {
    let (framework, format) = loader.resolve(device, None, None, KERNEL_NAME)?;
    let program = loader.load(device, framework, format, KERNEL_NAME)?;
    let offloaded = program.run(Offload::new(workload, mode))?;
    let expected = host_saxpy(workload.alpha, &workload.x, &workload.y);
    validate(&expected, &offloaded.y, comparison)?;
    Ok(offloaded)
}
