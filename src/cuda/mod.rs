//! The CUDA specific implementation of a [`Device`], [`Program`] and [`Event`].
//!
//! Transfers are synchronous, in order to have higher safety gurarantees. Every queue is its own
//! stream, kernel launches are asynchronous on it and are bracketed by a pair of events, so that
//! their execution time can be measured. The default stream isn't used for two reasons:
//!
//!   1. RustaCUDA doesn't expose a higher level function to launch a kernel on the default stream
//!   2. There was a bug, when the default stream was used implicitly via RustaCUDA's synchronuous
//!   copy methods. To prevent such kind of bugs, be explicit which stream is used.

pub(crate) mod utils;

use std::ffi::{c_void, CString};
use std::hash::{Hash, Hasher};
use std::time::Duration;

use log::debug;
use rustacuda::error::CudaError;
use rustacuda::event::EventFlags;
use rustacuda::memory::{AsyncCopyDestination, DeviceBuffer};
use rustacuda::stream::{Stream, StreamFlags};

use crate::backend::{self, Access, Backend, KernelArg};
use crate::device::{Capabilities, DeviceUuid, PciId, Vendor};
use crate::error::{GPUError, GPUResult};

/// Number of threads per block, the grid is sized to cover all work-items.
const BLOCK_SIZE: usize = 256;

/// CUDA specific device.
#[derive(Debug, Clone)]
pub struct Device {
    vendor: Vendor,
    name: String,
    /// The total memory of the GPU in bytes.
    memory: u64,
    /// Number of streaming multiprocessors.
    compute_units: u32,
    /// The compute capability of the device, major and minor version.
    compute_capability: (u32, u32),
    pci_id: PciId,
    uuid: Option<DeviceUuid>,
    context: rustacuda::context::UnownedContext,
}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vendor.hash(state);
        self.name.hash(state);
        self.memory.hash(state);
        self.pci_id.hash(state);
        self.uuid.hash(state);
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.vendor == other.vendor
            && self.name == other.name
            && self.memory == other.memory
            && self.pci_id == other.pci_id
            && self.uuid == other.uuid
    }
}

impl Eq for Device {}

impl Device {
    /// Returns the [`Vendor`] of the GPU.
    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    /// Returns the name of the GPU, e.g. "GeForce RTX 3090".
    pub fn name(&self) -> String {
        self.name.clone()
    }

    /// Returns the memory of the GPU in bytes.
    pub fn memory(&self) -> u64 {
        self.memory
    }

    /// Returns the number of compute units of the GPU.
    pub fn compute_units(&self) -> u32 {
        self.compute_units
    }

    /// Returns the major and minor version of compute capability of the GPU.
    pub fn compute_capability(&self) -> (u32, u32) {
        self.compute_capability
    }

    /// CUDA devices only load precompiled binaries.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            profiling: true,
            source: false,
            il: false,
            binary: true,
        }
    }

    /// Returns the PCI-ID of the GPU, see the [`PciId`] type for more information.
    pub fn pci_id(&self) -> PciId {
        self.pci_id
    }

    /// Returns the PCI-ID of the GPU if available, see the [`DeviceUuid`] type for more
    /// information.
    pub fn uuid(&self) -> Option<DeviceUuid> {
        self.uuid
    }
}

/// Completion handle of a CUDA command, recorded on the stream before and after it.
#[derive(Debug)]
pub struct Event {
    start: rustacuda::event::Event,
    end: rustacuda::event::Event,
}

impl Event {
    fn record_start(stream: &Stream) -> GPUResult<rustacuda::event::Event> {
        let start = rustacuda::event::Event::new(EventFlags::DEFAULT)?;
        start.record(stream)?;
        Ok(start)
    }

    fn record_end(start: rustacuda::event::Event, stream: &Stream) -> GPUResult<Self> {
        let end = rustacuda::event::Event::new(EventFlags::DEFAULT)?;
        end.record(stream)?;
        Ok(Self { start, end })
    }
}

impl backend::Event for Event {
    fn wait(&self) -> GPUResult<()> {
        self.end.synchronize()?;
        Ok(())
    }

    fn elapsed(&self) -> GPUResult<Option<Duration>> {
        self.end.synchronize()?;
        let millis = self.end.elapsed_time_f32(&self.start)?;
        Ok(Some(Duration::from_secs_f32(millis.max(0.0) / 1000.0)))
    }
}

/// Abstraction that contains everything to run a CUDA kernel on a GPU.
///
/// It implements the same [`Backend`] API as the OpenCL and host programs.
#[derive(Debug)]
pub struct Program {
    context: rustacuda::context::UnownedContext,
    module: rustacuda::module::Module,
    stream: Stream,
    device_name: String,
}

impl Program {
    /// Creates a program for a specific device from a compiled CUDA binary (cubin or fatbin).
    pub fn from_bytes(device: &Device, bytes: &[u8]) -> GPUResult<Program> {
        debug!("Creating CUDA program from bytes.");
        rustacuda::context::CurrentContext::set_current(&device.context)?;
        let module = rustacuda::module::Module::load_from_bytes(bytes).map_err(|err| {
            Self::pop_context();
            GPUError::BuildError {
                device: device.name(),
                code: err as i32,
                log: format!("Loading the CUDA module failed: {}", err),
            }
        })?;
        let stream = Stream::new(StreamFlags::NON_BLOCKING, None).map_err(|err| {
            Self::pop_context();
            err
        })?;
        let prog = Program {
            module,
            stream,
            device_name: device.name(),
            context: device.context.clone(),
        };
        Self::pop_context();
        Ok(prog)
    }

    /// Run some code in the context of the program.
    ///
    /// It sets the correct contexts.
    fn run<F, R>(&self, fun: F) -> GPUResult<R>
    where
        F: FnOnce() -> GPUResult<R>,
    {
        rustacuda::context::CurrentContext::set_current(&self.context)?;
        let result = fun();
        Self::pop_context();
        result
    }

    /// Pop the current context.
    ///
    /// It panics as it's an unrecoverable error.
    fn pop_context() {
        rustacuda::context::ContextStack::pop().expect("Cannot remove context.");
    }
}

// The module and stream are only used while the program's context is current, see `run()`.
unsafe impl Send for Program {}

impl Backend for Program {
    type Memory = DeviceBuffer<u8>;
    type Queue = Stream;
    type Event = Event;

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn queue(&self) -> &Stream {
        &self.stream
    }

    fn create_queue(&self) -> GPUResult<Stream> {
        self.run(|| Ok(Stream::new(StreamFlags::NON_BLOCKING, None)?))
    }

    // CUDA doesn't distinguish between read-only and writable global memory.
    fn allocate(&self, bytes: usize, _access: Access) -> GPUResult<Self::Memory> {
        self.run(|| Ok(unsafe { DeviceBuffer::<u8>::zeroed(bytes)? }))
    }

    fn enqueue_write(
        &self,
        queue: &Stream,
        memory: &mut Self::Memory,
        data: &[u8],
    ) -> GPUResult<Event> {
        self.run(|| {
            let start = Event::record_start(queue)?;
            // It is safe as we synchronize the stream after the call.
            unsafe { memory.async_copy_from(data, queue)? };
            let event = Event::record_end(start, queue)?;
            queue.synchronize()?;
            Ok(event)
        })
    }

    fn enqueue_read(&self, queue: &Stream, memory: &Self::Memory, data: &mut [u8]) -> GPUResult<()> {
        self.run(|| {
            // It is safe as we synchronize the stream after the call.
            unsafe { memory.async_copy_to(data, queue)? };
            queue.synchronize()?;
            Ok(())
        })
    }

    fn enqueue_kernel(
        &self,
        queue: &Stream,
        name: &str,
        global_size: usize,
        args: &[KernelArg<'_, Self::Memory>],
        wait_list: &[&Event],
    ) -> GPUResult<Event> {
        let function_name = CString::new(name)
            .map_err(|_| GPUError::InvalidArgument(format!("kernel name {:?}", name)))?;
        self.run(|| {
            let function = self
                .module
                .get_function(&function_name)
                .map_err(|error| match error {
                    CudaError::NotFound => GPUError::KernelNotFound(name.to_string()),
                    error => error.into(),
                })?;
            for event in wait_list {
                event.end.synchronize()?;
            }

            let params = args
                .iter()
                .map(|arg| match arg {
                    // This is a hack: the device pointer is the first field of the buffer, so the
                    // address of the buffer is also the address of the pointer.
                    KernelArg::Memory(memory) => *memory as *const _ as *mut c_void,
                    KernelArg::F32(value) => value as *const _ as *mut c_void,
                    KernelArg::U32(value) => value as *const _ as *mut c_void,
                })
                .collect::<Vec<_>>();

            let grid_size = ((global_size + BLOCK_SIZE - 1) / BLOCK_SIZE).max(1);
            let start = Event::record_start(queue)?;
            // It is safe to launch the kernel as the arguments need to live when the kernel is
            // called, the buffers are borrowed for as long as the builder lives.
            unsafe {
                queue.launch(&function, grid_size as u32, BLOCK_SIZE as u32, 0, &params)?;
            }
            Event::record_end(start, queue)
        })
    }

    fn wait_for(&self, _queue: &Stream, event: &Event) -> GPUResult<()> {
        self.run(|| Ok(event.end.synchronize()?))
    }

    fn finish(&self, queue: &Stream) -> GPUResult<()> {
        self.run(|| Ok(queue.synchronize()?))
    }
}
