//! The OpenCL specific implementation of a [`Device`], [`Program`] and [`Event`].
//!
//! Transfers are blocking, in order to have higher safety guarantees: the host data may be
//! dropped right after the call returns. Kernel launches are asynchronous and return an event.

pub(crate) mod utils;

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::time::Duration;

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::error_codes::ClError;
use opencl3::kernel::ExecuteKernel;
use opencl3::memory::{CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY};
use opencl3::types::{cl_event, CL_BLOCKING};

use log::debug;

use crate::backend::{self, Access, Backend, KernelArg};
use crate::device::{Capabilities, DeviceType, DeviceUuid, PciId, Vendor};
use crate::error::{GPUError, GPUResult};

/// The lowest level identifier of an OpenCL device, it changes whenever a device is initialized.
#[allow(non_camel_case_types)]
pub type cl_device_id = opencl3::types::cl_device_id;

/// OpenCL specific device.
#[derive(Debug, Clone)]
pub struct Device {
    vendor: Vendor,
    name: String,
    /// The total memory of the GPU in bytes.
    memory: u64,
    /// The number of parallel compute units.
    compute_units: u32,
    /// Major and minor version of the compute capabilitiy (only available on Nvidia GPUs).
    compute_capability: Option<(u32, u32)>,
    device_type: DeviceType,
    capabilities: Capabilities,
    pci_id: PciId,
    uuid: Option<DeviceUuid>,
    device: opencl3::device::Device,
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

    /// Returns the major and minor version of the compute capability (only available on Nvidia
    /// GPUs).
    pub fn compute_capability(&self) -> Option<(u32, u32)> {
        self.compute_capability
    }

    /// Returns whether it's a CPU, GPU or accelerator.
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Returns which program representations the device can load.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
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

    /// Low-level access to the device identifier.
    ///
    /// It changes when the device is initialized and should only be used to interact with other
    /// libraries that work on the lowest OpenCL level.
    pub fn cl_device_id(&self) -> cl_device_id {
        self.device.id()
    }
}

/// Completion handle of an OpenCL command.
#[derive(Debug)]
pub struct Event {
    event: opencl3::event::Event,
}

impl Event {
    fn raw(&self) -> cl_event {
        self.event.get()
    }
}

impl backend::Event for Event {
    fn wait(&self) -> GPUResult<()> {
        self.event.wait()?;
        Ok(())
    }

    fn elapsed(&self) -> GPUResult<Option<Duration>> {
        self.event.wait()?;
        let start = self.event.profiling_command_start()?;
        let end = self.event.profiling_command_end()?;
        Ok(Some(Duration::from_nanos(end.saturating_sub(start))))
    }
}

/// Abstraction that contains everything to run an OpenCL kernel on a GPU.
///
/// It implements the same [`Backend`] API as the CUDA and host programs.
pub struct Program {
    device_name: String,
    queue: CommandQueue,
    context: Context,
    kernels_by_name: HashMap<String, opencl3::kernel::Kernel>,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("device_name", &self.device_name)
            .field("kernels", &self.kernels_by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Program {
    /// Creates a program for a specific device from OpenCL source code.
    pub fn from_opencl(device: &Device, src: &str) -> GPUResult<Program> {
        debug!("Creating OpenCL program from source.");
        let context = Context::from_device(&device.device)?;
        let program = opencl3::program::Program::create_from_source(&context, src)?;
        Self::build(device, context, program)
    }

    /// Creates a program for a specific device from SPIR-V intermediate language.
    pub fn from_il(device: &Device, il: &[u8]) -> GPUResult<Program> {
        debug!("Creating OpenCL program from intermediate language.");
        let context = Context::from_device(&device.device)?;
        let program = opencl3::program::Program::create_from_il(&context, il)?;
        Self::build(device, context, program)
    }

    /// Creates a program for a specific device from a compiled OpenCL binary.
    pub fn from_binary(device: &Device, bin: Vec<u8>) -> GPUResult<Program> {
        debug!("Creating OpenCL program from binary.");
        let context = Context::from_device(&device.device)?;
        let bins = vec![&bin[..]];
        let program = unsafe {
            opencl3::program::Program::create_from_binary(&context, context.devices(), &bins)
        }?;
        Self::build(device, context, program)
    }

    fn build(
        device: &Device,
        context: Context,
        mut program: opencl3::program::Program,
    ) -> GPUResult<Program> {
        debug!("Building kernel for {}…", device.name());
        if let Err(build_error) = program.build(context.devices(), "") {
            let log = build_log(program.get_build_log(context.devices()[0]), &build_error);
            return Err(GPUError::BuildError {
                device: device.name(),
                code: build_error.0,
                log,
            });
        }
        debug!("Building kernel for {}: done.", device.name());

        let queue = CommandQueue::create_default(&context, CL_QUEUE_PROFILING_ENABLE)?;
        let kernels = opencl3::kernel::create_program_kernels(&program)?;
        let kernels_by_name = kernels
            .into_iter()
            .map(|kernel| {
                let name = kernel.function_name()?;
                Ok((name, kernel))
            })
            .collect::<Result<_, ClError>>()?;
        Ok(Program {
            device_name: device.name(),
            queue,
            context,
            kernels_by_name,
        })
    }
}

/// The build log of the device, or the build error itself if the log is empty or cannot be
/// retrieved.
fn build_log(log: Result<String, ClError>, build_error: &ClError) -> String {
    match log {
        Ok(log) if !log.trim().is_empty() => log,
        Ok(_) => build_error.to_string(),
        Err(log_error) => {
            debug!("Cannot retrieve the OpenCL build log: {}", log_error);
            build_error.to_string()
        }
    }
}

impl Backend for Program {
    type Memory = opencl3::memory::Buffer<u8>;
    type Queue = CommandQueue;
    type Event = Event;

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    fn create_queue(&self) -> GPUResult<CommandQueue> {
        Ok(CommandQueue::create_default(
            &self.context,
            CL_QUEUE_PROFILING_ENABLE,
        )?)
    }

    fn allocate(&self, bytes: usize, access: Access) -> GPUResult<Self::Memory> {
        let flags = match access {
            Access::ReadOnly => CL_MEM_READ_ONLY,
            Access::WriteOnly => CL_MEM_WRITE_ONLY,
            Access::ReadWrite => CL_MEM_READ_WRITE,
        };
        let mut buffer = unsafe {
            opencl3::memory::Buffer::<u8>::create(&self.context, flags, bytes, ptr::null_mut())?
        };
        // Write some data right-away. This makes a significant performance different.
        unsafe {
            self.queue
                .enqueue_write_buffer(&mut buffer, CL_BLOCKING, 0, &[0u8], &[])?;
        }
        Ok(buffer)
    }

    fn enqueue_write(
        &self,
        queue: &CommandQueue,
        memory: &mut Self::Memory,
        data: &[u8],
    ) -> GPUResult<Event> {
        // Blocking, so that `data` may be dropped once this function returns.
        let event = unsafe { queue.enqueue_write_buffer(memory, CL_BLOCKING, 0, data, &[])? };
        Ok(Event { event })
    }

    fn enqueue_read(
        &self,
        queue: &CommandQueue,
        memory: &Self::Memory,
        data: &mut [u8],
    ) -> GPUResult<()> {
        unsafe {
            queue.enqueue_read_buffer(memory, CL_BLOCKING, 0, data, &[])?;
        }
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &CommandQueue,
        name: &str,
        global_size: usize,
        args: &[KernelArg<'_, Self::Memory>],
        wait_list: &[&Event],
    ) -> GPUResult<Event> {
        let kernel = self
            .kernels_by_name
            .get(name)
            .ok_or_else(|| GPUError::KernelNotFound(name.to_string()))?;
        let mut builder = ExecuteKernel::new(kernel);
        for arg in args {
            unsafe {
                match arg {
                    KernelArg::Memory(memory) => builder.set_arg(*memory),
                    KernelArg::F32(value) => builder.set_arg(value),
                    KernelArg::U32(value) => builder.set_arg(value),
                };
            }
        }
        let wait_list = wait_list.iter().map(|event| event.raw()).collect::<Vec<_>>();
        if !wait_list.is_empty() {
            builder.set_event_wait_list(&wait_list);
        }
        // The local work size is left to the implementation.
        builder.set_global_work_size(global_size);
        let event = unsafe { builder.enqueue_nd_range(queue)? };
        Ok(Event { event })
    }

    fn wait_for(&self, queue: &CommandQueue, event: &Event) -> GPUResult<()> {
        queue.enqueue_barrier_with_wait_list(&[event.raw()])?;
        Ok(())
    }

    fn finish(&self, queue: &CommandQueue) -> GPUResult<()> {
        queue.finish()?;
        Ok(())
    }
}
