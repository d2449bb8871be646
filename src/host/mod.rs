//! The host specific implementation of a [`Device`], [`Program`], [`Queue`] and [`Event`].
//!
//! The host device runs kernels on the CPU of the current process. Each queue is a worker thread
//! that executes its commands strictly in submission order, the work-items of a kernel are spread
//! over the rayon thread pool. Unlike the OpenCL and CUDA implementations, uploads are truly
//! asynchronous: the data is copied into the command and written once the worker gets to it.

pub(crate) mod kernels;
mod queue;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::debug;

use crate::backend::{self, Access, Backend, KernelArg};
use crate::device::Capabilities;
use crate::error::{GPUError, GPUResult};

use kernels::{HostArg, HostKernel};
use queue::{Command, Failure, Signal};
pub use queue::Queue;

// Error codes mirror the OpenCL ones, so that the exit status is the same for both.
pub(crate) const OUT_OF_RESOURCES: i32 = -5;
pub(crate) const BUILD_PROGRAM_FAILURE: i32 = -11;
pub(crate) const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;
pub(crate) const INVALID_COMMAND_QUEUE: i32 = -36;
pub(crate) const INVALID_KERNEL_ARGS: i32 = -52;
pub(crate) const INVALID_BUFFER_SIZE: i32 = -61;

fn backend_error((code, message): Failure) -> GPUError {
    GPUError::Backend {
        backend: "Host",
        code,
        message,
    }
}

/// Host specific device.
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct Device {
    name: String,
    /// The number of worker threads kernels are spread over.
    compute_units: u32,
}

impl Device {
    pub(crate) fn new() -> Self {
        let compute_units = std::thread::available_parallelism()
            .map(|threads| threads.get() as u32)
            .unwrap_or(1);
        Self {
            name: format!("{} host ({} threads)", std::env::consts::ARCH, compute_units),
            compute_units,
        }
    }

    /// Returns the name of the device, e.g. "x86_64 host (16 threads)".
    pub fn name(&self) -> String {
        self.name.clone()
    }

    /// The host doesn't report its memory, it's always 0.
    pub fn memory(&self) -> u64 {
        0
    }

    /// Returns the number of threads kernels run on.
    pub fn compute_units(&self) -> u32 {
        self.compute_units
    }

    /// The host binds OpenCL C kernel declarations to builtin kernels, it can neither load an
    /// intermediate language nor a binary.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            profiling: true,
            source: true,
            il: false,
            binary: false,
        }
    }
}

/// Host memory standing in for device memory.
#[derive(Debug)]
pub struct Memory {
    data: Arc<RwLock<Vec<u8>>>,
    // Kept separately, so that the size can be checked while a kernel holds the lock.
    len: usize,
    access: Access,
}

impl Memory {
    /// The size of the allocation in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the allocation has zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The access hint the memory was allocated with.
    pub fn access(&self) -> Access {
        self.access
    }
}

/// Completion handle of a host command.
#[derive(Clone, Debug)]
pub struct Event(Arc<Signal>);

impl backend::Event for Event {
    fn wait(&self) -> GPUResult<()> {
        self.0.wait().map_err(backend_error)
    }

    fn elapsed(&self) -> GPUResult<Option<Duration>> {
        self.0.elapsed().map(Some).map_err(backend_error)
    }
}

/// Abstraction that contains everything to run a kernel on the host.
///
/// It implements the same [`Backend`] API as the OpenCL and CUDA programs.
#[derive(Debug)]
pub struct Program {
    device_name: String,
    queue: Queue,
    kernels_by_name: HashMap<String, HostKernel>,
}

impl Program {
    /// Creates a program for the host from OpenCL C source code.
    ///
    /// Every `__kernel` declaration needs a builtin host implementation with the same signature,
    /// otherwise the build fails with a log.
    pub fn from_source(device: &Device, src: &str) -> GPUResult<Program> {
        debug!("Creating host program from source.");
        let kernels = kernels::compile(src).map_err(|log| GPUError::BuildError {
            device: device.name(),
            code: BUILD_PROGRAM_FAILURE,
            log,
        })?;
        let kernels_by_name = kernels
            .into_iter()
            .map(|kernel| (kernel.name().to_string(), kernel))
            .collect();
        let queue = Queue::new("host-queue-0").map_err(backend_error)?;
        Ok(Program {
            device_name: device.name(),
            queue,
            kernels_by_name,
        })
    }

    /// Names of the kernels the program contains.
    pub fn kernel_names(&self) -> Vec<&str> {
        self.kernels_by_name.keys().map(String::as_str).collect()
    }
}

impl Backend for Program {
    type Memory = Memory;
    type Queue = Queue;
    type Event = Event;

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn queue(&self) -> &Queue {
        &self.queue
    }

    fn create_queue(&self) -> GPUResult<Queue> {
        Queue::new("host-queue").map_err(backend_error)
    }

    fn allocate(&self, bytes: usize, access: Access) -> GPUResult<Memory> {
        Ok(Memory {
            data: Arc::new(RwLock::new(vec![0u8; bytes])),
            len: bytes,
            access,
        })
    }

    fn enqueue_write(&self, queue: &Queue, memory: &mut Memory, data: &[u8]) -> GPUResult<Event> {
        check_size(memory, data.len())?;
        let signal = Arc::new(Signal::default());
        queue
            .submit(Command::Write {
                memory: memory.data.clone(),
                data: data.to_vec(),
                signal: signal.clone(),
            })
            .map_err(backend_error)?;
        Ok(Event(signal))
    }

    fn enqueue_read(&self, queue: &Queue, memory: &Memory, data: &mut [u8]) -> GPUResult<()> {
        check_size(memory, data.len())?;
        let (reply, receiver) = std::sync::mpsc::channel();
        queue
            .submit(Command::Read {
                memory: memory.data.clone(),
                reply,
            })
            .map_err(backend_error)?;
        let bytes = receiver
            .recv()
            .map_err(|error| backend_error((INVALID_COMMAND_QUEUE, error.to_string())))?
            .map_err(backend_error)?;
        data.copy_from_slice(&bytes);
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &Queue,
        name: &str,
        global_size: usize,
        args: &[KernelArg<'_, Memory>],
        wait_list: &[&Event],
    ) -> GPUResult<Event> {
        let kernel = self
            .kernels_by_name
            .get(name)
            .ok_or_else(|| GPUError::KernelNotFound(name.to_string()))?;
        let args = args
            .iter()
            .map(|arg| match arg {
                KernelArg::Memory(memory) => HostArg::Memory(memory.data.clone()),
                KernelArg::F32(value) => HostArg::F32(*value),
                KernelArg::U32(value) => HostArg::U32(*value),
            })
            .collect::<Vec<_>>();
        kernel.check_args(&args).map_err(backend_error)?;

        let signal = Arc::new(Signal::default());
        queue
            .submit(Command::Launch {
                kernel: *kernel,
                global_size,
                args,
                wait_list: wait_list.iter().map(|event| event.0.clone()).collect(),
                signal: signal.clone(),
            })
            .map_err(backend_error)?;
        Ok(Event(signal))
    }

    fn wait_for(&self, queue: &Queue, event: &Event) -> GPUResult<()> {
        queue
            .submit(Command::Wait(event.0.clone()))
            .map_err(backend_error)
    }

    fn finish(&self, queue: &Queue) -> GPUResult<()> {
        queue.finish().map_err(backend_error)
    }
}

fn check_size(memory: &Memory, bytes: usize) -> GPUResult<()> {
    let len = memory.len();
    if len != bytes {
        return Err(backend_error((
            INVALID_BUFFER_SIZE,
            format!("Transfer of {} bytes into a {} byte allocation.", bytes, len),
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::{Device, Program, INVALID_BUFFER_SIZE, INVALID_KERNEL_ARGS};
    use crate::backend::{Access, Backend, Event, KernelArg};
    use crate::error::GPUError;

    const SAXPY: &str = include_str!("../../kernels/saxpy.cl");

    fn to_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    fn to_floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_build_log_on_failure() {
        let device = Device::new();
        let error = Program::from_source(&device, "__kernel void dot(__global float* x) {}")
            .unwrap_err();
        match error {
            GPUError::BuildError { device: name, log, .. } => {
                assert_eq!(name, device.name());
                assert!(!log.is_empty());
            }
            other => panic!("expected a build error, got {:?}", other),
        }
    }

    #[test]
    fn test_saxpy_roundtrip() {
        let program = Program::from_source(&Device::new(), SAXPY).unwrap();
        assert_eq!(program.kernel_names(), vec!["saxpy"]);
        let queue = program.queue();

        let mut x = program.allocate(12, Access::ReadOnly).unwrap();
        let mut y = program.allocate(12, Access::ReadWrite).unwrap();
        program
            .enqueue_write(queue, &mut x, &to_bytes(&[1.0, 2.0, 3.0]))
            .unwrap();
        program
            .enqueue_write(queue, &mut y, &to_bytes(&[0.5, 0.5, 0.5]))
            .unwrap();
        let event = program
            .enqueue_kernel(
                queue,
                "saxpy",
                3,
                &[
                    KernelArg::U32(3),
                    KernelArg::F32(2.0),
                    KernelArg::Memory(&x),
                    KernelArg::Memory(&y),
                ],
                &[],
            )
            .unwrap();
        event.wait().unwrap();
        assert!(event.elapsed().unwrap().is_some());

        let mut result = vec![0u8; 12];
        program.enqueue_read(queue, &y, &mut result).unwrap();
        assert_eq!(to_floats(&result), vec![2.5, 4.5, 6.5]);
    }

    #[test]
    fn test_unknown_kernel() {
        let program = Program::from_source(&Device::new(), SAXPY).unwrap();
        let result = program.enqueue_kernel(program.queue(), "daxpy", 1, &[], &[]);
        assert!(matches!(result, Err(GPUError::KernelNotFound(name)) if name == "daxpy"));
    }

    #[test]
    fn test_wrong_kernel_args() {
        let program = Program::from_source(&Device::new(), SAXPY).unwrap();
        let result = program.enqueue_kernel(program.queue(), "saxpy", 1, &[KernelArg::F32(1.0)], &[]);
        assert!(matches!(
            result,
            Err(GPUError::Backend { code, .. }) if code == INVALID_KERNEL_ARGS
        ));
    }

    #[test]
    fn test_write_size_mismatch() {
        let program = Program::from_source(&Device::new(), SAXPY).unwrap();
        let mut memory = program.allocate(8, Access::ReadWrite).unwrap();
        let result = program.enqueue_write(program.queue(), &mut memory, &[0u8; 4]);
        assert!(matches!(
            result,
            Err(GPUError::Backend { code, .. }) if code == INVALID_BUFFER_SIZE
        ));
    }

    #[test]
    fn test_wait_for_orders_queues() {
        let program = Program::from_source(&Device::new(), SAXPY).unwrap();
        let producer = program.create_queue().unwrap();
        let consumer = program.create_queue().unwrap();

        let mut memory = program.allocate(4, Access::ReadWrite).unwrap();
        producer.enqueue_delay(Duration::from_millis(100));
        let written = program
            .enqueue_write(&producer, &mut memory, &to_bytes(&[42.0]))
            .unwrap();
        program.wait_for(&consumer, &written).unwrap();

        let mut result = vec![0u8; 4];
        program.enqueue_read(&consumer, &memory, &mut result).unwrap();
        assert_eq!(to_floats(&result), vec![42.0]);
    }

    #[test]
    fn test_finish_drains_queue() {
        let program = Program::from_source(&Device::new(), SAXPY).unwrap();
        let queue = program.create_queue().unwrap();
        let mut memory = program.allocate(4, Access::ReadWrite).unwrap();

        let start = Instant::now();
        queue.enqueue_delay(Duration::from_millis(100));
        program
            .enqueue_write(&queue, &mut memory, &to_bytes(&[7.0]))
            .unwrap();
        program.finish(&queue).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));

        let mut result = vec![0u8; 4];
        program.enqueue_read(&queue, &memory, &mut result).unwrap();
        assert_eq!(to_floats(&result), vec![7.0]);
    }
}
