//! The capability interface every compute framework implements.
//!
//! The orchestration (allocate, upload, dispatch, fetch) is written once against [`Backend`].
//! Each framework provides its own memory, queue and event types, everything native stays behind
//! this trait.

use std::time::Duration;

use crate::error::GPUResult;

/// How a kernel is going to access a buffer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Access {
    /// The kernel only reads from the buffer.
    ReadOnly,
    /// The kernel only writes to the buffer.
    WriteOnly,
    /// The kernel reads and writes the buffer.
    ReadWrite,
}

/// A single kernel argument, either a device allocation or a scalar.
#[derive(Debug)]
pub enum KernelArg<'a, M> {
    /// A device allocation.
    Memory(&'a M),
    /// A 32-bit float.
    F32(f32),
    /// A 32-bit unsigned integer.
    U32(u32),
}

impl<M> Clone for KernelArg<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for KernelArg<'_, M> {}

/// Completion handle of an enqueued operation.
pub trait Event {
    /// Blocks until the operation has finished.
    fn wait(&self) -> GPUResult<()>;

    /// The time the device spent on the operation, if the device supports profiling.
    ///
    /// It waits for the operation to complete first.
    fn elapsed(&self) -> GPUResult<Option<Duration>>;
}

/// Operations a compute framework needs to provide to run the offload pipeline.
///
/// All transfers and launches are submitted to a queue. Operations on the same queue execute in
/// submission order. Across queues there is no ordering unless it is established with
/// [`Backend::wait_for`] or a kernel wait list.
pub trait Backend {
    /// An untyped device allocation.
    type Memory;
    /// An ordered submission channel.
    type Queue;
    /// Completion handle of an enqueued operation.
    type Event: Event;

    /// Returns the name of the device the program runs on.
    fn device_name(&self) -> &str;

    /// The queue that is created together with the program.
    fn queue(&self) -> &Self::Queue;

    /// Creates an additional queue on the same device.
    fn create_queue(&self) -> GPUResult<Self::Queue>;

    /// Allocates `bytes` bytes of device memory.
    fn allocate(&self, bytes: usize, access: Access) -> GPUResult<Self::Memory>;

    /// Enqueues a copy from the host into device memory.
    ///
    /// The host data may be reused as soon as this call returns.
    fn enqueue_write(
        &self,
        queue: &Self::Queue,
        memory: &mut Self::Memory,
        data: &[u8],
    ) -> GPUResult<Self::Event>;

    /// Copies device memory into host memory, blocks until all prior work on the queue and the
    /// copy itself have finished.
    fn enqueue_read(
        &self,
        queue: &Self::Queue,
        memory: &Self::Memory,
        data: &mut [u8],
    ) -> GPUResult<()>;

    /// Launches the kernel `name` over `global_size` work-items.
    ///
    /// The launch doesn't start before every event in `wait_list` has completed.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        name: &str,
        global_size: usize,
        args: &[KernelArg<'_, Self::Memory>],
        wait_list: &[&Self::Event],
    ) -> GPUResult<Self::Event>;

    /// Makes all operations submitted to `queue` after this call wait for `event`.
    fn wait_for(&self, queue: &Self::Queue, event: &Self::Event) -> GPUResult<()>;

    /// Blocks until all operations submitted to `queue` have finished.
    fn finish(&self, queue: &Self::Queue) -> GPUResult<()>;
}
