//! Launching kernels.

use log::debug;

use crate::backend::{Backend, KernelArg};
use crate::buffer::Buffer;
use crate::error::GPUResult;

/// Abstraction for kernel arguments.
///
/// Kernel arguments implement this trait, so that they can be converted into the argument type of
/// the backend.
pub trait KernelArgument<B: Backend> {
    /// Converts into an argument of the backend.
    fn as_kernel_arg(&self) -> KernelArg<'_, B::Memory>;
}

impl<B: Backend, T> KernelArgument<B> for Buffer<B, T> {
    fn as_kernel_arg(&self) -> KernelArg<'_, B::Memory> {
        KernelArg::Memory(self.memory())
    }
}

impl<B: Backend> KernelArgument<B> for f32 {
    fn as_kernel_arg(&self) -> KernelArg<'_, B::Memory> {
        KernelArg::F32(*self)
    }
}

impl<B: Backend> KernelArgument<B> for u32 {
    fn as_kernel_arg(&self) -> KernelArg<'_, B::Memory> {
        KernelArg::U32(*self)
    }
}

/// A kernel that can be executed.
pub struct Kernel<'a, B: Backend> {
    backend: &'a B,
    queue: &'a B::Queue,
    name: &'a str,
    global_size: usize,
    args: Vec<KernelArg<'a, B::Memory>>,
    wait_list: Vec<&'a B::Event>,
}

impl<'a, B: Backend> Kernel<'a, B> {
    /// Prepares a launch of the kernel `name` over `global_size` work-items on `queue`.
    ///
    /// The local work size is chosen by the backend.
    pub fn new(backend: &'a B, queue: &'a B::Queue, name: &'a str, global_size: usize) -> Self {
        Self {
            backend,
            queue,
            name,
            global_size,
            args: Vec::new(),
            wait_list: Vec::new(),
        }
    }

    /// Set a kernel argument.
    ///
    /// The arguments must live as long as the kernel. Hence make sure they are not dropped as
    /// long as the kernel is in use.
    ///
    /// Example where this behaviour is enforced and leads to a compile-time error:
    ///
    /// ```compile_fail
    /// use gpu_saxpy::{host, Access, Backend, Buffer, Kernel};
    ///
    /// fn would_break(program: &host::Program) {
    ///    let buffer = Buffer::<_, f32>::allocate(program, 4, Access::ReadWrite).unwrap();
    ///    let kernel = Kernel::new(program, program.queue(), "saxpy", 4).arg(&buffer);
    ///    // This drop wouldn't error if the arguments wouldn't be bound to the kernels lifetime.
    ///    drop(buffer);
    ///    kernel.run().unwrap();
    /// }
    /// ```
    pub fn arg<T: KernelArgument<B>>(mut self, t: &'a T) -> Self {
        self.args.push(t.as_kernel_arg());
        self
    }

    /// The kernel doesn't start before `event` has completed, even if it was submitted to a
    /// different queue.
    pub fn wait_for(mut self, event: &'a B::Event) -> Self {
        self.wait_list.push(event);
        self
    }

    /// Actually run the kernel.
    ///
    /// It returns right after the launch, the returned event completes once the kernel finished.
    pub fn run(self) -> GPUResult<B::Event> {
        debug!(
            "Launching kernel {} over {} work-items with {} argument(s) on {}.",
            self.name,
            self.global_size,
            self.args.len(),
            self.backend.device_name()
        );
        self.backend.enqueue_kernel(
            self.queue,
            self.name,
            self.global_size,
            &self.args,
            &self.wait_list,
        )
    }
}
