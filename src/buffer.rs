//! Typed, fixed-length device memory.

use std::fmt;
use std::marker::PhantomData;
use std::mem;

use log::debug;

use crate::backend::{Access, Backend, Event};
use crate::error::{GPUError, GPUResult};

/// A Buffer to be used for sending and receiving data to/from a device.
///
/// The length is set on allocation and never changes. Every transfer must cover the whole buffer.
pub struct Buffer<B: Backend, T> {
    memory: B::Memory,
    /// The number of T-sized elements.
    length: usize,
    access: Access,
    _phantom: PhantomData<T>,
}

impl<B: Backend, T> fmt::Debug for Buffer<B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("length", &self.length)
            .field("access", &self.access)
            .finish()
    }
}

impl<B: Backend, T> Buffer<B, T> {
    /// Allocates a buffer of `length` elements.
    ///
    /// Its content is unspecified until it was written by the host or a kernel.
    pub fn allocate(backend: &B, length: usize, access: Access) -> GPUResult<Self> {
        if length == 0 {
            return Err(GPUError::InvalidArgument(
                "buffers must hold at least one element".to_string(),
            ));
        }
        let bytes = length
            .checked_mul(mem::size_of::<T>())
            .ok_or_else(|| GPUError::InvalidArgument(format!("buffer length {}", length)))?;
        debug!(
            "Allocating {} bytes on {} ({:?}).",
            bytes,
            backend.device_name(),
            access
        );
        let memory = backend.allocate(bytes, access)?;
        Ok(Self {
            memory,
            length,
            access,
            _phantom: PhantomData,
        })
    }

    /// Allocates a buffer and initializes it with the given slice.
    ///
    /// It returns once the data is on the device.
    pub fn from_slice(backend: &B, queue: &B::Queue, data: &[T], access: Access) -> GPUResult<Self> {
        let mut buffer = Self::allocate(backend, data.len(), access)?;
        buffer.upload(backend, queue, data)?.wait()?;
        Ok(buffer)
    }

    /// Enqueues a copy of `data` into the buffer.
    ///
    /// `data` may be reused or dropped as soon as this call returns. Work on other queues that
    /// depends on the copy needs to wait for the returned event.
    pub fn upload(&mut self, backend: &B, queue: &B::Queue, data: &[T]) -> GPUResult<B::Event> {
        self.check_len(data.len())?;
        // Transmuting types is safe as long a sizes match.
        let bytes = unsafe {
            std::slice::from_raw_parts(data.as_ptr() as *const u8, mem::size_of_val(data))
        };
        backend.enqueue_write(queue, &mut self.memory, bytes)
    }

    /// Reads the buffer into `data`.
    ///
    /// It blocks until all work previously submitted to `queue` and the copy itself are done.
    pub fn download(&self, backend: &B, queue: &B::Queue, data: &mut [T]) -> GPUResult<()> {
        self.check_len(data.len())?;
        // Transmuting types is safe as long a sizes match.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut u8, mem::size_of_val(data))
        };
        backend.enqueue_read(queue, &self.memory, bytes)
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Buffers are never empty, allocating an empty one fails.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns how kernels are expected to access the buffer.
    pub fn access(&self) -> Access {
        self.access
    }

    pub(crate) fn memory(&self) -> &B::Memory {
        &self.memory
    }

    fn check_len(&self, actual: usize) -> GPUResult<()> {
        if actual != self.length {
            return Err(GPUError::SizeMismatch {
                expected: self.length,
                actual,
            });
        }
        Ok(())
    }
}

impl<B: Backend, T: Copy + Default> Buffer<B, T> {
    /// Reads the buffer into a newly allocated vector.
    pub fn download_vec(&self, backend: &B, queue: &B::Queue) -> GPUResult<Vec<T>> {
        let mut data = vec![T::default(); self.length];
        self.download(backend, queue, &mut data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod test {
    use super::Buffer;
    use crate::backend::{Access, Backend};
    use crate::error::GPUError;
    use crate::host;

    const SAXPY: &str = include_str!("../kernels/saxpy.cl");

    fn program() -> host::Program {
        host::Program::from_source(&host::Device::new(), SAXPY).unwrap()
    }

    #[test]
    fn test_from_slice_roundtrip() {
        let program = program();
        let data = vec![1.5f32, -2.0, 3.25];
        let buffer =
            Buffer::from_slice(&program, program.queue(), &data, Access::ReadOnly).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.access(), Access::ReadOnly);
        assert_eq!(buffer.download_vec(&program, program.queue()).unwrap(), data);
    }

    #[test]
    fn test_allocate_zero_length() {
        let program = program();
        let result = Buffer::<_, f32>::allocate(&program, 0, Access::ReadWrite);
        assert!(matches!(result, Err(GPUError::InvalidArgument(_))));
    }

    #[test]
    fn test_upload_size_mismatch_transfers_nothing() {
        let program = program();
        let mut buffer =
            Buffer::from_slice(&program, program.queue(), &[7.0f32; 4], Access::ReadWrite)
                .unwrap();

        let result = buffer.upload(&program, program.queue(), &[1.0f32; 5]);
        assert!(matches!(
            result,
            Err(GPUError::SizeMismatch {
                expected: 4,
                actual: 5
            })
        ));
        assert_eq!(
            buffer.download_vec(&program, program.queue()).unwrap(),
            vec![7.0; 4]
        );
    }

    #[test]
    fn test_download_size_mismatch() {
        let program = program();
        let buffer =
            Buffer::from_slice(&program, program.queue(), &[1u32, 2, 3], Access::ReadOnly)
                .unwrap();
        let mut short = [9u32; 2];
        let result = buffer.download(&program, program.queue(), &mut short);
        assert!(matches!(
            result,
            Err(GPUError::SizeMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert_eq!(short, [9, 9]);
    }

    #[test]
    fn test_upload_leaves_source_untouched() {
        let program = program();
        let source = vec![4.0f32, 5.0];
        let mut buffer = Buffer::allocate(&program, 2, Access::ReadWrite).unwrap();
        let event = buffer.upload(&program, program.queue(), &source).unwrap();
        crate::backend::Event::wait(&event).unwrap();
        assert_eq!(source, vec![4.0, 5.0]);
        assert_eq!(buffer.download_vec(&program, program.queue()).unwrap(), source);
    }
}
