use crate::backend::Backend;
#[cfg(feature = "cuda")]
use crate::cuda;
use crate::device::Framework;
use crate::error::GPUResult;
use crate::host;
#[cfg(feature = "opencl")]
use crate::opencl;

/// Work that is written once against the [`Backend`] API and can run on any framework.
///
/// A closure can't be used for that, as it would need to be generic over the backend type.
pub trait Job {
    /// The result of the job.
    type Output;

    /// Runs the job against a concrete backend.
    fn run<B: Backend>(self, backend: &B) -> GPUResult<Self::Output>;
}

/// Abstraction for running programs on the host, CUDA or OpenCL.
#[derive(Debug)]
pub enum Program {
    /// Host program.
    Host(host::Program),
    /// CUDA program.
    #[cfg(feature = "cuda")]
    Cuda(cuda::Program),
    /// OpenCL program.
    #[cfg(feature = "opencl")]
    Opencl(opencl::Program),
}

impl Program {
    /// Run some code in the context of the program.
    ///
    /// There is an implementation for every framework. They use different Rust types, but all of
    /// them implement [`Backend`]. This means that the same [`Job`] can run on either of them.
    pub fn run<J: Job>(&self, job: J) -> GPUResult<J::Output> {
        match self {
            Self::Host(program) => job.run(program),
            #[cfg(feature = "cuda")]
            Self::Cuda(program) => job.run(program),
            #[cfg(feature = "opencl")]
            Self::Opencl(program) => job.run(program),
        }
    }

    /// Returns the name of the device, e.g. "GeForce RTX 3090".
    pub fn device_name(&self) -> &str {
        match self {
            Self::Host(program) => program.device_name(),
            #[cfg(feature = "cuda")]
            Self::Cuda(program) => program.device_name(),
            #[cfg(feature = "opencl")]
            Self::Opencl(program) => program.device_name(),
        }
    }

    /// Returns the framework the program was built for.
    pub fn framework(&self) -> Framework {
        match self {
            Self::Host(_) => Framework::Host,
            #[cfg(feature = "cuda")]
            Self::Cuda(_) => Framework::Cuda,
            #[cfg(feature = "opencl")]
            Self::Opencl(_) => Framework::Opencl,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Job, Program};
    use crate::backend::Backend;
    use crate::device::Framework;
    use crate::error::GPUResult;
    use crate::host;

    struct DeviceName;

    impl Job for DeviceName {
        type Output = String;

        fn run<B: Backend>(self, backend: &B) -> GPUResult<String> {
            Ok(backend.device_name().to_string())
        }
    }

    #[test]
    fn test_run_job() {
        let device = host::Device::new();
        let program = Program::Host(
            host::Program::from_source(&device, include_str!("../kernels/saxpy.cl")).unwrap(),
        );
        assert_eq!(program.framework(), Framework::Host);
        assert_eq!(program.run(DeviceName).unwrap(), device.name());
        assert_eq!(program.device_name(), device.name());
    }
}
