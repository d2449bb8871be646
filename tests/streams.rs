//! Cross-queue dependencies on the host device, which has truly asynchronous uploads.

use std::time::Duration;

use gpu_saxpy::{
    host, host_saxpy, validate, Access, Backend, Buffer, Comparison, Device, Event, GPUError,
    Kernel, Vendor,
};

const SAXPY: &str = include_str!("../kernels/saxpy.cl");
const LENGTH: usize = 1024;
const PRODUCER_DELAY: Duration = Duration::from_millis(300);

fn host_program() -> host::Program {
    let device = Device::by_vendor(Vendor::Host)[0]
        .host_device()
        .unwrap()
        .clone();
    host::Program::from_source(&device, SAXPY).unwrap()
}

fn inputs() -> (Vec<f32>, Vec<f32>) {
    let x = (0..LENGTH).map(|i| i as f32 * 0.5).collect::<Vec<_>>();
    let y = (0..LENGTH).map(|i| 1.0 + i as f32).collect::<Vec<_>>();
    (x, y)
}

/// Uploads the inputs on a slow producer queue and runs the kernel on the default queue.
fn run_saxpy(program: &host::Program, wait_for_uploads: bool) -> Vec<f32> {
    let (x, y) = inputs();
    let producer = program.create_queue().unwrap();
    let compute = program.queue();

    let mut x_buffer = Buffer::<_, f32>::allocate(program, LENGTH, Access::ReadOnly).unwrap();
    let mut y_buffer = Buffer::<_, f32>::allocate(program, LENGTH, Access::ReadWrite).unwrap();
    producer.enqueue_delay(PRODUCER_DELAY);
    let x_uploaded = x_buffer.upload(program, &producer, &x).unwrap();
    let y_uploaded = y_buffer.upload(program, &producer, &y).unwrap();

    let n = LENGTH as u32;
    let alpha = 2.0f32;
    let mut kernel = Kernel::new(program, compute, "saxpy", LENGTH)
        .arg(&n)
        .arg(&alpha)
        .arg(&x_buffer)
        .arg(&y_buffer);
    if wait_for_uploads {
        kernel = kernel.wait_for(&x_uploaded).wait_for(&y_uploaded);
    }
    kernel.run().unwrap();
    let result = y_buffer.download_vec(program, compute).unwrap();

    // Let the producer drain before its buffers go away.
    y_uploaded.wait().unwrap();
    result
}

#[test]
fn test_kernel_waits_for_uploads_on_other_queue() {
    let program = host_program();
    let (x, y) = inputs();
    let expected = host_saxpy(2.0, &x, &y);
    let actual = run_saxpy(&program, true);
    assert!(validate(&expected, &actual, Comparison::Exact).is_ok());
}

#[test]
fn test_missing_dependency_is_detected() {
    let program = host_program();
    let (x, y) = inputs();
    let expected = host_saxpy(2.0, &x, &y);
    // The kernel runs on zero initialized memory, before the delayed uploads land.
    let actual = run_saxpy(&program, false);
    let error = validate(&expected, &actual, Comparison::Exact).unwrap_err();
    assert_eq!(error.index, 0);
    assert_eq!(error.actual, Some(0.0));
}

#[test]
fn test_size_mismatch_transfers_nothing() {
    let program = host_program();
    let queue = program.queue();
    let mut buffer = Buffer::<_, f32>::allocate(&program, 4, Access::ReadWrite).unwrap();

    let result = buffer.upload(&program, queue, &[1.0, 2.0, 3.0]);
    assert!(matches!(
        result,
        Err(GPUError::SizeMismatch {
            expected: 4,
            actual: 3
        })
    ));
    assert_eq!(buffer.download_vec(&program, queue).unwrap(), vec![0.0; 4]);
}
