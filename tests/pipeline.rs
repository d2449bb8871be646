use std::fs;
use std::path::PathBuf;

use gpu_saxpy::{
    offload, Comparison, Config, Device, DeviceChoice, DeviceSelector, Framework, GPUError,
    Pipeline, ProgramFormat, ProgramLoader, Stage, StreamMode, Vendor, Workload,
};

fn kernel_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("kernels")
}

fn host_device() -> Device {
    Device::by_vendor(Vendor::Host)[0].clone()
}

fn host_config(length: usize, alpha: f32) -> Config {
    Config {
        length,
        alpha,
        framework: Some(Framework::Host),
        seed: Some(42),
        kernel_dir: kernel_dir(),
        ..Config::default()
    }
}

#[test]
fn test_one_million_elements() {
    let selector = DeviceSelector::new(vec![host_device()]);
    let mut pipeline = Pipeline::new();
    let report = pipeline
        .run(&selector, &host_config(1_048_576, 2.0))
        .unwrap();
    assert_eq!(pipeline.stage(), Stage::Validated);
    assert_eq!(report.length, 1_048_576);
    assert_eq!(report.framework, Framework::Host);
    assert!(report.device_time.is_some());
}

#[test]
fn test_single_element_zero_alpha() {
    let workload = Workload {
        alpha: 0.0,
        x: vec![5.0],
        y: vec![7.0],
    };
    let loader = ProgramLoader::new(kernel_dir());
    let offloaded = offload(
        &loader,
        &host_device(),
        &workload,
        StreamMode::Single,
        Comparison::Exact,
    )
    .unwrap();
    assert_eq!(offloaded.y, vec![7.0]);
}

#[test]
fn test_split_streams() {
    let selector = DeviceSelector::new(vec![host_device()]);
    let config = Config {
        streams: StreamMode::Split,
        ..host_config(10_000, -1.5)
    };
    let mut pipeline = Pipeline::new();
    pipeline.run(&selector, &config).unwrap();
    assert_eq!(pipeline.stage(), Stage::Validated);
}

#[test]
fn test_index_out_of_range() {
    let selector = DeviceSelector::new(vec![host_device()]);
    let config = Config {
        device: DeviceChoice::Index(5),
        ..host_config(16, 2.0)
    };
    let mut pipeline = Pipeline::new();
    let result = pipeline.run(&selector, &config);
    assert!(matches!(
        result,
        Err(GPUError::IndexOutOfRange { index: 5, count: 1 })
    ));
    assert_eq!(pipeline.stage(), Stage::Failed);
    assert_eq!(pipeline.failed_after(), Some(Stage::Start));
}

#[test]
fn test_no_devices() {
    let selector = DeviceSelector::new(Vec::new());
    let mut pipeline = Pipeline::new();
    let result = pipeline.run(&selector, &host_config(16, 2.0));
    assert!(matches!(result, Err(GPUError::NoDeviceFound)));
    assert_eq!(pipeline.failed_after(), Some(Stage::Start));
}

#[test]
fn test_unsupported_format() {
    let selector = DeviceSelector::new(vec![host_device()]);
    let config = Config {
        format: Some(ProgramFormat::Binary),
        ..host_config(16, 2.0)
    };
    let mut pipeline = Pipeline::new();
    let result = pipeline.run(&selector, &config);
    assert!(matches!(result, Err(GPUError::UnsupportedFormat { .. })));
    assert_eq!(pipeline.failed_after(), Some(Stage::DeviceSelected));
}

#[test]
fn test_build_failure_has_log() {
    let dir = std::env::temp_dir().join(format!("gpu-saxpy-broken-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("saxpy.cl"),
        "__kernel void saxpy(__global float* y) { y[0] = ; }\n",
    )
    .unwrap();

    let selector = DeviceSelector::new(vec![host_device()]);
    let config = Config {
        kernel_dir: dir.clone(),
        ..host_config(16, 2.0)
    };
    let mut pipeline = Pipeline::new();
    let result = pipeline.run(&selector, &config);
    fs::remove_dir_all(&dir).unwrap();

    match result {
        Err(GPUError::BuildError { log, code, .. }) => {
            assert!(!log.trim().is_empty());
            assert_ne!(code, 0);
        }
        other => panic!("expected a build error, got {:?}", other),
    }
    assert_eq!(pipeline.failed_after(), Some(Stage::DeviceSelected));
}
