use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::debug;

use gpu_saxpy::config::parse_length;
use gpu_saxpy::{
    Comparison, Config, DeviceChoice, DeviceFilter, DeviceSelector, Framework, GPUResult,
    Pipeline, ProgramFormat, StreamMode, UniqueId,
};

const BANNER: &str = "SAXPY offload sample";

/// Computes `y = a * x + y` on a compute device and validates the result on the host.
#[derive(Parser, Debug)]
#[command(name = "saxpy")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Number of elements [default: 262144, or SAXPY_LENGTH]
    #[arg(short, long, value_parser = parse_length)]
    length: Option<usize>,

    /// Index of the device in the listing
    #[arg(short, long, default_value_t = 0, conflicts_with = "unique_id")]
    device: usize,

    /// PCI-ID (e.g. `e3:00`) or UUID of the device
    #[arg(short, long)]
    unique_id: Option<UniqueId>,

    /// Only list devices of that type: all, cpu, gpu or acc
    #[arg(short = 't', long = "type", default_value = "all")]
    device_type: DeviceFilter,

    /// Framework to use: host, opencl or cuda [default: the preferred one of the device]
    #[arg(short, long)]
    framework: Option<Framework>,

    /// Representation the kernel is loaded from: source, il or binary [default: the first one
    /// the device supports]
    #[arg(long)]
    format: Option<ProgramFormat>,

    /// The scalar `a`
    #[arg(short, long, default_value_t = 2.0, allow_negative_numbers = true)]
    alpha: f32,

    /// Seed of the input generator [default: random]
    #[arg(long)]
    seed: Option<u64>,

    /// Queue layout: single or split
    #[arg(long, default_value = "single")]
    streams: StreamMode,

    /// Directory of the kernel files [default: SAXPY_KERNEL_DIR, or `kernels` next to the binary]
    #[arg(long)]
    kernel_dir: Option<PathBuf>,

    /// Accept results that differ by up to that many units in the last place
    #[arg(long)]
    tolerance_ulps: Option<u32>,

    /// List the devices and exit
    #[arg(long)]
    list: bool,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Command line arguments take precedence over the environment.
    fn into_config(self) -> GPUResult<Config> {
        let mut config = Config::from_env_with_length(self.length)?;
        if let Some(kernel_dir) = self.kernel_dir {
            config.kernel_dir = kernel_dir;
        }
        config.device = match self.unique_id {
            Some(unique_id) => DeviceChoice::Unique(unique_id),
            None => DeviceChoice::Index(self.device),
        };
        config.filter = self.device_type;
        config.framework = self.framework;
        config.format = self.format;
        config.alpha = self.alpha;
        config.seed = self.seed;
        config.streams = self.streams;
        config.comparison = match self.tolerance_ulps {
            Some(ulps) => Comparison::Ulps(ulps),
            None => Comparison::Exact,
        };
        Ok(config)
    }
}

fn list_devices(selector: &DeviceSelector) {
    let devices = selector.list_devices();
    println!("Found device{}", if devices.len() == 1 { ":" } else { "s:" });
    for (index, device) in devices.iter().enumerate() {
        let frameworks = device
            .frameworks()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "\t[{}] {} ({}, {})",
            index,
            device.name(),
            device.unique_id(),
            frameworks
        );
    }
    println!();
}

fn run(cli: Cli) -> GPUResult<()> {
    let quiet = cli.quiet;
    let list_only = cli.list;
    let config = cli.into_config()?;
    debug!("Configuration: {:?}", config);

    let mut selector = DeviceSelector::from_system(config.filter);
    if let Some(framework) = config.framework {
        selector = selector.with_framework(framework);
    }
    if !quiet || list_only {
        println!("{}\n", BANNER);
        list_devices(&selector);
    }
    if list_only {
        return Ok(());
    }

    let report = Pipeline::new().run(&selector, &config)?;
    if !quiet {
        println!(
            "Selected device: {} ({}, {} {})\n",
            report.device_name, report.unique_id, report.framework, report.format
        );
        println!(
            "Host (validation) execution took: {} us.",
            report.host_time.as_micros()
        );
        match report.device_time {
            Some(device_time) => println!(
                "Device (kernel) execution took: {} us.",
                device_time.as_micros()
            ),
            None => println!("Device (kernel) execution time is not available."),
        }
        println!("Result verification passed!");
    }
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(error) = run(Cli::parse()) {
        eprintln!("{}", error);
        process::exit(error.exit_code());
    }
}
