use std::convert::TryFrom;

use log::{debug, warn};
use opencl3::device::{CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_GPU};

use crate::device::{
    next_free_pci_id, Capabilities, DeviceType, PciId, Vendor, FAKE_PCI_ID_START,
};
use crate::error::{GPUError, GPUResult};
use crate::opencl::Device;

/// The PCI-ID is the combination of the PCI Bus ID and PCI Device ID.
///
/// Each vendor exposes it through its own extension, devices of other vendors may support the
/// generic Khronos one.
fn get_pci_id(device: &opencl3::device::Device, vendor: Vendor) -> GPUResult<PciId> {
    let id = match vendor {
        Vendor::Amd => {
            let topology = device.topology_amd()?;
            // The fields are signed chars, go through `u8` so that they don't get sign extended.
            let bus_id = topology.bus as u8 as u16;
            let device_id = topology.device as u8 as u16;
            (bus_id << 8) | device_id
        }
        Vendor::Nvidia => {
            let bus_id = device.pci_bus_id_nv()? as u16;
            let device_id = device.pci_slot_id_nv()? as u16;
            (bus_id << 8) | device_id
        }
        Vendor::Intel | Vendor::Host => {
            let info = device.pci_bus_info_khr()?;
            ((info.pci_bus as u16) << 8) | info.pci_device as u16
        }
    };
    Ok(id.into())
}

fn get_compute_capability(device: &opencl3::device::Device, vendor: Vendor) -> Option<(u32, u32)> {
    match vendor {
        Vendor::Nvidia => {
            let major = device.compute_capability_major_nv().ok()?;
            let minor = device.compute_capability_minor_nv().ok()?;
            Some((major, minor))
        }
        _ => None,
    }
}

fn get_device_type(device: &opencl3::device::Device) -> GPUResult<DeviceType> {
    let device_type = device.dev_type()?;
    if device_type & CL_DEVICE_TYPE_GPU != 0 {
        Ok(DeviceType::Gpu)
    } else if device_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        Ok(DeviceType::Accelerator)
    } else {
        Ok(DeviceType::Cpu)
    }
}

/// Parses the "OpenCL <major>.<minor> <vendor specific>" version string.
fn parse_version(version: &str) -> Option<(u32, u32)> {
    let number = version.strip_prefix("OpenCL ")?.split_whitespace().next()?;
    let (major, minor) = number.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn get_capabilities(device: &opencl3::device::Device) -> GPUResult<Capabilities> {
    let version = device.version()?;
    let extensions = device.extensions()?;
    let il = parse_version(&version).map_or(false, |version| version >= (2, 1))
        || extensions
            .split_whitespace()
            .any(|extension| extension == "cl_khr_il_program");
    Ok(Capabilities {
        // Queues are always created with profiling enabled.
        profiling: true,
        source: device.compiler_available()?,
        il,
        binary: true,
    })
}

fn get_device(device: opencl3::device::Device) -> GPUResult<(Device, bool)> {
    let vendor = Vendor::try_from(device.vendor_id()?)?;
    let name = device.name()?;
    let memory = device.global_mem_size()?;
    let compute_units = device.max_compute_units()?;
    let compute_capability = get_compute_capability(&device, vendor);
    let device_type = get_device_type(&device)?;
    let capabilities = get_capabilities(&device)?;
    let uuid = device.uuid_khr().ok().map(Into::into);
    let (pci_id, has_pci_id) = match get_pci_id(&device, vendor) {
        Ok(pci_id) => (pci_id, true),
        // Use a temporary PCI-ID and replace it later with a non-colliding one.
        Err(_) => (PciId::from(0), false),
    };
    Ok((
        Device {
            vendor,
            name,
            memory,
            compute_units,
            compute_capability,
            device_type,
            capabilities,
            pci_id,
            uuid,
            device,
        },
        has_pci_id,
    ))
}

/// Get a list of all available and supported devices.
///
/// If there is a failure retrieving a device, it won't lead to a hard error, but an error will be
/// logged and the corresponding device won't be available.
pub(crate) fn build_device_list() -> Vec<Device> {
    let mut all_devices = Vec::new();
    let mut devices_without_pci_id = Vec::new();

    let device_ids = match opencl3::device::get_all_devices(CL_DEVICE_TYPE_ALL) {
        Ok(device_ids) => device_ids,
        Err(error) => {
            warn!(
                "Unable to retrieve OpenCL devices: {:?}",
                GPUError::from(error)
            );
            return all_devices;
        }
    };

    for device_id in device_ids {
        match get_device(opencl3::device::Device::new(device_id)) {
            Ok((device, true)) => all_devices.push(device),
            Ok((device, false)) => devices_without_pci_id.push(device),
            Err(GPUError::UnsupportedVendor(vendor)) => {
                debug!("Skipping OpenCL device of unsupported vendor {}.", vendor)
            }
            Err(error) => warn!("Unable to retrieve OpenCL device: {:?}", error),
        }
    }

    // Integrated GPUs might have neither a PCI-ID, nor a UUID. Give them a fake one.
    let mut start = FAKE_PCI_ID_START;
    for mut device in devices_without_pci_id.into_iter() {
        let taken = all_devices.iter().map(Device::pci_id).collect::<Vec<_>>();
        device.pci_id = next_free_pci_id(&taken, start);
        start = u16::from(device.pci_id) + 1;
        all_devices.push(device);
    }

    debug!("Loaded OpenCL devices: {:?}", all_devices);
    all_devices
}
