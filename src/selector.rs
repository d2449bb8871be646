//! Choosing the device the kernel runs on.

use log::{debug, info};

use crate::device::{Device, DeviceFilter, Framework, UniqueId};
use crate::error::{GPUError, GPUResult};

/// An ordered list of candidate devices to select from.
#[derive(Clone, Debug)]
pub struct DeviceSelector {
    devices: Vec<Device>,
}

impl DeviceSelector {
    /// Candidates are all devices of the system that pass the filter.
    ///
    /// Accelerators come first, the host device is always last.
    pub fn from_system(filter: DeviceFilter) -> Self {
        let devices = Device::all()
            .into_iter()
            .filter(|device| filter.matches(device.device_type()))
            .cloned()
            .collect::<Vec<_>>();
        debug!(
            "{} device(s) match the filter {:?}.",
            devices.len(),
            filter
        );
        Self::new(devices)
    }

    /// Candidates are the given devices, in that order.
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    /// Only keeps the devices that can be used with `framework`.
    pub fn with_framework(mut self, framework: Framework) -> Self {
        self.devices
            .retain(|device| device.frameworks().contains(&framework));
        self
    }

    /// Returns the candidates, the list may be empty.
    pub fn list_devices(&self) -> &[Device] {
        &self.devices
    }

    /// Selects the device at `index` of [`DeviceSelector::list_devices`].
    pub fn select(&self, index: usize) -> GPUResult<&Device> {
        if self.devices.is_empty() {
            return Err(GPUError::NoDeviceFound);
        }
        let device = self
            .devices
            .get(index)
            .ok_or(GPUError::IndexOutOfRange {
                index,
                count: self.devices.len(),
            })?;
        info!("Selected device {}: {}", index, device.name());
        Ok(device)
    }

    /// Selects the device with the given PCI-ID or UUID.
    pub fn select_unique(&self, unique_id: UniqueId) -> GPUResult<&Device> {
        let device = self
            .devices
            .iter()
            .find(|device| device.has_unique_id(unique_id))
            .ok_or(GPUError::NoDeviceFound)?;
        info!("Selected device {}: {}", unique_id, device.name());
        Ok(device)
    }
}
