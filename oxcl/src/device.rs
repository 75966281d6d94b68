//! Device queries.

use std::sync::Arc;

use crate::api::{device_type, query, DeviceApi, RawHandle};
use crate::error::DeviceError;
use crate::handle::{DeviceCap, Handle};

/// Device category, both an enumeration filter and the value of the
/// device's `TYPE` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceType {
    Default,
    Cpu,
    Gpu,
    Accelerator,
    All,
}

impl DeviceType {
    pub fn bits(self) -> u64 {
        match self {
            DeviceType::Default => device_type::DEFAULT,
            DeviceType::Cpu => device_type::CPU,
            DeviceType::Gpu => device_type::GPU,
            DeviceType::Accelerator => device_type::ACCELERATOR,
            DeviceType::All => device_type::ALL,
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits {
            device_type::CPU => DeviceType::Cpu,
            device_type::GPU => DeviceType::Gpu,
            device_type::ACCELERATOR => DeviceType::Accelerator,
            _ => DeviceType::Default,
        }
    }
}

/// A single compute device of a [`Platform`](crate::Platform).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    handle: Handle<DeviceCap>,
}

impl Device {
    pub(crate) fn from_enumerated(api: Arc<dyn DeviceApi>, raw: RawHandle) -> Self {
        Self {
            handle: Handle::from_enumerated(api, raw),
        }
    }

    pub fn name(&self) -> Result<String, DeviceError> {
        self.handle.info_string(query::device::NAME)
    }

    pub fn vendor(&self) -> Result<String, DeviceError> {
        self.handle.info_string(query::device::VENDOR)
    }

    pub fn version(&self) -> Result<String, DeviceError> {
        self.handle.info_string(query::device::VERSION)
    }

    pub fn device_type(&self) -> Result<DeviceType, DeviceError> {
        Ok(DeviceType::from_bits(self.handle.info::<u64>(query::device::TYPE)?))
    }

    pub fn available(&self) -> Result<bool, DeviceError> {
        Ok(self.handle.info::<u32>(query::device::AVAILABLE)? != 0)
    }

    pub fn max_compute_units(&self) -> Result<u32, DeviceError> {
        self.handle.info(query::device::MAX_COMPUTE_UNITS)
    }

    pub fn global_mem_size(&self) -> Result<u64, DeviceError> {
        self.handle.info(query::device::GLOBAL_MEM_SIZE)
    }

    pub fn max_mem_alloc_size(&self) -> Result<u64, DeviceError> {
        self.handle.info(query::device::MAX_MEM_ALLOC_SIZE)
    }

    /// Minimum byte alignment a sub-buffer origin must satisfy on this
    /// device.
    pub fn mem_base_addr_align(&self) -> Result<u32, DeviceError> {
        self.handle.info(query::device::MEM_BASE_ADDR_ALIGN)
    }

    pub(crate) fn handle(&self) -> &Handle<DeviceCap> {
        &self.handle
    }
}
