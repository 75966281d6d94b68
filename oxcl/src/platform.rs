//! Platform enumeration and queries.

use std::sync::Arc;

use crate::api::{query, DeviceApi};
use crate::device::{Device, DeviceType};
use crate::error::{check, DeviceError, ErrorCode, ErrorMap, PlatformError};
use crate::handle::{Handle, PlatformCap};

const ENUMERATE_ERRORS: ErrorMap = &[(
    ErrorCode::InvalidValue,
    "the implementation returned no platform list.",
)];

const DEVICE_ERRORS: ErrorMap = &[
    (
        ErrorCode::InvalidDeviceType,
        "the requested device type is not a valid value.",
    ),
    (
        ErrorCode::DeviceNotFound,
        "no devices matching the requested type were found.",
    ),
];

/// One installed implementation of the device API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    handle: Handle<PlatformCap>,
}

impl Platform {
    /// Enumerate every platform the driver exposes.
    pub fn all(api: Arc<dyn DeviceApi>) -> Result<Vec<Platform>, PlatformError> {
        let mut ids = Vec::new();
        check(api.platform_ids(&mut ids), ENUMERATE_ERRORS)?;
        Ok(ids
            .into_iter()
            .map(|id| Platform {
                handle: Handle::from_enumerated(Arc::clone(&api), id),
            })
            .collect())
    }

    /// Enumerate this platform's devices matching `kind`.
    pub fn devices(&self, kind: DeviceType) -> Result<Vec<Device>, DeviceError> {
        let mut ids = Vec::new();
        let status = self
            .handle
            .api()
            .device_ids(self.handle.raw(), kind.bits(), &mut ids);
        check(status, DEVICE_ERRORS)?;
        Ok(ids
            .into_iter()
            .map(|id| Device::from_enumerated(Arc::clone(self.handle.api()), id))
            .collect())
    }

    pub fn profile(&self) -> Result<String, PlatformError> {
        self.handle.info_string(query::platform::PROFILE)
    }

    pub fn version(&self) -> Result<String, PlatformError> {
        self.handle.info_string(query::platform::VERSION)
    }

    pub fn name(&self) -> Result<String, PlatformError> {
        self.handle.info_string(query::platform::NAME)
    }

    pub fn vendor(&self) -> Result<String, PlatformError> {
        self.handle.info_string(query::platform::VENDOR)
    }

    pub fn extensions(&self) -> Result<Vec<String>, PlatformError> {
        let raw = self.handle.info_string(query::platform::EXTENSIONS)?;
        Ok(raw.split_whitespace().map(str::to_owned).collect())
    }
}
