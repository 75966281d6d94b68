//! Contexts: the sharing domain for memory objects, queues, and events.

use std::sync::Arc;

use crate::api::{query, DeviceApi, RawHandle, NULL_HANDLE};
use crate::device::Device;
use crate::error::{check, ContextError, ErrorCode, ErrorMap};
use crate::handle::{ContextCap, Handle};

const CREATE_ERRORS: ErrorMap = &[
    (
        ErrorCode::InvalidValue,
        "the device list is empty.",
    ),
    (
        ErrorCode::InvalidDevice,
        "a listed device is not a valid device.",
    ),
    (
        ErrorCode::DeviceNotAvailable,
        "a listed device is currently not available.",
    ),
];

/// A context over one or more devices of a single platform.
///
/// Buffers, queues, and events all belong to a context; objects from
/// different contexts never interoperate.
#[derive(Clone, Debug)]
pub struct Context {
    handle: Handle<ContextCap>,
    // Cached at creation so callers can consult the strictest device
    // alignment without a round trip per call.
    base_align: u32,
}

impl Context {
    pub fn new(api: Arc<dyn DeviceApi>, devices: &[Device]) -> Result<Self, ContextError> {
        let ids: Vec<RawHandle> = devices.iter().map(|d| d.handle().raw()).collect();
        let mut raw = NULL_HANDLE;
        check(api.create_context(&ids, &mut raw), CREATE_ERRORS)?;
        let handle = Handle::from_created(api, raw);

        let mut base_align = 1;
        for device in devices {
            match device.mem_base_addr_align() {
                Ok(align) => base_align = base_align.max(align),
                Err(err) => return Err(ContextError::from(err.0)),
            }
        }
        Ok(Self { handle, base_align })
    }

    /// Rewrap a context handle obtained from an attribute query on
    /// another object.
    pub(crate) fn from_borrowed(
        api: Arc<dyn DeviceApi>,
        raw: RawHandle,
    ) -> Result<Self, ContextError> {
        let handle = Handle::<ContextCap>::from_borrowed(api, raw)?;
        let ids = handle.info_vec::<RawHandle>(query::context::DEVICES)?;
        let mut base_align = 1;
        for id in ids {
            let device = Device::from_enumerated(Arc::clone(handle.api()), id);
            base_align = base_align.max(
                device
                    .mem_base_addr_align()
                    .map_err(|err| ContextError::from(err.0))?,
            );
        }
        Ok(Self { handle, base_align })
    }

    pub fn devices(&self) -> Result<Vec<Device>, ContextError> {
        let ids = self.handle.info_vec::<RawHandle>(query::context::DEVICES)?;
        Ok(ids
            .into_iter()
            .map(|id| Device::from_enumerated(Arc::clone(self.handle.api()), id))
            .collect())
    }

    pub fn num_devices(&self) -> Result<u32, ContextError> {
        self.handle.info(query::context::NUM_DEVICES)
    }

    pub fn reference_count(&self) -> Result<u32, ContextError> {
        self.handle.info(query::context::REFERENCE_COUNT)
    }

    /// The strictest sub-buffer origin alignment among this context's
    /// devices, in bytes.
    pub fn mem_base_addr_align(&self) -> u32 {
        self.base_align
    }

    pub(crate) fn handle(&self) -> &Handle<ContextCap> {
        &self.handle
    }
}
