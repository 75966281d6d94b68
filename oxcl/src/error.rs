//! Error translation.
//!
//! Raw status codes come back from every [`DeviceApi`](crate::api::DeviceApi)
//! call. Translation is two-tier: each call site carries a small
//! [`ErrorMap`] describing what the codes mean *for that operation*, and
//! codes the call site does not explain fall through to a global table of
//! resource-exhaustion codes whose meaning never depends on context. A
//! code neither table knows still surfaces, with an empty description.

use std::fmt;

use crate::api::code;

/// A raw status code, decoded.
///
/// `from_raw` is total; codes this crate does not recognize land in
/// [`ErrorCode::Other`] so a newer driver can never make translation
/// panic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    DeviceNotFound,
    DeviceNotAvailable,
    MemObjectAllocationFailure,
    OutOfResources,
    OutOfHostMemory,
    ProfilingInfoNotAvailable,
    MemCopyOverlap,
    MapFailure,
    MisalignedSubBufferOffset,
    ExecStatusErrorForEventsInWaitList,
    InvalidValue,
    InvalidDeviceType,
    InvalidPlatform,
    InvalidDevice,
    InvalidContext,
    InvalidQueueProperties,
    InvalidCommandQueue,
    InvalidHostPtr,
    InvalidMemObject,
    InvalidEventWaitList,
    InvalidEvent,
    InvalidOperation,
    InvalidBufferSize,
    Other(i32),
}

impl ErrorCode {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            code::SUCCESS => Self::Success,
            code::DEVICE_NOT_FOUND => Self::DeviceNotFound,
            code::DEVICE_NOT_AVAILABLE => Self::DeviceNotAvailable,
            code::MEM_OBJECT_ALLOCATION_FAILURE => Self::MemObjectAllocationFailure,
            code::OUT_OF_RESOURCES => Self::OutOfResources,
            code::OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            code::PROFILING_INFO_NOT_AVAILABLE => Self::ProfilingInfoNotAvailable,
            code::MEM_COPY_OVERLAP => Self::MemCopyOverlap,
            code::MAP_FAILURE => Self::MapFailure,
            code::MISALIGNED_SUB_BUFFER_OFFSET => Self::MisalignedSubBufferOffset,
            code::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
                Self::ExecStatusErrorForEventsInWaitList
            }
            code::INVALID_VALUE => Self::InvalidValue,
            code::INVALID_DEVICE_TYPE => Self::InvalidDeviceType,
            code::INVALID_PLATFORM => Self::InvalidPlatform,
            code::INVALID_DEVICE => Self::InvalidDevice,
            code::INVALID_CONTEXT => Self::InvalidContext,
            code::INVALID_QUEUE_PROPERTIES => Self::InvalidQueueProperties,
            code::INVALID_COMMAND_QUEUE => Self::InvalidCommandQueue,
            code::INVALID_HOST_PTR => Self::InvalidHostPtr,
            code::INVALID_MEM_OBJECT => Self::InvalidMemObject,
            code::INVALID_EVENT_WAIT_LIST => Self::InvalidEventWaitList,
            code::INVALID_EVENT => Self::InvalidEvent,
            code::INVALID_OPERATION => Self::InvalidOperation,
            code::INVALID_BUFFER_SIZE => Self::InvalidBufferSize,
            other => Self::Other(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Self::Success => code::SUCCESS,
            Self::DeviceNotFound => code::DEVICE_NOT_FOUND,
            Self::DeviceNotAvailable => code::DEVICE_NOT_AVAILABLE,
            Self::MemObjectAllocationFailure => code::MEM_OBJECT_ALLOCATION_FAILURE,
            Self::OutOfResources => code::OUT_OF_RESOURCES,
            Self::OutOfHostMemory => code::OUT_OF_HOST_MEMORY,
            Self::ProfilingInfoNotAvailable => code::PROFILING_INFO_NOT_AVAILABLE,
            Self::MemCopyOverlap => code::MEM_COPY_OVERLAP,
            Self::MapFailure => code::MAP_FAILURE,
            Self::MisalignedSubBufferOffset => code::MISALIGNED_SUB_BUFFER_OFFSET,
            Self::ExecStatusErrorForEventsInWaitList => {
                code::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
            }
            Self::InvalidValue => code::INVALID_VALUE,
            Self::InvalidDeviceType => code::INVALID_DEVICE_TYPE,
            Self::InvalidPlatform => code::INVALID_PLATFORM,
            Self::InvalidDevice => code::INVALID_DEVICE,
            Self::InvalidContext => code::INVALID_CONTEXT,
            Self::InvalidQueueProperties => code::INVALID_QUEUE_PROPERTIES,
            Self::InvalidCommandQueue => code::INVALID_COMMAND_QUEUE,
            Self::InvalidHostPtr => code::INVALID_HOST_PTR,
            Self::InvalidMemObject => code::INVALID_MEM_OBJECT,
            Self::InvalidEventWaitList => code::INVALID_EVENT_WAIT_LIST,
            Self::InvalidEvent => code::INVALID_EVENT,
            Self::InvalidOperation => code::INVALID_OPERATION,
            Self::InvalidBufferSize => code::INVALID_BUFFER_SIZE,
            Self::Other(raw) => raw,
        }
    }

    /// Coarse classification of a failure code.
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::MemObjectAllocationFailure | Self::OutOfResources | Self::OutOfHostMemory => {
                ErrorKind::Allocation
            }
            Self::InvalidValue | Self::InvalidBufferSize | Self::MisalignedSubBufferOffset => {
                ErrorKind::Range
            }
            Self::MemCopyOverlap => ErrorKind::Overlap,
            Self::MapFailure => ErrorKind::Map,
            Self::InvalidOperation
            | Self::InvalidEventWaitList
            | Self::ExecStatusErrorForEventsInWaitList
            | Self::InvalidQueueProperties
            | Self::ProfilingInfoNotAvailable => ErrorKind::Operation,
            Self::DeviceNotFound
            | Self::DeviceNotAvailable
            | Self::InvalidDeviceType
            | Self::InvalidPlatform
            | Self::InvalidDevice
            | Self::InvalidContext
            | Self::InvalidCommandQueue
            | Self::InvalidHostPtr
            | Self::InvalidMemObject
            | Self::InvalidEvent
            | Self::Other(_) => ErrorKind::Resource,
            // Success never reaches kind() through check(); keep the match
            // total anyway.
            Self::Success => ErrorKind::Operation,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.raw())
    }
}

/// Failure taxonomy, one notch coarser than [`ErrorCode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A handle that does not name a live object of the expected kind.
    Resource,
    /// The device or host ran out of memory or execution resources.
    Allocation,
    /// An offset, length, or alignment outside the valid range.
    Range,
    /// Source and destination byte ranges of a copy alias each other.
    Overlap,
    /// The driver could not produce a host-visible mapping.
    Map,
    /// The operation is not valid in the object's current state.
    Operation,
}

/// A translated failure: the decoded code plus the diagnostic the call
/// site's table (or the global table) attached to it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {detail}")]
pub struct Failure {
    pub code: ErrorCode,
    pub detail: String,
}

impl Failure {
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }
}

/// Per-call-site diagnostic table: a small ordered slice searched
/// linearly. Tables are `const` data next to the operation they describe.
pub type ErrorMap = &'static [(ErrorCode, &'static str)];

/// Codes whose meaning is the same at every call site.
const GLOBAL_ERRORS: ErrorMap = &[
    (
        ErrorCode::OutOfResources,
        "there was a failure to allocate resources required by the implementation on the device.",
    ),
    (
        ErrorCode::OutOfHostMemory,
        "there was a failure to allocate resources required by the implementation on the host.",
    ),
];

fn lookup(map: ErrorMap, code: ErrorCode) -> Option<&'static str> {
    map.iter().find(|(c, _)| *c == code).map(|(_, d)| *d)
}

/// Check a raw status code against a call-site table.
///
/// The success sentinel translates to `Ok(())`. Any other code becomes a
/// [`Failure`] whose detail comes from `local` first, the global table
/// second, and is empty when neither knows the code.
pub fn check(raw: i32, local: ErrorMap) -> Result<(), Failure> {
    if raw == code::SUCCESS {
        return Ok(());
    }
    let code = ErrorCode::from_raw(raw);
    let detail = lookup(local, code)
        .or_else(|| lookup(GLOBAL_ERRORS, code))
        .unwrap_or("");
    Err(Failure {
        code,
        detail: detail.to_owned(),
    })
}

macro_rules! category_error {
    ($(#[$meta:meta] $name:ident => $label:literal,)*) => {
        $(
            #[$meta]
            #[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
            #[error($label)]
            pub struct $name(#[source] pub Failure);

            impl $name {
                pub fn code(&self) -> ErrorCode {
                    self.0.code
                }

                pub fn kind(&self) -> ErrorKind {
                    self.0.kind()
                }

                pub fn detail(&self) -> &str {
                    &self.0.detail
                }
            }

            impl From<Failure> for $name {
                fn from(failure: Failure) -> Self {
                    Self(failure)
                }
            }
        )*
    };
}

category_error! {
    /// A platform enumeration or query failed.
    PlatformError => "platform operation failed",
    /// A device enumeration or query failed.
    DeviceError => "device operation failed",
    /// A context operation failed.
    ContextError => "context operation failed",
    /// A command-queue operation (creation, enqueue, or sync) failed.
    QueueError => "command queue operation failed",
    /// An event operation failed.
    EventError => "event operation failed",
    /// A memory-object operation failed.
    MemoryError => "memory object operation failed",
    /// Reserved: program objects are not implemented.
    ProgramError => "program operation failed",
    /// Reserved: kernel objects are not implemented.
    KernelError => "kernel operation failed",
}
