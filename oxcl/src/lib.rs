//! Typed, reference-counted bindings over a raw compute-device API.
//!
//! The raw boundary is the [`api::DeviceApi`] trait: C-style entry points
//! speaking opaque handles, byte ranges, raw pointers, and `i32` status
//! codes. Everything above it is the typed layer: [`Handle`] owns driver
//! references (clone retains, drop releases), [`error::check`] translates
//! status codes through per-call-site diagnostic tables, and
//! [`CommandQueue`] exposes the enqueue protocol with element-typed
//! offsets and a blocking/non-blocking split per transfer.
//!
//! The `oxcl-soft` crate provides an in-process software implementation
//! of the raw boundary, useful as a reference device and for tests.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod api;
pub mod buffer;
pub mod context;
pub mod device;
pub mod error;
pub mod event;
pub mod handle;
pub mod mapped;
pub mod platform;
pub mod queue;

pub use buffer::{Buffer, MemoryFlags};
pub use context::Context;
pub use device::{Device, DeviceType};
pub use error::{
    ContextError, DeviceError, ErrorCode, ErrorKind, EventError, Failure, MemoryError,
    PlatformError, QueueError,
};
pub use event::{Event, EventStatus};
pub use handle::Handle;
pub use mapped::Mapped;
pub use platform::Platform;
pub use queue::{CommandQueue, CopyRect, MapFlags, Pitches, QueueProperties, Rect};
