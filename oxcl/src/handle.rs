//! Reference-counted ownership of raw driver handles.
//!
//! [`Handle`] is the single place where the driver's external reference
//! counts are adjusted: cloning retains, dropping releases, moving
//! transfers the reference untouched. Each wrapper type in this crate is
//! a thin struct around a `Handle` of the matching [`Capability`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::Pod;
use tracing::{debug, warn};

use crate::api::{DeviceApi, ObjectKind, RawHandle};
use crate::error::{
    check, ContextError, DeviceError, ErrorCode, ErrorMap, EventError, Failure, MemoryError,
    PlatformError, QueueError,
};

/// Ties an object kind to the error category its operations raise.
pub trait Capability {
    const KIND: ObjectKind;
    type Error: From<Failure> + std::error::Error;
}

macro_rules! capability {
    ($($name:ident => $kind:ident / $error:ident,)*) => {
        $(
            #[derive(Clone, Copy, Debug)]
            pub enum $name {}

            impl Capability for $name {
                const KIND: ObjectKind = ObjectKind::$kind;
                type Error = $error;
            }
        )*
    };
}

capability! {
    PlatformCap => Platform / PlatformError,
    DeviceCap => Device / DeviceError,
    ContextCap => Context / ContextError,
    QueueCap => Queue / QueueError,
    EventCap => Event / EventError,
    MemoryCap => Memory / MemoryError,
}

const INFO_ERRORS: ErrorMap = &[(
    ErrorCode::InvalidValue,
    "invalid use of the attribute query; or invalid attribute queried.",
)];

const RETAIN_ERRORS: ErrorMap = &[];

/// An owned reference to a driver object of kind `C::KIND`.
pub struct Handle<C: Capability> {
    api: Arc<dyn DeviceApi>,
    raw: RawHandle,
    _kind: PhantomData<fn() -> C>,
}

impl<C: Capability> Handle<C> {
    /// Wrap a handle fresh out of a creation entry point. The driver has
    /// already charged one reference to the caller; this `Handle` now
    /// owns it.
    pub fn from_created(api: Arc<dyn DeviceApi>, raw: RawHandle) -> Self {
        Self {
            api,
            raw,
            _kind: PhantomData,
        }
    }

    /// Wrap an enumerated handle (platforms and devices). These are
    /// driver-owned and not reference counted; retain and release on them
    /// only validate the handle.
    pub fn from_enumerated(api: Arc<dyn DeviceApi>, raw: RawHandle) -> Self {
        Self::from_created(api, raw)
    }

    /// Wrap a handle obtained from an attribute query on another object.
    ///
    /// Such a handle is borrowed from the queried object, so a reference
    /// must be charged before this `Handle` can own one. Without the
    /// retain, the eventual drop would release a reference the caller
    /// never held.
    pub fn from_borrowed(api: Arc<dyn DeviceApi>, raw: RawHandle) -> Result<Self, C::Error> {
        check(api.retain(C::KIND, raw), RETAIN_ERRORS)?;
        Ok(Self::from_created(api, raw))
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn api(&self) -> &Arc<dyn DeviceApi> {
        &self.api
    }

    /// Fetch a fixed-size attribute.
    pub fn info<T: Pod>(&self, query: u32) -> Result<T, C::Error> {
        let mut value = T::zeroed();
        let mut size_ret = 0usize;
        let status = self.api.get_info(
            C::KIND,
            self.raw,
            query,
            Some(bytemuck::bytes_of_mut(&mut value)),
            &mut size_ret,
        );
        check(status, INFO_ERRORS)?;
        Ok(value)
    }

    /// Fetch a variable-length attribute: probe the size, then fill.
    pub fn info_vec<T: Pod>(&self, query: u32) -> Result<Vec<T>, C::Error> {
        let mut size_ret = 0usize;
        check(
            self.api.get_info(C::KIND, self.raw, query, None, &mut size_ret),
            INFO_ERRORS,
        )?;
        if size_ret == 0 {
            return Ok(Vec::new());
        }
        let mut values = vec![T::zeroed(); size_ret / size_of::<T>()];
        check(
            self.api.get_info(
                C::KIND,
                self.raw,
                query,
                Some(bytemuck::cast_slice_mut(&mut values)),
                &mut size_ret,
            ),
            INFO_ERRORS,
        )?;
        Ok(values)
    }

    /// Fetch a string attribute. Trailing NUL bytes from the driver are
    /// stripped.
    pub fn info_string(&self, query: u32) -> Result<String, C::Error> {
        let mut bytes = self.info_vec::<u8>(query)?;
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<C: Capability> Clone for Handle<C> {
    fn clone(&self) -> Self {
        // The source handle keeps the object alive, so a retain on it can
        // only fail if the driver itself is failing. Surface that loudly
        // but keep Clone infallible.
        let status = self.api.retain(C::KIND, self.raw);
        if status != crate::api::code::SUCCESS {
            warn!(
                kind = %C::KIND,
                handle = self.raw,
                status,
                "retain failed while cloning handle"
            );
        }
        Self {
            api: Arc::clone(&self.api),
            raw: self.raw,
            _kind: PhantomData,
        }
    }
}

impl<C: Capability> Drop for Handle<C> {
    fn drop(&mut self) {
        debug!(kind = %C::KIND, handle = self.raw, "releasing handle");
        let status = self.api.release(C::KIND, self.raw);
        if status != crate::api::code::SUCCESS {
            warn!(
                kind = %C::KIND,
                handle = self.raw,
                status,
                "release failed while dropping handle"
            );
        }
    }
}

impl<C: Capability> fmt::Debug for Handle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &C::KIND)
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

impl<C: Capability> PartialEq for Handle<C> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && Arc::ptr_eq(&self.api, &other.api)
    }
}

impl<C: Capability> Eq for Handle<C> {}
