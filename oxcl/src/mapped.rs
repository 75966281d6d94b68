//! Host-visible mappings of buffer regions.

use std::fmt;

use bytemuck::Pod;
use tracing::warn;

use crate::buffer::Buffer;
use crate::error::{check, QueueError};
use crate::event::Event;
use crate::queue::{CommandQueue, UNMAP_ERRORS};

/// A region of a [`Buffer`] mapped into host memory.
///
/// The mapping is produced by an enqueued command tracked by
/// [`event`](Self::event); its contents are defined only once that event
/// is complete. The mapping stays valid until it is unmapped, which
/// happens either explicitly through [`unmap`](Self::unmap) or, as a best
/// effort, on drop.
pub struct Mapped<'q, T: Pod> {
    queue: &'q CommandQueue,
    buffer: Buffer<T>,
    event: Event,
    ptr: *mut T,
    len: usize,
    unmapped: bool,
}

impl<'q, T: Pod> Mapped<'q, T> {
    pub(crate) fn new(
        queue: &'q CommandQueue,
        buffer: Buffer<T>,
        event: Event,
        ptr: *mut T,
        len: usize,
    ) -> Self {
        Self {
            queue,
            buffer,
            event,
            ptr,
            len,
            unmapped: false,
        }
    }

    /// The event tracking the map command.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Number of mapped elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Block until the map command has completed and the mapped contents
    /// are defined.
    pub fn wait(&self) -> Result<(), QueueError> {
        self.event.wait().map_err(|err| QueueError::from(err.0))
    }

    /// View the mapped region.
    ///
    /// # Safety
    /// The map command's event must have reached `Complete`, and no
    /// device command touching the mapped region may run while the
    /// returned slice is live.
    pub unsafe fn as_slice(&self) -> &[T] {
        // SAFETY: ptr points at len mapped elements per the driver's map
        // contract; the caller upholds the completion and aliasing rules.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// View the mapped region mutably.
    ///
    /// # Safety
    /// Same contract as [`as_slice`](Self::as_slice).
    pub unsafe fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as for as_slice, and the exclusive borrow of self rules
        // out another host view.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Unmap explicitly, waiting for the unmap command to complete. This
    /// is the path that surfaces unmap failures; the drop path can only
    /// log them.
    pub fn unmap(mut self) -> Result<(), QueueError> {
        self.unmapped = true;
        let mut out_event = crate::api::NULL_HANDLE;
        // SAFETY: ptr came from enqueue_map on this buffer and has not
        // been unmapped; self is consumed so no host access can follow.
        let status = unsafe {
            self.queue.handle().api().enqueue_unmap(
                self.queue.handle().raw(),
                self.buffer.handle().raw(),
                self.ptr.cast(),
                &[],
                Some(&mut out_event),
            )
        };
        check(status, UNMAP_ERRORS)?;
        let event = Event::from_created(std::sync::Arc::clone(self.queue.handle().api()), out_event);
        event.wait().map_err(|err| QueueError::from(err.0))
    }
}

impl<T: Pod> Drop for Mapped<'_, T> {
    fn drop(&mut self) {
        if self.unmapped {
            return;
        }
        // SAFETY: ptr came from enqueue_map on this buffer and has not
        // been unmapped; the mapping is unreachable after drop.
        let status = unsafe {
            self.queue.handle().api().enqueue_unmap(
                self.queue.handle().raw(),
                self.buffer.handle().raw(),
                self.ptr.cast(),
                &[],
                None,
            )
        };
        if status != crate::api::code::SUCCESS {
            warn!(
                buffer = self.buffer.handle().raw(),
                status, "unmap on drop failed; mapping leaked"
            );
        }
    }
}

impl<T: Pod> fmt::Debug for Mapped<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapped")
            .field("buffer", &self.buffer)
            .field("len", &self.len)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}
