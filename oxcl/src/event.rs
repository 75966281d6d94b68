//! Events: completion tracking for enqueued commands.

use std::sync::Arc;

use crate::api::{self, query, DeviceApi, RawHandle, NULL_HANDLE};
use crate::context::Context;
use crate::error::{check, ErrorCode, ErrorMap, EventError};
use crate::handle::{EventCap, Handle, QueueCap};
use crate::queue::CommandQueue;

/// Execution status of a command.
///
/// A live event only ever moves forward: `Queued` to `Submitted` to
/// `Running` to `Complete`, or from any of the first three directly to
/// `Error`. The error payload is the raw status the driver recorded for
/// the failed command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    Error(i32),
}

impl EventStatus {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            api::status::QUEUED => EventStatus::Queued,
            api::status::SUBMITTED => EventStatus::Submitted,
            api::status::RUNNING => EventStatus::Running,
            api::status::COMPLETE => EventStatus::Complete,
            failed => EventStatus::Error(failed),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            EventStatus::Queued => api::status::QUEUED,
            EventStatus::Submitted => api::status::SUBMITTED,
            EventStatus::Running => api::status::RUNNING,
            EventStatus::Complete => api::status::COMPLETE,
            EventStatus::Error(failed) => failed,
        }
    }

    /// A terminal status never changes again.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Error(_))
    }

    /// The decoded failure code, for `Error` statuses.
    pub fn error_code(self) -> Option<ErrorCode> {
        match self {
            EventStatus::Error(failed) => Some(ErrorCode::from_raw(failed)),
            _ => None,
        }
    }
}

const USER_EVENT_ERRORS: ErrorMap = &[(
    ErrorCode::InvalidContext,
    "the context is not a valid context.",
)];

const SET_STATUS_ERRORS: ErrorMap = &[
    (
        ErrorCode::InvalidOperation,
        "the execution status has already been set for this event.",
    ),
    (
        ErrorCode::InvalidEvent,
        "the event is not a user event.",
    ),
    (
        ErrorCode::InvalidValue,
        "the requested status is not a valid terminal status.",
    ),
];

const WAIT_ERRORS: ErrorMap = &[
    (
        ErrorCode::ExecStatusErrorForEventsInWaitList,
        "an event in the wait list has a negative execution status.",
    ),
    (
        ErrorCode::InvalidEvent,
        "an event in the wait list is not a valid event.",
    ),
    (
        ErrorCode::InvalidContext,
        "the events in the wait list do not share a context.",
    ),
];

const CALLBACK_ERRORS: ErrorMap = &[(
    ErrorCode::InvalidValue,
    "the trigger is not a valid execution status.",
)];

/// Completion marker for one enqueued command, or a user-controlled
/// dependency token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    handle: Handle<EventCap>,
}

impl Event {
    pub(crate) fn from_created(api: Arc<dyn DeviceApi>, raw: RawHandle) -> Self {
        Self {
            handle: Handle::from_created(api, raw),
        }
    }

    /// Create a user event: a dependency token commands can wait on that
    /// completes only when the host says so, via [`finish`](Self::finish)
    /// or [`fail`](Self::fail).
    pub fn user(context: &Context) -> Result<Self, EventError> {
        let mut raw = NULL_HANDLE;
        let status = context
            .handle()
            .api()
            .create_user_event(context.handle().raw(), &mut raw);
        check(status, USER_EVENT_ERRORS)?;
        Ok(Self::from_created(Arc::clone(context.handle().api()), raw))
    }

    pub fn status(&self) -> Result<EventStatus, EventError> {
        Ok(EventStatus::from_raw(self.handle.info(query::event::STATUS)?))
    }

    /// Block until this event reaches a terminal status. An `Error`
    /// terminal status surfaces as a failure of `Operation` kind.
    pub fn wait(&self) -> Result<(), EventError> {
        check(
            self.handle.api().wait_for_events(&[self.handle.raw()]),
            WAIT_ERRORS,
        )?;
        Ok(())
    }

    /// Block until every listed event reaches a terminal status.
    pub fn wait_all(events: &[Event]) -> Result<(), EventError> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        let raws: Vec<RawHandle> = events.iter().map(Event::raw).collect();
        check(first.handle.api().wait_for_events(&raws), WAIT_ERRORS)?;
        Ok(())
    }

    /// The queue this event's command was enqueued on; `None` for user
    /// events.
    pub fn command_queue(&self) -> Result<Option<CommandQueue>, EventError> {
        let raw: RawHandle = self.handle.info(query::event::COMMAND_QUEUE)?;
        if raw == NULL_HANDLE {
            return Ok(None);
        }
        let handle = Handle::<QueueCap>::from_borrowed(Arc::clone(self.handle.api()), raw)
            .map_err(|err| EventError::from(err.0))?;
        Ok(Some(CommandQueue::from_handle(handle)))
    }

    /// The command-type tag of the producing command; one of the
    /// [`api::command`] constants.
    pub fn command_type(&self) -> Result<u32, EventError> {
        self.handle.info(query::event::COMMAND_TYPE)
    }

    pub fn reference_count(&self) -> Result<u32, EventError> {
        self.handle.info(query::event::REFERENCE_COUNT)
    }

    /// Terminate a user event successfully. The terminal status of a user
    /// event can be set exactly once; a second termination attempt fails
    /// with `Operation` kind.
    pub fn finish(&self) -> Result<(), EventError> {
        check(
            self.handle
                .api()
                .set_user_event_status(self.handle.raw(), api::status::COMPLETE),
            SET_STATUS_ERRORS,
        )?;
        Ok(())
    }

    /// Terminate a user event as failed. Commands waiting on it fail in
    /// turn, and blocking calls gated on it report
    /// `ExecStatusErrorForEventsInWaitList`.
    pub fn fail(&self) -> Result<(), EventError> {
        check(
            self.handle.api().set_user_event_status(self.handle.raw(), -1),
            SET_STATUS_ERRORS,
        )?;
        Ok(())
    }

    /// Register a one-shot callback fired when the event reaches (or has
    /// already passed) `trigger`. The callback receives the status that
    /// fired it, which for a failed command is the failure status rather
    /// than `trigger` itself. It runs on an unspecified thread, off the
    /// driver's internal locks.
    pub fn on_status(
        &self,
        trigger: EventStatus,
        callback: impl FnOnce(EventStatus) + Send + 'static,
    ) -> Result<(), EventError> {
        let status = self.handle.api().register_event_callback(
            self.handle.raw(),
            trigger.raw(),
            Box::new(move |_, raw| callback(EventStatus::from_raw(raw))),
        );
        check(status, CALLBACK_ERRORS)?;
        Ok(())
    }

    pub(crate) fn raw(&self) -> RawHandle {
        self.handle.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_statuses_decode() {
        assert_eq!(EventStatus::from_raw(3), EventStatus::Queued);
        assert_eq!(EventStatus::from_raw(2), EventStatus::Submitted);
        assert_eq!(EventStatus::from_raw(1), EventStatus::Running);
        assert_eq!(EventStatus::from_raw(0), EventStatus::Complete);
        assert_eq!(EventStatus::from_raw(-8), EventStatus::Error(-8));
    }

    #[test]
    fn only_complete_and_error_are_terminal() {
        assert!(EventStatus::Complete.is_terminal());
        assert!(EventStatus::Error(-5).is_terminal());
        assert!(!EventStatus::Queued.is_terminal());
        assert!(!EventStatus::Submitted.is_terminal());
        assert!(!EventStatus::Running.is_terminal());
    }

    #[test]
    fn error_status_decodes_its_code() {
        assert_eq!(
            EventStatus::Error(-8).error_code(),
            Some(ErrorCode::MemCopyOverlap)
        );
        assert_eq!(EventStatus::Complete.error_code(), None);
    }
}
