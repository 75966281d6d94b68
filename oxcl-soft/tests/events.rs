//! Event lifecycle: status progression, wait-lists, user events, and
//! callbacks.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use oxcl::api::{command, DeviceApi};
use oxcl::{
    Buffer, CommandQueue, Context, Device, DeviceType, ErrorCode, ErrorKind, Event, EventStatus,
    MemoryFlags, Platform, QueueProperties,
};
use oxcl_soft::SoftDevice;

fn setup_with(properties: QueueProperties) -> (Context, Device, CommandQueue) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let api: Arc<dyn DeviceApi> = SoftDevice::new();
    let platform = Platform::all(Arc::clone(&api)).unwrap().remove(0);
    let device = platform.devices(DeviceType::All).unwrap().remove(0);
    let context = Context::new(api, std::slice::from_ref(&device)).unwrap();
    let queue = CommandQueue::new(&context, &device, properties).unwrap();
    (context, device, queue)
}

fn setup() -> (Context, Device, CommandQueue) {
    setup_with(QueueProperties::default())
}

#[test]
fn async_write_event_completes_on_wait() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let event = queue.write_async(&buffer, &[1, 2, 3], 0, &[]).unwrap();
    event.wait().unwrap();
    assert_eq!(event.status().unwrap(), EventStatus::Complete);
    assert_eq!(queue.read_one(&buffer, 2).unwrap(), 3);
}

#[test]
fn gated_command_stays_queued_until_signalled() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let gate = Event::user(&context).unwrap();

    let event = queue
        .write_async(&buffer, &[42], 0, std::slice::from_ref(&gate))
        .unwrap();
    // The gate is open-ended, so polling must keep reporting a
    // non-terminal status.
    let first = event.status().unwrap();
    assert!(!first.is_terminal());
    assert_eq!(first, EventStatus::Queued);

    gate.finish().unwrap();
    event.wait().unwrap();
    assert_eq!(event.status().unwrap(), EventStatus::Complete);
    assert_eq!(queue.read_one(&buffer, 0).unwrap(), 42);
}

#[test]
fn status_only_moves_forward() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let gate = Event::user(&context).unwrap();
    let event = queue
        .write_async(&buffer, &[1], 0, std::slice::from_ref(&gate))
        .unwrap();

    let mut observed = vec![event.status().unwrap().raw()];
    observed.push(event.status().unwrap().raw());
    gate.finish().unwrap();
    observed.push(event.status().unwrap().raw());
    event.wait().unwrap();
    observed.push(event.status().unwrap().raw());

    for pair in observed.windows(2) {
        assert!(pair[1] <= pair[0], "status went backwards: {observed:?}");
    }
    assert_eq!(*observed.last().unwrap(), EventStatus::Complete.raw());
}

#[test]
fn in_order_queue_stalls_behind_a_gated_command() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let gate = Event::user(&context).unwrap();

    let gated = queue
        .write_async(&buffer, &[1], 0, std::slice::from_ref(&gate))
        .unwrap();
    let trailing = queue.write_async(&buffer, &[2], 1, &[]).unwrap();
    assert_eq!(trailing.status().unwrap(), EventStatus::Queued);

    gate.finish().unwrap();
    Event::wait_all(&[gated, trailing]).unwrap();
}

#[test]
fn out_of_order_queue_runs_past_a_gated_command() {
    let (context, _, queue) = setup_with(QueueProperties {
        out_of_order: true,
        profiling: false,
    });
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let gate = Event::user(&context).unwrap();

    let gated = queue
        .write_async(&buffer, &[1], 0, std::slice::from_ref(&gate))
        .unwrap();
    let independent = queue.write_async(&buffer, &[2], 1, &[]).unwrap();
    independent.wait().unwrap();
    assert_eq!(gated.status().unwrap(), EventStatus::Queued);
    gate.finish().unwrap();
    gated.wait().unwrap();
}

#[test]
fn wait_list_orders_commands_on_an_out_of_order_queue() {
    let (context, _, queue) = setup_with(QueueProperties {
        out_of_order: true,
        profiling: false,
    });
    let buffer = Buffer::<i32>::new(&context, MemoryFlags::default(), 16).unwrap();
    let data: Vec<i32> = (100..116).collect();

    let write = queue.write_async(&buffer, &data, 0, &[]).unwrap();
    let mut out = vec![0i32; 16];
    // SAFETY: out lives until the read event is waited on below.
    let read = unsafe {
        queue.read_async(&buffer, &mut out, 0, std::slice::from_ref(&write))
    }
    .unwrap();
    read.wait().unwrap();
    assert_eq!(out, data);
}

#[test]
fn user_event_termination_is_one_shot() {
    let (context, _, _) = setup();
    let event = Event::user(&context).unwrap();
    assert_eq!(event.status().unwrap(), EventStatus::Submitted);

    event.finish().unwrap();
    assert_eq!(event.status().unwrap(), EventStatus::Complete);

    let err = event.fail().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operation);
    assert_eq!(err.code(), ErrorCode::InvalidOperation);
    assert!(err.detail().contains("already been set"));

    // A second finish is rejected the same way.
    assert_eq!(
        event.finish().unwrap_err().code(),
        ErrorCode::InvalidOperation
    );
}

#[test]
fn failed_gate_fails_dependent_commands() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let gate = Event::user(&context).unwrap();
    let dependent = queue
        .write_async(&buffer, &[1], 0, std::slice::from_ref(&gate))
        .unwrap();

    gate.fail().unwrap();
    assert!(matches!(gate.status().unwrap(), EventStatus::Error(_)));

    let status = dependent.status().unwrap();
    assert_eq!(
        status.error_code(),
        Some(ErrorCode::ExecStatusErrorForEventsInWaitList)
    );

    let err = dependent.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operation);
    assert_eq!(err.code(), ErrorCode::ExecStatusErrorForEventsInWaitList);
}

#[test]
fn blocking_call_gated_on_a_failed_event_errors() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let gate = Event::user(&context).unwrap();
    gate.fail().unwrap();

    let mut out = vec![0u32; 4];
    let err = queue
        .read(&buffer, &mut out, 0, std::slice::from_ref(&gate))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operation);
    assert_eq!(err.code(), ErrorCode::ExecStatusErrorForEventsInWaitList);
}

#[test]
fn gate_can_be_signalled_from_another_thread() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::with_data(&context, MemoryFlags::default(), &[11, 22]).unwrap();
    let gate = Event::user(&context).unwrap();

    let signaller = {
        let gate = gate.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            gate.finish().unwrap();
        })
    };

    let mut out = vec![0u32; 2];
    queue
        .read(&buffer, &mut out, 0, std::slice::from_ref(&gate))
        .unwrap();
    assert_eq!(out, [11, 22]);
    signaller.join().unwrap();
}

#[test]
fn callback_fires_with_the_terminal_status() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let gate = Event::user(&context).unwrap();
    let event = queue
        .write_async(&buffer, &[5], 0, std::slice::from_ref(&gate))
        .unwrap();

    let seen = Arc::new(AtomicI32::new(i32::MIN));
    {
        let seen = Arc::clone(&seen);
        event
            .on_status(EventStatus::Complete, move |status| {
                seen.store(status.raw(), Ordering::SeqCst);
            })
            .unwrap();
    }
    assert_eq!(seen.load(Ordering::SeqCst), i32::MIN);

    gate.finish().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), EventStatus::Complete.raw());
}

#[test]
fn callback_on_terminal_event_fires_immediately() {
    let (context, _, _) = setup();
    let event = Event::user(&context).unwrap();
    event.finish().unwrap();

    let seen = Arc::new(AtomicI32::new(i32::MIN));
    {
        let seen = Arc::clone(&seen);
        event
            .on_status(EventStatus::Complete, move |status| {
                seen.store(status.raw(), Ordering::SeqCst);
            })
            .unwrap();
    }
    assert_eq!(seen.load(Ordering::SeqCst), EventStatus::Complete.raw());
}

#[test]
fn callback_on_failed_event_receives_the_failure() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let gate = Event::user(&context).unwrap();
    let event = queue
        .write_async(&buffer, &[5], 0, std::slice::from_ref(&gate))
        .unwrap();

    let seen = Arc::new(AtomicI32::new(0));
    {
        let seen = Arc::clone(&seen);
        event
            .on_status(EventStatus::Complete, move |status| {
                seen.store(status.raw(), Ordering::SeqCst);
            })
            .unwrap();
    }
    gate.fail().unwrap();
    // The dependent command fails; the callback sees the failure status.
    let _ = queue.finish();
    assert!(seen.load(Ordering::SeqCst) < 0);
}

#[test]
fn event_reports_its_command_and_queue() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let event = queue.write_async(&buffer, &[1], 0, &[]).unwrap();
    assert_eq!(event.command_type().unwrap(), command::WRITE_BUFFER);
    assert_eq!(event.command_queue().unwrap(), Some(queue.clone()));

    let user = Event::user(&context).unwrap();
    assert_eq!(user.command_type().unwrap(), command::USER);
    assert_eq!(user.command_queue().unwrap(), None);
}

#[test]
fn finish_drains_every_queued_command() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 16).unwrap();
    let events: Vec<Event> = (0..8)
        .map(|i| queue.write_async(&buffer, &[i], i as usize, &[]).unwrap())
        .collect();
    queue.finish().unwrap();
    for event in &events {
        assert_eq!(event.status().unwrap(), EventStatus::Complete);
    }
    let mut out = vec![0u32; 8];
    queue.read(&buffer, &mut out, 0, &[]).unwrap();
    assert_eq!(out, [0, 1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn flush_runs_ready_commands() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 4).unwrap();
    let event = queue.write_async(&buffer, &[9], 0, &[]).unwrap();
    queue.flush().unwrap();
    assert_eq!(event.status().unwrap(), EventStatus::Complete);
}

#[test]
fn wait_all_covers_multiple_events() {
    let (context, _, queue) = setup();
    let buffer = Buffer::<u32>::new(&context, MemoryFlags::default(), 8).unwrap();
    let first = queue.write_async(&buffer, &[1, 2], 0, &[]).unwrap();
    let second = queue.write_async(&buffer, &[3, 4], 2, &[]).unwrap();
    Event::wait_all(&[first.clone(), second.clone()]).unwrap();
    assert_eq!(first.status().unwrap(), EventStatus::Complete);
    assert_eq!(second.status().unwrap(), EventStatus::Complete);
    Event::wait_all(&[]).unwrap();
}
