//! End-to-end sender/receiver round trips in both formats.

use std::env;
use std::fs;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use serial_test::serial;
use sha2::{Digest, Sha256};

use mqipc::{
    Attributes, CreateMode, Duplex, Error, Format, Limit, MessageQueue, OpenMode, ReceiveError,
    Receiver, SendError, Sender, DEFAULT_PERMISSIONS,
};

fn unique_name(tag: &str) -> String {
    format!("/mqipc-{tag}-{:08x}", fastrand::u32(..))
}

fn small_queue_attributes() -> Attributes {
    Attributes {
        max_messages: Limit::Value(8),
        max_message_size: Limit::Value(128),
    }
}

/// Point the spill directory at a private scratch directory for the
/// duration of a test.
fn redirect_spill_dir(path: &Path) {
    for variable in ["TMPDIR", "TMP", "TEMP", "TEMPDIR"] {
        env::remove_var(variable);
    }
    env::set_var("TMPDIR", path);
}

fn restore_spill_dir() {
    env::remove_var("TMPDIR");
}

fn spill_file_count(path: &Path) -> usize {
    fs::read_dir(path)
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with("mq-message-")
        })
        .count()
}

#[test]
#[serial]
fn raw_messages_round_trip_with_priority() {
    let name = unique_name("raw");

    let mut sender =
        Sender::open(&name, Format::Raw, small_queue_attributes(), None).unwrap();
    let mut receiver =
        Receiver::open(&name, Format::Raw, small_queue_attributes(), None).unwrap();
    assert!(sender.is_open());
    assert!(receiver.is_open());

    sender.send(b"hello", 3).unwrap();

    let mut output = Vec::new();
    let mut priority = 0u32;
    receiver.receive(&mut output, Some(&mut priority)).unwrap();

    assert_eq!(output, b"hello");
    assert_eq!(priority, 3);

    receiver.unlink().unwrap();
}

#[test]
#[serial]
fn try_receive_on_an_empty_queue_reports_empty() {
    let name = unique_name("empty");
    let mut receiver =
        Receiver::open(&name, Format::Raw, small_queue_attributes(), None).unwrap();

    let mut output = Vec::new();
    assert_eq!(
        receiver.try_receive(&mut output, None),
        Err(Error::Receive(ReceiveError::Empty))
    );

    receiver.unlink().unwrap();
}

#[test]
#[serial]
fn facade_deadlines_in_the_past_time_out() {
    let name = unique_name("facade-deadline");
    let past = UNIX_EPOCH + Duration::from_secs(1);

    let mut sender = Sender::open(
        &name,
        Format::Raw,
        Attributes {
            max_messages: Limit::Value(1),
            max_message_size: Limit::Value(64),
        },
        None,
    )
    .unwrap();
    let mut receiver =
        Receiver::open(&name, Format::Raw, Attributes::default(), None).unwrap();

    let mut output = Vec::new();
    assert_eq!(
        receiver.receive_deadline(&mut output, past, None),
        Err(Error::Receive(ReceiveError::TimedOut))
    );

    sender.send(b"occupier", 0).unwrap();
    assert_eq!(
        sender.send_deadline(b"overflow", past, 0),
        Err(Error::Send(SendError::TimedOut))
    );

    receiver.unlink().unwrap();
}

#[test]
#[serial]
fn try_send_on_a_full_queue_reports_full() {
    let name = unique_name("try-full");
    let mut sender = Sender::open(
        &name,
        Format::Raw,
        Attributes {
            max_messages: Limit::Value(1),
            max_message_size: Limit::Value(64),
        },
        None,
    )
    .unwrap();

    sender.try_send(b"occupier", 0).unwrap();
    assert_eq!(
        sender.try_send(b"overflow", 0),
        Err(Error::Send(SendError::Full))
    );

    sender.unlink().unwrap();
}

#[test]
#[serial]
fn a_ten_kilobyte_payload_spills_and_survives() {
    let spill_dir = tempfile::tempdir().unwrap();
    redirect_spill_dir(spill_dir.path());

    let name = unique_name("spill");
    let payload = vec![0x41u8; 10_000];

    let mut sender =
        Sender::open(&name, Format::Extended, small_queue_attributes(), None).unwrap();
    let mut receiver =
        Receiver::open(&name, Format::Extended, small_queue_attributes(), None).unwrap();

    sender.send(&payload, 0).unwrap();
    // The payload is far beyond the 128-byte queue limit, so it must have
    // gone through a spill file.
    assert_eq!(spill_file_count(spill_dir.path()), 1);

    let mut output = Vec::new();
    receiver.receive(&mut output, None).unwrap();

    assert_eq!(output.len(), payload.len());
    assert_eq!(Sha256::digest(&output), Sha256::digest(&payload));
    // The decode consumed the spill file.
    assert_eq!(spill_file_count(spill_dir.path()), 0);

    receiver.unlink().unwrap();
    restore_spill_dir();
}

#[test]
#[serial]
fn payloads_at_the_in_place_boundary_choose_the_right_encoding() {
    let spill_dir = tempfile::tempdir().unwrap();
    redirect_spill_dir(spill_dir.path());

    let name = unique_name("boundary");
    let mut sender =
        Sender::open(&name, Format::Extended, small_queue_attributes(), None).unwrap();
    let mut receiver =
        Receiver::open(&name, Format::Extended, small_queue_attributes(), None).unwrap();
    let mut output = Vec::new();

    // One byte under the limit leaves room for the trailer: no spill.
    let in_place = vec![0x51u8; 127];
    sender.send(&in_place, 0).unwrap();
    assert_eq!(spill_file_count(spill_dir.path()), 0);
    receiver.receive(&mut output, None).unwrap();
    assert_eq!(output, in_place);

    // Exactly the limit cannot carry the trailer: spills.
    let spilled = vec![0x52u8; 128];
    sender.send(&spilled, 0).unwrap();
    assert_eq!(spill_file_count(spill_dir.path()), 1);
    receiver.receive(&mut output, None).unwrap();
    assert_eq!(output, spilled);
    assert_eq!(spill_file_count(spill_dir.path()), 0);

    receiver.unlink().unwrap();
    restore_spill_dir();
}

#[test]
#[serial]
fn every_payload_size_up_to_twice_the_limit_round_trips() {
    let spill_dir = tempfile::tempdir().unwrap();
    redirect_spill_dir(spill_dir.path());

    let name = unique_name("sweep");
    let limit = 128usize;

    let mut sender =
        Sender::open(&name, Format::Extended, small_queue_attributes(), None).unwrap();
    let mut receiver =
        Receiver::open(&name, Format::Extended, small_queue_attributes(), None).unwrap();

    let mut output = Vec::new();
    for size in 0..=2 * limit {
        let payload: Vec<u8> = (0..size).map(|index| (index % 251) as u8).collect();

        sender.send(&payload, 0).unwrap();
        receiver.receive(&mut output, None).unwrap();

        assert_eq!(output, payload, "payload size {size}");
    }

    assert_eq!(spill_file_count(spill_dir.path()), 0);

    receiver.unlink().unwrap();
    restore_spill_dir();
}

#[test]
#[serial]
fn borrowed_facades_share_one_queue() {
    let name = unique_name("borrowed");

    let mut queue = MessageQueue::new();
    queue
        .open(
            &name,
            OpenMode::ReadWrite,
            CreateMode::OpenOrCreate(DEFAULT_PERMISSIONS),
            small_queue_attributes(),
        )
        .unwrap();

    {
        let mut sender = Sender::with_queue(&mut queue, Format::Extended);
        sender.send(b"shared handle", 4).unwrap();
    }

    let mut output = Vec::new();
    let mut priority = 0u32;
    {
        let mut receiver = Receiver::with_queue(&mut queue, Format::Extended);
        receiver.receive(&mut output, Some(&mut priority)).unwrap();
    }

    assert_eq!(output, b"shared handle");
    assert_eq!(priority, 4);

    drop(queue);
    MessageQueue::unlink(&name).unwrap();
}

#[test]
#[serial]
fn a_duplex_sends_to_itself() {
    let name = unique_name("duplex");

    let mut duplex =
        Duplex::open(&name, Format::Extended, small_queue_attributes(), None).unwrap();
    assert!(duplex.is_open());

    duplex.send(b"loopback", 9).unwrap();
    assert_eq!(duplex.queue().num_current_messages(), 1);

    let mut output = Vec::new();
    let mut priority = 0u32;
    duplex.receive(&mut output, Some(&mut priority)).unwrap();
    assert_eq!(output, b"loopback");
    assert_eq!(priority, 9);

    // And the non-blocking flavors work on the same object.
    let mut empty_output = Vec::new();
    assert_eq!(
        duplex.try_receive(&mut empty_output, None),
        Err(Error::Receive(ReceiveError::Empty))
    );

    duplex.unlink().unwrap();
}

#[test]
#[serial]
fn error_codes_from_facades_describe_themselves() {
    let name = unique_name("describe");
    let mut receiver =
        Receiver::open(&name, Format::Raw, small_queue_attributes(), None).unwrap();

    let mut output = Vec::new();
    let error = receiver.try_receive(&mut output, None).unwrap_err();

    assert_eq!(error, Error::Receive(ReceiveError::Empty));
    assert_eq!(mqipc::description(error.code()), error.description());
    assert!(!error.description().is_empty());

    receiver.unlink().unwrap();
}
