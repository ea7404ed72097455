//! Capacity probe sanity and memoization.

use serial_test::serial;

use mqipc::{Attributes, CreateMode, Limit, MessageQueue, OpenMode, DEFAULT_PERMISSIONS};

fn unique_name(tag: &str) -> String {
    format!("/mqipc-{tag}-{:08x}", fastrand::u32(..))
}

#[test]
#[serial]
fn measured_defaults_are_positive() {
    assert!(MessageQueue::default_max_messages() > 0);
    assert!(MessageQueue::default_max_message_size() > 0);
}

#[test]
#[serial]
fn measured_maxima_admit_at_least_the_defaults() {
    assert!(MessageQueue::max_max_messages() >= MessageQueue::default_max_messages());
    assert!(MessageQueue::max_max_message_size() >= MessageQueue::default_max_message_size());
}

#[test]
#[serial]
fn probe_results_are_memoized() {
    assert_eq!(
        MessageQueue::default_max_messages(),
        MessageQueue::default_max_messages()
    );
    assert_eq!(
        MessageQueue::default_max_message_size(),
        MessageQueue::default_max_message_size()
    );
    assert_eq!(
        MessageQueue::max_max_messages(),
        MessageQueue::max_max_messages()
    );
    assert_eq!(
        MessageQueue::max_max_message_size(),
        MessageQueue::max_max_message_size()
    );
}

#[test]
#[serial]
fn a_queue_opens_with_the_measured_default_size() {
    // Mixing a concrete message count with a defaulted size forces the
    // open path to resolve the default through the probe.
    let name = unique_name("probe-open");
    let mut queue = MessageQueue::new();
    queue
        .open(
            &name,
            OpenMode::ReadWrite,
            CreateMode::OpenOrCreate(DEFAULT_PERMISSIONS),
            Attributes {
                max_messages: Limit::Value(2),
                max_message_size: Limit::Default,
            },
        )
        .unwrap();

    assert_eq!(
        queue.max_message_size() as i64,
        MessageQueue::default_max_message_size()
    );

    drop(queue);
    MessageQueue::unlink(&name).unwrap();
}
