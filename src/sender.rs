//! The sending facade.

use std::time::SystemTime;

use crate::errors::Error;
use crate::format::{Encoder, Format};
use crate::queue::{
    Attributes, CreateMode, MessageQueue, OpenMode, QueueRef, DEFAULT_PERMISSIONS,
};

/// Initial scratch capacity. Payloads up to the common default queue limit
/// encode without a per-send allocation.
const SCRATCH_CAPACITY: usize = 8192;

/// Sends messages to a queue in a chosen [`Format`].
///
/// A sender either owns its queue (see [`Sender::open`]) or borrows one
/// (see [`Sender::with_queue`]); the latter lets a single queue back
/// coupled sender and receiver roles. Every operation first puts the
/// queue into the blocking mode its flavor requires, so the mode an
/// earlier call left behind can never leak into the next one.
pub struct Sender<'q> {
    queue: QueueRef<'q>,
    encoder: Encoder,
    scratch: Vec<u8>,
}

impl Sender<'static> {
    /// Open for writing the queue named `name`, creating it with the given
    /// `attributes` if it does not already exist. `permissions` applies
    /// only when the queue is created; `None` means owner read/write.
    pub fn open(
        name: &str,
        format: Format,
        attributes: Attributes,
        permissions: Option<u32>,
    ) -> Result<Self, Error> {
        let mut queue = MessageQueue::new();
        queue.open(
            name,
            OpenMode::WriteOnly,
            CreateMode::OpenOrCreate(permissions.unwrap_or(DEFAULT_PERMISSIONS)),
            attributes,
        )?;

        Ok(Sender::from_queue(QueueRef::Owned(queue), format))
    }
}

impl<'q> Sender<'q> {
    /// Create a sender that writes to an existing queue handle.
    pub fn with_queue(queue: &'q mut MessageQueue, format: Format) -> Self {
        Sender::from_queue(QueueRef::Borrowed(queue), format)
    }

    fn from_queue(queue: QueueRef<'q>, format: Format) -> Self {
        Sender {
            queue,
            encoder: format.encoder(),
            scratch: Vec::with_capacity(SCRATCH_CAPACITY),
        }
    }

    /// Enqueue `payload` with the given `priority`, blocking while the
    /// queue is full.
    pub fn send(&mut self, payload: &[u8], priority: u32) -> Result<(), Error> {
        send_message(
            self.queue.queue_mut(),
            self.encoder,
            &mut self.scratch,
            payload,
            None,
            false,
            priority,
        )
    }

    /// Enqueue `payload`, blocking no later than the absolute `deadline`.
    pub fn send_deadline(
        &mut self,
        payload: &[u8],
        deadline: SystemTime,
        priority: u32,
    ) -> Result<(), Error> {
        send_message(
            self.queue.queue_mut(),
            self.encoder,
            &mut self.scratch,
            payload,
            Some(deadline),
            false,
            priority,
        )
    }

    /// Enqueue `payload` without blocking; a full queue reports
    /// [`SendError::Full`](crate::SendError::Full).
    pub fn try_send(&mut self, payload: &[u8], priority: u32) -> Result<(), Error> {
        send_message(
            self.queue.queue_mut(),
            self.encoder,
            &mut self.scratch,
            payload,
            None,
            true,
            priority,
        )
    }

    /// Mark the queue this sender writes to for deletion.
    pub fn unlink(&self) -> Result<(), Error> {
        MessageQueue::unlink(self.queue.queue().name())?;
        Ok(())
    }

    /// Whether the underlying queue is open.
    pub fn is_open(&self) -> bool {
        self.queue.queue().is_open()
    }

    /// The queue handle this sender writes to.
    pub fn queue(&self) -> &MessageQueue {
        self.queue.queue()
    }
}

/// One send in any flavor: enforce the blocking mode, encode into
/// `scratch`, and submit.
pub(crate) fn send_message(
    queue: &mut MessageQueue,
    encoder: Encoder,
    scratch: &mut Vec<u8>,
    payload: &[u8],
    deadline: Option<SystemTime>,
    non_blocking: bool,
    priority: u32,
) -> Result<(), Error> {
    queue.set_non_blocking(non_blocking)?;

    let encoded = encoder(queue.max_message_size(), payload, scratch)?;

    match deadline {
        None => queue.send(encoded, priority),
        Some(deadline) => queue.send_deadline(encoded, deadline, priority),
    }?;

    Ok(())
}
