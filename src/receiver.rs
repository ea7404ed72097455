//! The receiving facade.

use std::time::SystemTime;

use crate::errors::Error;
use crate::format::{Decoder, Format};
use crate::queue::{
    Attributes, CreateMode, MessageQueue, OpenMode, QueueRef, DEFAULT_PERMISSIONS,
};

/// Receives messages from a queue in a chosen [`Format`].
///
/// A receiver either owns its queue (see [`Receiver::open`]) or borrows
/// one (see [`Receiver::with_queue`]). Every operation first puts the
/// queue into the blocking mode its flavor requires, then receives and
/// decodes in place.
pub struct Receiver<'q> {
    queue: QueueRef<'q>,
    decoder: Decoder,
}

impl Receiver<'static> {
    /// Open for reading the queue named `name`, creating it with the given
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
            OpenMode::ReadOnly,
            CreateMode::OpenOrCreate(permissions.unwrap_or(DEFAULT_PERMISSIONS)),
            attributes,
        )?;

        Ok(Receiver {
            queue: QueueRef::Owned(queue),
            decoder: format.decoder(),
        })
    }
}

impl<'q> Receiver<'q> {
    /// Create a receiver that reads from an existing queue handle.
    pub fn with_queue(queue: &'q mut MessageQueue, format: Format) -> Self {
        Receiver {
            queue: QueueRef::Borrowed(queue),
            decoder: format.decoder(),
        }
    }

    /// Dequeue the next message into `output`, blocking while the queue is
    /// empty. The message's priority is written through `priority` when
    /// one is supplied.
    pub fn receive(
        &mut self,
        output: &mut Vec<u8>,
        priority: Option<&mut u32>,
    ) -> Result<(), Error> {
        receive_message(self.queue.queue_mut(), self.decoder, output, None, false, priority)
    }

    /// Dequeue the next message, blocking no later than the absolute
    /// `deadline`.
    pub fn receive_deadline(
        &mut self,
        output: &mut Vec<u8>,
        deadline: SystemTime,
        priority: Option<&mut u32>,
    ) -> Result<(), Error> {
        receive_message(
            self.queue.queue_mut(),
            self.decoder,
            output,
            Some(deadline),
            false,
            priority,
        )
    }

    /// Dequeue the next message without blocking; an empty queue reports
    /// [`ReceiveError::Empty`](crate::ReceiveError::Empty).
    pub fn try_receive(
        &mut self,
        output: &mut Vec<u8>,
        priority: Option<&mut u32>,
    ) -> Result<(), Error> {
        receive_message(self.queue.queue_mut(), self.decoder, output, None, true, priority)
    }

    /// Mark the queue this receiver reads from for deletion.
    pub fn unlink(&self) -> Result<(), Error> {
        MessageQueue::unlink(self.queue.queue().name())?;
        Ok(())
    }

    /// Whether the underlying queue is open.
    pub fn is_open(&self) -> bool {
        self.queue.queue().is_open()
    }

    /// The queue handle this receiver reads from.
    pub fn queue(&self) -> &MessageQueue {
        self.queue.queue()
    }
}

/// One receive in any flavor: enforce the blocking mode, receive, and
/// decode in place.
pub(crate) fn receive_message(
    queue: &mut MessageQueue,
    decoder: Decoder,
    output: &mut Vec<u8>,
    deadline: Option<SystemTime>,
    non_blocking: bool,
    priority: Option<&mut u32>,
) -> Result<(), Error> {
    queue.set_non_blocking(non_blocking)?;

    match deadline {
        None => queue.receive(output, priority),
        Some(deadline) => queue.receive_deadline(output, deadline, priority),
    }?;

    decoder(output)?;

    Ok(())
}
