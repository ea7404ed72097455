//! Both facades over one queue.

use std::time::SystemTime;

use crate::errors::Error;
use crate::format::{Decoder, Encoder, Format};
use crate::queue::{
    Attributes, CreateMode, MessageQueue, OpenMode, DEFAULT_PERMISSIONS,
};
use crate::receiver::receive_message;
use crate::sender::send_message;

/// A single read-write queue exposing the full send and receive surface.
///
/// Useful when one process plays both roles over the same queue, for
/// instance to drain its own backlog or in loopback tests.
pub struct Duplex {
    queue: MessageQueue,
    encoder: Encoder,
    decoder: Decoder,
    scratch: Vec<u8>,
}

impl Duplex {
    /// Open for reading and writing the queue named `name`, creating it
    /// with the given `attributes` if it does not already exist.
    /// `permissions` applies only when the queue is created; `None` means
    /// owner read/write.
    pub fn open(
        name: &str,
        format: Format,
        attributes: Attributes,
        permissions: Option<u32>,
    ) -> Result<Self, Error> {
        let mut queue = MessageQueue::new();
        queue.open(
            name,
            OpenMode::ReadWrite,
            CreateMode::OpenOrCreate(permissions.unwrap_or(DEFAULT_PERMISSIONS)),
            attributes,
        )?;

        Ok(Duplex {
            queue,
            encoder: format.encoder(),
            decoder: format.decoder(),
            scratch: Vec::new(),
        })
    }

    /// Enqueue `payload`, blocking while the queue is full.
    pub fn send(&mut self, payload: &[u8], priority: u32) -> Result<(), Error> {
        send_message(
            &mut self.queue,
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
            &mut self.queue,
            self.encoder,
            &mut self.scratch,
            payload,
            Some(deadline),
            false,
            priority,
        )
    }

    /// Enqueue `payload` without blocking.
    pub fn try_send(&mut self, payload: &[u8], priority: u32) -> Result<(), Error> {
        send_message(
            &mut self.queue,
            self.encoder,
            &mut self.scratch,
            payload,
            None,
            true,
            priority,
        )
    }

    /// Dequeue the next message into `output`, blocking while the queue is
    /// empty.
    pub fn receive(
        &mut self,
        output: &mut Vec<u8>,
        priority: Option<&mut u32>,
    ) -> Result<(), Error> {
        receive_message(&mut self.queue, self.decoder, output, None, false, priority)
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
            &mut self.queue,
            self.decoder,
            output,
            Some(deadline),
            false,
            priority,
        )
    }

    /// Dequeue the next message without blocking.
    pub fn try_receive(
        &mut self,
        output: &mut Vec<u8>,
        priority: Option<&mut u32>,
    ) -> Result<(), Error> {
        receive_message(&mut self.queue, self.decoder, output, None, true, priority)
    }

    /// Mark the queue for deletion.
    pub fn unlink(&self) -> Result<(), Error> {
        MessageQueue::unlink(self.queue.name())?;
        Ok(())
    }

    /// Whether the underlying queue is open.
    pub fn is_open(&self) -> bool {
        self.queue.is_open()
    }

    /// The underlying queue handle.
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }
}
