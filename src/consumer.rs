//! A push-style consumer: one worker thread turning receives into
//! callback invocations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use log::error;

use crate::errors::{Error, ReceiveError};
use crate::format::Format;
use crate::queue::Attributes;
use crate::receiver::Receiver;

/// Poll at most once every 100 milliseconds, so a shutdown request is
/// observed within one poll period even while the queue is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Consumes a message queue on a dedicated worker thread, invoking a
/// callback with every message received and its priority.
///
/// The callback runs on the worker thread, sequentially and never
/// re-entrantly; the payload slice it is given is only valid for the
/// duration of the call. The callback must not drop the consumer, since
/// the worker would then join itself.
///
/// Dropping the consumer sets a shutdown flag and joins the worker; the
/// short poll deadline bounds how long that takes.
pub struct Consumer {
    shutting_down: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Consumer {
    /// Open the queue named `name` for reading (creating it with the given
    /// `attributes` and `permissions` if it does not exist) and start
    /// consuming immediately. Failure to open the queue is an error;
    /// failure to start the worker thread is logged and leaves an inert
    /// consumer whose drop does nothing.
    pub fn new<F>(
        name: &str,
        format: Format,
        callback: F,
        attributes: Attributes,
        permissions: Option<u32>,
    ) -> Result<Self, Error>
    where
        F: FnMut(&[u8], u32) + Send + 'static,
    {
        let receiver = Receiver::open(name, format, attributes, permissions)?;

        let shutting_down = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutting_down);
        let worker = match thread::Builder::new()
            .name("mq-consumer".to_string())
            .spawn(move || consume(receiver, callback, flag))
        {
            Ok(worker) => Some(worker),
            Err(spawn_error) => {
                error!(
                    "unable to start the consumer thread for the message queue \
                     {name}: {spawn_error}"
                );
                None
            }
        };

        Ok(Consumer {
            shutting_down,
            worker,
        })
    }

    /// Whether the worker thread is alive and consuming.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            // The thread never started; nothing to join.
            return;
        };

        self.shutting_down.store(true, Ordering::SeqCst);
        if worker.join().is_err() {
            error!("the consumer worker thread panicked");
        }
    }
}

fn consume<F>(mut receiver: Receiver<'static>, mut callback: F, shutting_down: Arc<AtomicBool>)
where
    F: FnMut(&[u8], u32),
{
    let mut buffer = Vec::new();
    let mut priority = 0u32;

    while !shutting_down.load(Ordering::SeqCst) {
        let deadline = SystemTime::now() + POLL_INTERVAL;
        match receiver.receive_deadline(&mut buffer, deadline, Some(&mut priority)) {
            Ok(()) => callback(&buffer, priority),
            Err(Error::Receive(ReceiveError::TimedOut)) => {}
            Err(receive_error) => {
                error!("unable to receive a message from the message queue: {receive_error}");
            }
        }
    }
}
