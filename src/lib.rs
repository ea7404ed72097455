//! Typed inter-process messaging over the operating system's named,
//! kernel-persistent, priority-ordered message queues.
//!
//! Three layers sit on top of the raw kernel interface:
//!
//! - [`MessageQueue`], a low-level handle that translates every kernel
//!   error into a per-operation enum from one unified code space, manages
//!   blocking/non-blocking mode transitions, and measures the host's
//!   queue capacity limits at runtime.
//! - [`Sender`], [`Receiver`], and [`Duplex`], facades that pair a queue
//!   with a message [`Format`]. The `Extended` format transparently
//!   spills payloads larger than the queue's per-message limit through a
//!   temporary file, so callers are not bound by that limit.
//! - [`Consumer`], which owns a receiver and a worker thread, turning
//!   pull-style receives into a push-style callback pipeline with
//!   graceful shutdown.
//!
//! # Example
//!
//! ```no_run
//! use mqipc::{Attributes, Consumer, Format, Sender};
//!
//! let mut sender = Sender::open("/events", Format::Extended, Attributes::default(), None)?;
//! sender.send(b"hello", 0)?;
//!
//! let consumer = Consumer::new(
//!     "/events",
//!     Format::Extended,
//!     |message, priority| println!("{} bytes at priority {priority}", message.len()),
//!     Attributes::default(),
//!     None,
//! )?;
//! # drop(consumer);
//! # Ok::<(), mqipc::Error>(())
//! ```

mod consumer;
mod duplex;
mod errors;
mod format;
mod limits;
mod queue;
mod receiver;
mod search;
mod sender;

pub use consumer::Consumer;
pub use duplex::Duplex;
pub use errors::{
    description_or, overflow_code, CloseError, Error, OpenError, ReceiveError, SendError,
    SetNonBlockingError, UnlinkError,
};
pub use format::{description, CodecError, Format};
pub use queue::{
    Attributes, CreateMode, Limit, MessageQueue, OpenMode, DEFAULT_PERMISSIONS,
};
pub use receiver::Receiver;
pub use sender::Sender;
