//! The low-level queue handle.
//!
//! [`MessageQueue`] is a stateful adapter over the kernel's named message
//! queue calls. It owns exactly one of a descriptor in blocking mode, a
//! descriptor in non-blocking mode, or nothing (closed), translates every
//! raw kernel error into the per-operation enums from [`crate::errors`],
//! and caches the queue's maximum message size for receive-buffer sizing.

use std::ffi::CString;
use std::mem;
use std::ptr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use libc::{c_long, mq_attr, mqd_t};
use log::warn;

use crate::errors::{
    last_errno, log_unexpected_errno, CloseError, OpenError, ReceiveError, SendError,
    SetNonBlockingError, UnlinkError,
};
use crate::limits;

/// Permissions used when a create mode does not specify its own: owner
/// read/write.
pub const DEFAULT_PERMISSIONS: u32 = 0o600;

/// Whether a queue is opened for reading, writing, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Whether opening may, must, or must not create the queue. The creating
/// variants carry the file permissions given to a newly created queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Open an existing queue; fail if it does not exist.
    OpenOnly,
    /// Create the queue; fail if it already exists.
    CreateOnly(u32),
    /// Open the queue, creating it first if necessary.
    OpenOrCreate(u32),
}

/// One creation-time limit of a queue: a concrete positive value, the
/// kernel's default, or the largest value this host admits (as measured by
/// the capacity probe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Value(i64),
    Default,
    Max,
}

/// Creation-time configuration of a queue. When opening an existing queue
/// these are advisory and do not alter the queue. Note that `Limit::Max`
/// can exhaust system resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub max_messages: Limit,
    pub max_message_size: Limit,
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes {
            max_messages: Limit::Default,
            max_message_size: Limit::Default,
        }
    }
}

enum Handle {
    Closed,
    Blocking(mqd_t),
    NonBlocking(mqd_t),
}

impl Handle {
    fn descriptor(&self) -> Option<mqd_t> {
        match *self {
            Handle::Closed => None,
            Handle::Blocking(descriptor) | Handle::NonBlocking(descriptor) => Some(descriptor),
        }
    }
}

/// A named kernel message queue.
///
/// A handle starts closed, becomes blocking on a successful [`open`],
/// moves between blocking and non-blocking through [`set_non_blocking`],
/// and returns to closed on [`close`] or drop. Mutating operations take
/// `&mut self`; a handle shared between threads needs external
/// synchronization, which the type system enforces here.
///
/// [`open`]: MessageQueue::open
/// [`set_non_blocking`]: MessageQueue::set_non_blocking
/// [`close`]: MessageQueue::close
pub struct MessageQueue {
    handle: Handle,
    name: String,
    max_message_size: usize,
}

impl MessageQueue {
    /// Create a closed handle.
    pub fn new() -> Self {
        MessageQueue {
            handle: Handle::Closed,
            name: String::new(),
            max_message_size: limits::FALLBACK_MAX_MESSAGE_SIZE as usize,
        }
    }

    /// Open the queue named `name` for the access given by `open_mode`,
    /// creating it or not according to `create_mode`. When the queue is
    /// created with non-defaulted `attributes`, the kernel is told the
    /// requested limits; when an existing queue is opened the attributes
    /// are ignored. On success the handle is in blocking mode and the
    /// queue's actual maximum message size has been recorded. An already
    /// open handle is closed first.
    pub fn open(
        &mut self,
        name: &str,
        open_mode: OpenMode,
        create_mode: CreateMode,
        attributes: Attributes,
    ) -> Result<(), OpenError> {
        if self.is_open() {
            let _ = self.close();
        }

        let mut flags = match open_mode {
            OpenMode::ReadOnly => libc::O_RDONLY,
            OpenMode::WriteOnly => libc::O_WRONLY,
            OpenMode::ReadWrite => libc::O_RDWR,
        };

        let mut permissions = 0u32;
        match create_mode {
            CreateMode::OpenOnly => {}
            CreateMode::CreateOnly(requested) => {
                flags |= libc::O_CREAT | libc::O_EXCL;
                permissions = requested;
            }
            CreateMode::OpenOrCreate(requested) => {
                flags |= libc::O_CREAT;
                permissions = requested;
            }
        }

        // The concrete mq_attr is needed only when a creation might happen
        // with at least one non-default field; otherwise the kernel's own
        // defaults apply.
        let mut requested_attributes: mq_attr = unsafe { mem::zeroed() };
        let all_defaulted = attributes.max_messages == Limit::Default
            && attributes.max_message_size == Limit::Default;
        let attributes_ptr = if all_defaulted || create_mode == CreateMode::OpenOnly {
            ptr::null()
        } else {
            requested_attributes.mq_maxmsg = match attributes.max_messages {
                Limit::Value(count) => count as c_long,
                Limit::Default => limits::default_max_messages() as c_long,
                Limit::Max => limits::max_max_messages() as c_long,
            };
            requested_attributes.mq_msgsize = match attributes.max_message_size {
                Limit::Value(size) => size as c_long,
                Limit::Default => limits::default_max_message_size() as c_long,
                Limit::Max => limits::max_max_message_size() as c_long,
            };
            &requested_attributes as *const mq_attr
        };

        let c_name = CString::new(name).map_err(|_| OpenError::InvalidParameter)?;
        let queue = unsafe {
            libc::mq_open(
                c_name.as_ptr(),
                flags,
                permissions as libc::mode_t,
                attributes_ptr,
            )
        };

        if queue == -1 {
            return Err(open_error(last_errno()));
        }

        self.handle = Handle::Blocking(queue);
        self.name = name.to_string();

        // The queue might not have been created by this call, so its
        // maximum message size must be queried rather than assumed.
        let mut reported: mq_attr = unsafe { mem::zeroed() };
        if unsafe { libc::mq_getattr(queue, &mut reported) } == -1 {
            // Keep the conservative default; it is smaller than any
            // maximum a real host is likely to report.
            warn!(
                "unable to read the attributes of the newly opened queue {name}; \
                 keeping a maximum message size of {}",
                self.max_message_size
            );
        } else {
            self.max_message_size = reported.mq_msgsize as usize;
        }

        Ok(())
    }

    /// Close the queue. Idempotent: closing an already closed handle
    /// reports [`CloseError::AlreadyClosed`]. The handle counts as closed
    /// after this call even if the kernel reports an error; a possibly-bad
    /// descriptor is never reused. Note that closing does not unlink the
    /// queue.
    pub fn close(&mut self) -> Result<(), CloseError> {
        let descriptor = match self.handle.descriptor() {
            None => return Err(CloseError::AlreadyClosed),
            Some(descriptor) => descriptor,
        };

        self.handle = Handle::Closed;
        self.name.clear();

        if unsafe { libc::mq_close(descriptor) } == -1 {
            return Err(close_error(last_errno()));
        }

        Ok(())
    }

    /// Set whether send and receive return immediately instead of
    /// blocking. A no-op when the handle is already in the requested mode.
    pub fn set_non_blocking(&mut self, non_blocking: bool) -> Result<(), SetNonBlockingError> {
        let descriptor = match self.handle {
            Handle::Closed => return Err(SetNonBlockingError::Closed),
            Handle::Blocking(descriptor) => {
                if !non_blocking {
                    return Ok(());
                }
                descriptor
            }
            Handle::NonBlocking(descriptor) => {
                if non_blocking {
                    return Ok(());
                }
                descriptor
            }
        };

        let mut attributes: mq_attr = unsafe { mem::zeroed() };
        if unsafe { libc::mq_getattr(descriptor, &mut attributes) } == -1 {
            return Err(set_non_blocking_error(last_errno()));
        }

        if non_blocking {
            attributes.mq_flags |= libc::O_NONBLOCK as c_long;
        } else {
            attributes.mq_flags &= !(libc::O_NONBLOCK as c_long);
        }

        if unsafe { libc::mq_setattr(descriptor, &attributes, ptr::null_mut()) } == -1 {
            return Err(set_non_blocking_error(last_errno()));
        }

        self.handle = if non_blocking {
            Handle::NonBlocking(descriptor)
        } else {
            Handle::Blocking(descriptor)
        };

        Ok(())
    }

    /// Enqueue a message, where higher `priority` values are received
    /// before lower ones. Blocks while the queue is full unless the handle
    /// is in non-blocking mode.
    pub fn send(&mut self, payload: &[u8], priority: u32) -> Result<(), SendError> {
        self.send_impl(payload, None, priority)
    }

    /// Like [`send`](MessageQueue::send), but give up with
    /// [`SendError::TimedOut`] once the absolute `deadline` passes.
    pub fn send_deadline(
        &mut self,
        payload: &[u8],
        deadline: SystemTime,
        priority: u32,
    ) -> Result<(), SendError> {
        self.send_impl(payload, Some(deadline), priority)
    }

    fn send_impl(
        &mut self,
        payload: &[u8],
        deadline: Option<SystemTime>,
        priority: u32,
    ) -> Result<(), SendError> {
        // A closed handle is indistinguishable from a descriptor that is
        // not open for writing.
        let descriptor = match self.handle.descriptor() {
            None => return Err(SendError::WrongMode),
            Some(descriptor) => descriptor,
        };

        let rc = match deadline {
            None => unsafe {
                libc::mq_send(
                    descriptor,
                    payload.as_ptr() as *const libc::c_char,
                    payload.len(),
                    priority,
                )
            },
            Some(deadline) => {
                let deadline = to_timespec(deadline);
                unsafe {
                    libc::mq_timedsend(
                        descriptor,
                        payload.as_ptr() as *const libc::c_char,
                        payload.len(),
                        priority,
                        &deadline,
                    )
                }
            }
        };

        if rc == -1 {
            return Err(send_error(last_errno()));
        }

        Ok(())
    }

    /// Dequeue the next message into `output`, which is resized to this
    /// queue's maximum message size and then shrunk to the received
    /// length. The message's priority is written through `priority` when
    /// one is supplied. Blocks while the queue is empty unless the handle
    /// is in non-blocking mode.
    pub fn receive(
        &mut self,
        output: &mut Vec<u8>,
        priority: Option<&mut u32>,
    ) -> Result<(), ReceiveError> {
        self.receive_impl(output, None, priority)
    }

    /// Like [`receive`](MessageQueue::receive), but give up with
    /// [`ReceiveError::TimedOut`] once the absolute `deadline` passes.
    pub fn receive_deadline(
        &mut self,
        output: &mut Vec<u8>,
        deadline: SystemTime,
        priority: Option<&mut u32>,
    ) -> Result<(), ReceiveError> {
        self.receive_impl(output, Some(deadline), priority)
    }

    fn receive_impl(
        &mut self,
        output: &mut Vec<u8>,
        deadline: Option<SystemTime>,
        priority: Option<&mut u32>,
    ) -> Result<(), ReceiveError> {
        // A closed handle is indistinguishable from a descriptor that is
        // not open for reading.
        let descriptor = match self.handle.descriptor() {
            None => return Err(ReceiveError::WrongMode),
            Some(descriptor) => descriptor,
        };

        output.resize(self.max_message_size, 0);
        let priority_ptr = priority.map_or(ptr::null_mut(), |priority| priority as *mut u32);

        let rc = match deadline {
            None => unsafe {
                libc::mq_receive(
                    descriptor,
                    output.as_mut_ptr() as *mut libc::c_char,
                    output.len(),
                    priority_ptr,
                )
            },
            Some(deadline) => {
                let deadline = to_timespec(deadline);
                unsafe {
                    libc::mq_timedreceive(
                        descriptor,
                        output.as_mut_ptr() as *mut libc::c_char,
                        output.len(),
                        priority_ptr,
                        &deadline,
                    )
                }
            }
        };

        if rc < 0 {
            return Err(receive_error(last_errno()));
        }

        output.truncate(rc as usize);

        Ok(())
    }

    /// The name of the open queue, or an empty string when closed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle currently represents an open queue.
    pub fn is_open(&self) -> bool {
        !matches!(self.handle, Handle::Closed)
    }

    /// The maximum message size the kernel reports for this queue, queried
    /// once when the queue was opened.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// The number of messages currently enqueued. Best effort: zero when
    /// the handle is closed or the query fails.
    pub fn num_current_messages(&self) -> usize {
        let descriptor = match self.handle.descriptor() {
            None => return 0,
            Some(descriptor) => descriptor,
        };

        let mut attributes: mq_attr = unsafe { mem::zeroed() };
        if unsafe { libc::mq_getattr(descriptor, &mut attributes) } == -1 {
            warn!("unable to read queue attributes; reporting zero current messages");
            return 0;
        }

        attributes.mq_curmsgs as usize
    }

    /// Mark the queue named `name` for deletion. The system removes it
    /// once every open handle to it has been closed.
    pub fn unlink(name: &str) -> Result<(), UnlinkError> {
        let c_name = CString::new(name).map_err(|_| UnlinkError::InvalidParameter)?;

        if unsafe { libc::mq_unlink(c_name.as_ptr()) } != -1 {
            return Ok(());
        }

        Err(unlink_error(last_errno()))
    }

    /// The largest max-messages value this host accepts when the message
    /// size is defaulted. Measured once per process and then cached.
    pub fn max_max_messages() -> i64 {
        limits::max_max_messages()
    }

    /// The largest max-message-size value this host accepts when the
    /// message count is defaulted. Measured once per process and then
    /// cached.
    pub fn max_max_message_size() -> i64 {
        limits::max_max_message_size()
    }

    /// The number of messages a default-created queue holds before senders
    /// block. Measured once per process and then cached.
    pub fn default_max_messages() -> i64 {
        limits::default_max_messages()
    }

    /// The maximum message size of a default-created queue. Measured once
    /// per process and then cached.
    pub fn default_max_message_size() -> i64 {
        limits::default_max_message_size()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        MessageQueue::new()
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// The facades hold their queue either by value or by mutable reference,
/// so a single queue can back coupled sender and receiver roles.
pub(crate) enum QueueRef<'q> {
    Owned(MessageQueue),
    Borrowed(&'q mut MessageQueue),
}

impl QueueRef<'_> {
    pub(crate) fn queue(&self) -> &MessageQueue {
        match self {
            QueueRef::Owned(queue) => queue,
            QueueRef::Borrowed(queue) => queue,
        }
    }

    pub(crate) fn queue_mut(&mut self) -> &mut MessageQueue {
        match self {
            QueueRef::Owned(queue) => queue,
            QueueRef::Borrowed(queue) => queue,
        }
    }
}

/// An absolute wall-clock deadline as the kernel expects it. A deadline
/// before the epoch clamps to the epoch, which is still in the past and so
/// times out immediately when the call would otherwise block.
fn to_timespec(deadline: SystemTime) -> libc::timespec {
    let since_epoch = deadline
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);

    let mut timespec: libc::timespec = unsafe { mem::zeroed() };
    timespec.tv_sec = since_epoch.as_secs() as libc::time_t;
    timespec.tv_nsec = since_epoch.subsec_nanos() as _;
    timespec
}

fn open_error(errno: i32) -> OpenError {
    match errno {
        libc::EACCES => OpenError::PermissionDenied,
        libc::EEXIST => OpenError::AlreadyExists,
        libc::EINTR => OpenError::Interrupted,
        libc::EINVAL => OpenError::InvalidParameter,
        libc::EMFILE | libc::ENFILE => OpenError::LimitReached,
        libc::ENAMETOOLONG => OpenError::NameTooLong,
        libc::ENOENT => OpenError::DoesNotExist,
        libc::ENOSPC => OpenError::NotEnoughSpace,
        // Seen on some hosts when the leading slash is missing.
        libc::ESPIPE => OpenError::InvalidParameter,
        _ => {
            log_unexpected_errno(errno);
            OpenError::Unknown
        }
    }
}

fn unlink_error(errno: i32) -> UnlinkError {
    match errno {
        libc::EACCES => UnlinkError::PermissionDenied,
        libc::EINTR => UnlinkError::Interrupted,
        // Seen on Linux when an empty name is given.
        libc::EINVAL => UnlinkError::InvalidParameter,
        libc::ENOENT => UnlinkError::DoesNotExist,
        libc::ENAMETOOLONG => UnlinkError::NameTooLong,
        _ => {
            log_unexpected_errno(errno);
            UnlinkError::Unknown
        }
    }
}

fn send_error(errno: i32) -> SendError {
    match errno {
        libc::EAGAIN => SendError::Full,
        libc::EBADF => SendError::WrongMode,
        libc::EINTR => SendError::Interrupted,
        libc::EINVAL => SendError::BadPriorityOrDeadline,
        libc::EMSGSIZE => SendError::MessageTooLarge,
        libc::ETIMEDOUT => SendError::TimedOut,
        _ => {
            log_unexpected_errno(errno);
            SendError::Unknown
        }
    }
}

fn receive_error(errno: i32) -> ReceiveError {
    match errno {
        libc::EAGAIN => ReceiveError::Empty,
        libc::EBADF => ReceiveError::WrongMode,
        libc::EINTR => ReceiveError::Interrupted,
        libc::EINVAL => ReceiveError::BadDeadline,
        libc::ETIMEDOUT => ReceiveError::TimedOut,
        libc::EBADMSG => ReceiveError::CorruptedMessage,
        // EMSGSIZE lands here: the receive buffer is sized from the known
        // maximum, so a too-small-buffer report is unexpected.
        _ => {
            log_unexpected_errno(errno);
            ReceiveError::Unknown
        }
    }
}

// mq_close, mq_getattr, and mq_setattr fail only on an invalid
// descriptor, which the handle's state machine should rule out, but the
// possibility is accommodated anyway.

fn close_error(errno: i32) -> CloseError {
    match errno {
        libc::EBADF => CloseError::BadDescriptor,
        _ => {
            log_unexpected_errno(errno);
            CloseError::Unknown
        }
    }
}

fn set_non_blocking_error(errno: i32) -> SetNonBlockingError {
    match errno {
        libc::EBADF => SetNonBlockingError::BadDescriptor,
        _ => {
            log_unexpected_errno(errno);
            SetNonBlockingError::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_new_handle_is_closed() {
        let queue = MessageQueue::new();
        assert!(!queue.is_open());
        assert_eq!(queue.name(), "");
        assert_eq!(queue.num_current_messages(), 0);
    }

    #[test]
    fn closing_a_new_handle_reports_already_closed() {
        let mut queue = MessageQueue::new();
        assert_eq!(queue.close(), Err(CloseError::AlreadyClosed));
    }

    #[test]
    fn operations_on_a_closed_handle_fail_without_touching_the_kernel() {
        let mut queue = MessageQueue::new();
        assert_eq!(queue.send(b"x", 0), Err(SendError::WrongMode));
        assert_eq!(
            queue.receive(&mut Vec::new(), None),
            Err(ReceiveError::WrongMode)
        );
        assert_eq!(
            queue.set_non_blocking(true),
            Err(SetNonBlockingError::Closed)
        );
    }

    #[test]
    fn default_attributes_leave_both_limits_defaulted() {
        let attributes = Attributes::default();
        assert_eq!(attributes.max_messages, Limit::Default);
        assert_eq!(attributes.max_message_size, Limit::Default);
    }

    #[test]
    fn errno_values_map_to_their_variants() {
        assert_eq!(open_error(libc::EEXIST), OpenError::AlreadyExists);
        assert_eq!(open_error(libc::ENOENT), OpenError::DoesNotExist);
        assert_eq!(open_error(libc::ENFILE), OpenError::LimitReached);
        assert_eq!(send_error(libc::EAGAIN), SendError::Full);
        assert_eq!(send_error(libc::ETIMEDOUT), SendError::TimedOut);
        assert_eq!(receive_error(libc::EAGAIN), ReceiveError::Empty);
        assert_eq!(receive_error(libc::EBADMSG), ReceiveError::CorruptedMessage);
        assert_eq!(close_error(libc::EBADF), CloseError::BadDescriptor);
    }

    #[test]
    fn unexpected_errno_values_map_to_unknown() {
        assert_eq!(open_error(libc::EXDEV), OpenError::Unknown);
        assert_eq!(send_error(libc::EXDEV), SendError::Unknown);
        assert_eq!(receive_error(libc::EMSGSIZE), ReceiveError::Unknown);
    }

    #[test]
    fn deadlines_before_the_epoch_clamp_to_the_epoch() {
        let before_epoch = UNIX_EPOCH - Duration::from_secs(10);
        let timespec = to_timespec(before_epoch);
        assert_eq!(timespec.tv_sec, 0);
        assert_eq!(timespec.tv_nsec, 0);
    }
}
