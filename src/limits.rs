//! Runtime discovery of the host's per-queue capacity limits.
//!
//! The kernel's limits on `max messages` and `max message size` are
//! host-configurable and cannot be queried reliably, so they are measured
//! instead: a throwaway queue created with default attributes reveals the
//! defaults, and [`find_max_if`] over a "can a queue be created with this
//! value?" predicate finds the maxima. Every value is computed at most
//! once per process; the first caller does the work and everyone else
//! observes the finished result.

use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;
use std::sync::OnceLock;

use libc::{c_long, mq_attr, mqd_t};
use log::{debug, trace, warn};

use crate::errors::last_errno;
use crate::search::find_max_if;

/// Pessimistically small values used only when the initial default-queue
/// creation itself fails.
pub(crate) const FALLBACK_MAX_MESSAGES: i64 = 1;
pub(crate) const FALLBACK_MAX_MESSAGE_SIZE: i64 = 1024;

const MAX_NAME_ATTEMPTS: u32 = 3;

fn system_error(errno: i32) -> io::Error {
    io::Error::from_raw_os_error(errno)
}

/// A queue name of the form `/` plus twelve hex digits, which stays within
/// the most conservative portable name length.
fn random_queue_name() -> String {
    format!("/{:012x}", fastrand::u64(..) & 0xffff_ffff_ffff)
}

/// Create a queue with a randomly generated name, retrying on a name
/// collision. Returns the open descriptor and the name, or the errno of
/// the last failed attempt.
fn create_probe_queue(attributes: Option<&mq_attr>) -> Result<(mqd_t, CString), i32> {
    let attributes_ptr = attributes.map_or(ptr::null(), |attributes| attributes as *const mq_attr);

    let mut attempt = 1;
    loop {
        // The name contains only a slash and hex digits, so it cannot hold
        // an interior NUL.
        let name = CString::new(random_queue_name()).unwrap();

        // "Write only" is arbitrary here; what matters is "create only".
        let flags = libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL;
        let permissions: libc::mode_t = 0o600;
        let queue = unsafe { libc::mq_open(name.as_ptr(), flags, permissions, attributes_ptr) };
        if queue != -1 {
            return Ok((queue, name));
        }

        let errno = last_errno();
        if errno != libc::EEXIST || attempt == MAX_NAME_ATTEMPTS {
            trace!(
                "unable to create a probe queue with name={:?}: {}",
                name,
                system_error(errno)
            );
            return Err(errno);
        }

        attempt += 1;
    }
}

fn close_and_unlink_probe_queue(queue: mqd_t, name: &CString) {
    if unsafe { libc::mq_close(queue) } == -1 {
        warn!("unable to close probe queue: {}", system_error(last_errno()));
    }

    if unsafe { libc::mq_unlink(name.as_ptr()) } == -1 {
        warn!("unable to unlink probe queue: {}", system_error(last_errno()));
    }
}

/// Create and immediately destroy a queue with the given creation
/// attributes. With `read_back`, the attributes the kernel actually gave
/// the queue are returned as `(max_messages, max_message_size)`.
fn probe_queue(attributes: Option<&mq_attr>, read_back: bool) -> Result<Option<(i64, i64)>, i32> {
    let (queue, name) = create_probe_queue(attributes)?;

    let mut result = Ok(None);
    if read_back {
        let mut reported: mq_attr = unsafe { mem::zeroed() };
        if unsafe { libc::mq_getattr(queue, &mut reported) } == -1 {
            let errno = last_errno();
            warn!(
                "unable to read the attributes of a probe queue: {}",
                system_error(errno)
            );
            result = Err(errno);
        } else {
            result = Ok(Some((reported.mq_maxmsg as i64, reported.mq_msgsize as i64)));
        }
    }

    close_and_unlink_probe_queue(queue, &name);

    result
}

/// The attributes of a queue created without specifying any.
fn system_defaults() -> (i64, i64) {
    static DEFAULTS: OnceLock<(i64, i64)> = OnceLock::new();

    *DEFAULTS.get_or_init(|| match probe_queue(None, true) {
        Ok(Some(defaults)) => {
            debug!(
                "system default queue attributes measured: max messages={} max message size={}",
                defaults.0, defaults.1
            );
            defaults
        }
        Ok(None) | Err(_) => {
            warn!("unable to measure the system default queue attributes; using fallback values");
            (FALLBACK_MAX_MESSAGES, FALLBACK_MAX_MESSAGE_SIZE)
        }
    })
}

pub(crate) fn default_max_messages() -> i64 {
    system_defaults().0
}

pub(crate) fn default_max_message_size() -> i64 {
    system_defaults().1
}

fn can_create_queue_with(max_messages: i64, max_message_size: i64) -> bool {
    let mut attributes: mq_attr = unsafe { mem::zeroed() };
    attributes.mq_maxmsg = max_messages as c_long;
    attributes.mq_msgsize = max_message_size as c_long;

    probe_queue(Some(&attributes), false).is_ok()
}

/// The largest max-messages value this host accepts when the message size
/// is defaulted.
pub(crate) fn max_max_messages() -> i64 {
    static VALUE: OnceLock<i64> = OnceLock::new();

    *VALUE.get_or_init(|| {
        let value = find_max_if(default_max_messages(), |candidate| {
            can_create_queue_with(candidate, default_max_message_size())
        });
        debug!("largest max-messages value this host accepts: {value}");
        value
    })
}

/// The largest max-message-size value this host accepts when the message
/// count is defaulted.
pub(crate) fn max_max_message_size() -> i64 {
    static VALUE: OnceLock<i64> = OnceLock::new();

    *VALUE.get_or_init(|| {
        let value = find_max_if(default_max_message_size(), |candidate| {
            can_create_queue_with(default_max_messages(), candidate)
        });
        debug!("largest max-message-size value this host accepts: {value}");
        value
    })
}
