//! Error taxonomy for every queue operation.
//!
//! Each operation returns a dedicated error enum (a "category"). The
//! categories share one flat, non-negative integer code space: zero means
//! success for every category, each category owns a contiguous block of
//! codes, and the last code in every block is that category's `Unknown`.
//! Codes above the last built-in category belong to the message codec and
//! are resolved through an overflow describer (see [`description_or`]).

use std::fmt;
use std::io;

use log::warn;

use crate::format::CodecError;

/// Errors returned by [`MessageQueue::open`](crate::MessageQueue::open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpenError {
    PermissionDenied = 1,
    /// Exclusive creation was requested and the queue already exists.
    AlreadyExists,
    Interrupted,
    NameTooLong,
    /// The name is malformed or a requested attribute is out of range.
    InvalidParameter,
    /// The per-process or system-wide descriptor limit was reached.
    LimitReached,
    DoesNotExist,
    NotEnoughSpace,
    Unknown,
}

/// Errors returned by [`MessageQueue::unlink`](crate::MessageQueue::unlink).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum UnlinkError {
    PermissionDenied = 10,
    Interrupted,
    InvalidParameter,
    DoesNotExist,
    NameTooLong,
    Unknown,
}

/// Errors returned by the send operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SendError {
    /// The queue is in non-blocking mode and is full.
    Full = 16,
    /// The queue is not open for writing.
    WrongMode,
    Interrupted,
    BadPriorityOrDeadline,
    /// The encoded message exceeds the queue's maximum message size.
    MessageTooLarge,
    TimedOut,
    Unknown,
}

/// Errors returned by the receive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReceiveError {
    /// The queue is in non-blocking mode and is empty.
    Empty = 23,
    /// The queue is not open for reading.
    WrongMode,
    Interrupted,
    BadDeadline,
    TimedOut,
    /// The host detected data corruption in the message.
    CorruptedMessage,
    Unknown,
}

/// Errors returned by [`MessageQueue::set_non_blocking`](crate::MessageQueue::set_non_blocking).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SetNonBlockingError {
    /// The queue is closed, so there is no blocking mode to change.
    Closed = 30,
    BadDescriptor,
    Unknown,
}

/// Errors returned by [`MessageQueue::close`](crate::MessageQueue::close).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CloseError {
    AlreadyClosed = 33,
    BadDescriptor,
    Unknown,
}

macro_rules! categories {
    ($($variant:ident => $category:ident),* $(,)?) => {
        /// Any error produced by this crate, in the unified code space.
        ///
        /// The higher-level facades mix categories (a send can fail while
        /// switching blocking modes, while encoding, or in the kernel), so
        /// they return this sum type. [`Error::code`] recovers the
        /// canonical integer and [`Error::description`] the table entry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Error {
            $($variant($category),)*
            /// A message codec failure; its codes sit above the built-in
            /// categories.
            Codec(CodecError),
        }

        impl Error {
            /// The canonical code for this error in the unified space.
            pub fn code(self) -> i32 {
                match self {
                    $(Error::$variant(error) => error.code(),)*
                    Error::Codec(error) => error.code(),
                }
            }

            /// A technical description of this error.
            pub fn description(self) -> &'static str {
                match self {
                    $(Error::$variant(error) => error.description(),)*
                    Error::Codec(error) => error.description(),
                }
            }
        }

        $(
            impl $category {
                /// The canonical code for this error in the unified space.
                pub fn code(self) -> i32 {
                    self as i32
                }

                /// A technical description of this error.
                pub fn description(self) -> &'static str {
                    description(self.code())
                }
            }

            impl fmt::Display for $category {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.description())
                }
            }

            impl std::error::Error for $category {}

            impl From<$category> for Error {
                fn from(error: $category) -> Error {
                    Error::$variant(error)
                }
            }
        )*
    };
}

categories! {
    Open => OpenError,
    Unlink => UnlinkError,
    Send => SendError,
    Receive => ReceiveError,
    SetNonBlocking => SetNonBlockingError,
    Close => CloseError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for Error {}

impl From<CodecError> for Error {
    fn from(error: CodecError) -> Error {
        Error::Codec(error)
    }
}

/// Greatest code owned by the built-in categories.
const MAX_BUILTIN_CODE: i32 = CloseError::Unknown as i32;

const UNKNOWN_DESCRIPTION: &str = "An error occurred that this library did not anticipate.";

/// One entry per code, success first, each category block ending with the
/// generic unknown entry.
const DESCRIPTIONS: [&str; (MAX_BUILTIN_CODE + 1) as usize] = [
    "success",
    // Open
    "The queue exists and the requested access is denied, or the queue does \
     not exist and permission to create it is denied.",
    "Exclusive creation was requested and the named queue already exists.",
    "The open operation was interrupted by a signal.",
    "The queue name is longer than the host allows.",
    "Opening is not supported for the given name, or a requested attribute \
     is zero, negative, or greater than the host allows.",
    "Too many queue or file descriptors are in use by this process or by the \
     system as a whole.",
    "Creation was not requested and the named queue does not exist.",
    "There is insufficient space for the creation of the new queue.",
    UNKNOWN_DESCRIPTION,
    // Unlink
    "Permission to unlink the named queue is denied.",
    "The unlink operation was interrupted by a signal.",
    "The queue name is not a valid name.",
    "The named queue does not exist.",
    "The queue name is longer than the host allows.",
    UNKNOWN_DESCRIPTION,
    // Send
    "The queue is in non-blocking mode and is full.",
    "The queue is not open for writing.",
    "The send operation was interrupted by a signal.",
    "The message priority or the deadline is outside the valid range.",
    "The message length exceeds the maximum message size of the queue.",
    "The deadline expired before the message could be enqueued.",
    UNKNOWN_DESCRIPTION,
    // Receive
    "The queue is in non-blocking mode and is empty.",
    "The queue is not open for reading.",
    "The receive operation was interrupted by a signal.",
    "The deadline is outside the valid range.",
    "The deadline expired before a message arrived on the queue.",
    "The host detected a data corruption problem with the message.",
    UNKNOWN_DESCRIPTION,
    // SetNonBlocking
    "The queue is closed, so there is no blocking mode to set.",
    "The stored queue descriptor is not a valid descriptor.",
    UNKNOWN_DESCRIPTION,
    // Close
    "The queue is already closed.",
    "The stored queue descriptor is not a valid descriptor.",
    UNKNOWN_DESCRIPTION,
];

fn default_overflow(_code: i32) -> &'static str {
    "The error code is not known to this library."
}

/// Return a technical description of the built-in error `code`, deferring
/// codes beyond the built-in categories to a default overflow message. For
/// the full code space including the codec region, use
/// [`crate::description`].
pub fn description(code: i32) -> &'static str {
    description_or(code, default_overflow)
}

/// Return a technical description of the error `code`. Codes beyond the
/// built-in categories are passed to `overflow`, reduced by the amount by
/// which they exceed the greatest built-in code.
pub fn description_or(code: i32, overflow: fn(i32) -> &'static str) -> &'static str {
    if (0..=MAX_BUILTIN_CODE).contains(&code) {
        DESCRIPTIONS[code as usize]
    } else {
        overflow(code - (MAX_BUILTIN_CODE + 1))
    }
}

/// Lift a category-local `code` into the overflow region above the built-in
/// categories, so that it round-trips through [`description_or`].
pub fn overflow_code(code: i32) -> i32 {
    debug_assert!(code >= 0);
    MAX_BUILTIN_CODE + 1 + code
}

pub(crate) fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Log an errno value no category mapping anticipates. The numeric value
/// is preserved here even though the caller reports `Unknown`.
pub(crate) fn log_unexpected_errno(errno: i32) {
    warn!(
        "unexpected errno {errno}, which is the system error: {}",
        io::Error::from_raw_os_error(errno)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_partition_the_code_space() {
        // Each category starts right after its predecessor's unknown code.
        assert_eq!(OpenError::PermissionDenied.code(), 1);
        assert_eq!(UnlinkError::PermissionDenied.code(), OpenError::Unknown.code() + 1);
        assert_eq!(SendError::Full.code(), UnlinkError::Unknown.code() + 1);
        assert_eq!(ReceiveError::Empty.code(), SendError::Unknown.code() + 1);
        assert_eq!(SetNonBlockingError::Closed.code(), ReceiveError::Unknown.code() + 1);
        assert_eq!(CloseError::AlreadyClosed.code(), SetNonBlockingError::Unknown.code() + 1);
        assert_eq!(CloseError::Unknown.code(), MAX_BUILTIN_CODE);
    }

    #[test]
    fn every_builtin_code_has_a_description() {
        for code in 0..=MAX_BUILTIN_CODE {
            assert!(!description(code).is_empty(), "code {code}");
        }
        assert_eq!(description(0), "success");
    }

    #[test]
    fn codes_past_the_table_use_the_overflow_describer() {
        fn overflow(code: i32) -> &'static str {
            match code {
                0 => "first overflow code",
                _ => "other overflow code",
            }
        }

        assert_eq!(
            description_or(MAX_BUILTIN_CODE + 1, overflow),
            "first overflow code"
        );
        assert_eq!(
            description_or(MAX_BUILTIN_CODE + 5, overflow),
            "other overflow code"
        );
        assert_eq!(
            description(MAX_BUILTIN_CODE + 1),
            "The error code is not known to this library."
        );
    }

    #[test]
    fn overflow_codes_round_trip() {
        fn identity(code: i32) -> &'static str {
            match code {
                3 => "three",
                _ => "not three",
            }
        }

        assert_eq!(description_or(overflow_code(3), identity), "three");
    }

    #[test]
    fn unified_error_reports_the_category_code() {
        assert_eq!(Error::from(OpenError::DoesNotExist).code(), OpenError::DoesNotExist.code());
        assert_eq!(Error::from(ReceiveError::TimedOut).code(), ReceiveError::TimedOut.code());
        assert_eq!(
            Error::from(ReceiveError::TimedOut).description(),
            ReceiveError::TimedOut.description()
        );
    }
}
