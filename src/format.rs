//! Message formats and their codecs.
//!
//! Two formats are supported. `Raw` passes payloads through untouched, so
//! the per-message size limit of the queue applies to the caller's bytes
//! directly. `Extended` appends a one-byte trailer to every message: when
//! the payload (plus the trailer) fits the queue's limit, the payload is
//! carried in place; otherwise the payload is spilled to a temporary file
//! and the message carries the file's path instead. Receivers decode
//! transparently, reading and deleting the spill file, so senders and
//! receivers using the extended format are freed from the queue's size
//! limit.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::mem;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use log::{error, warn};

use crate::errors::{description_or, overflow_code};

const TRAILER_IN_PLACE: u8 = 0x00;
const TRAILER_EXTERNAL_FILE: u8 = 0x01;

/// Environment variables consulted, in order, to locate the temporary
/// directory for spill files.
const TEMP_DIR_VARIABLES: [&str; 4] = ["TMPDIR", "TMP", "TEMP", "TEMPDIR"];

const SPILL_FILE_PREFIX: &str = "mq-message-";

const MAX_CREATE_ATTEMPTS: u32 = 3;

/// How messages are encoded on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Payloads travel as-is.
    Raw,
    /// Payloads carry a trailer byte and may spill to a temporary file.
    Extended,
}

/// Encodes a payload for the queue, using `scratch` as the backing store
/// when the encoding differs from the payload itself. Returns the bytes to
/// enqueue.
pub(crate) type Encoder =
    for<'a> fn(usize, &'a [u8], &'a mut Vec<u8>) -> Result<&'a [u8], CodecError>;

/// Decodes a received message in place.
pub(crate) type Decoder = fn(&mut Vec<u8>) -> Result<(), CodecError>;

impl Format {
    pub(crate) fn encoder(self) -> Encoder {
        match self {
            Format::Raw => encode_raw,
            Format::Extended => encode_extended,
        }
    }

    pub(crate) fn decoder(self) -> Decoder {
        match self {
            Format::Raw => decode_raw,
            Format::Extended => decode_extended,
        }
    }
}

/// A message codec failure. These occupy the code region above the queue
/// categories of [`crate::errors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    Encoder,
    Decoder,
}

const CODEC_DESCRIPTIONS: [&str; 2] = [
    "An error occurred while encoding the message.",
    "An error occurred while decoding the message.",
];

impl CodecError {
    /// The canonical code for this error in the unified space.
    pub fn code(self) -> i32 {
        overflow_code(self as i32)
    }

    /// A technical description of this error.
    pub fn description(self) -> &'static str {
        CODEC_DESCRIPTIONS[self as usize]
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for CodecError {}

fn codec_overflow(code: i32) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|index| CODEC_DESCRIPTIONS.get(index))
        .copied()
        .unwrap_or("The error code is not known to this library.")
}

/// Return a technical description of any error code produced by this
/// crate, including the codec codes above the built-in categories.
pub fn description(code: i32) -> &'static str {
    description_or(code, codec_overflow)
}

fn encode_raw<'a>(
    _max_message_size: usize,
    payload: &'a [u8],
    _scratch: &'a mut Vec<u8>,
) -> Result<&'a [u8], CodecError> {
    Ok(payload)
}

fn decode_raw(_message: &mut Vec<u8>) -> Result<(), CodecError> {
    Ok(())
}

fn encode_extended<'a>(
    max_message_size: usize,
    payload: &'a [u8],
    scratch: &'a mut Vec<u8>,
) -> Result<&'a [u8], CodecError> {
    // In place only when the trailer byte still fits under the queue
    // limit; a payload of exactly the limit spills.
    if payload.len() < max_message_size {
        scratch.clear();
        scratch.reserve(payload.len() + 1);
        scratch.extend_from_slice(payload);
        scratch.push(TRAILER_IN_PLACE);
        return Ok(scratch.as_slice());
    }

    let path = write_spill_file(payload)?;
    scratch.clear();
    scratch.extend_from_slice(path.as_os_str().as_bytes());
    scratch.push(TRAILER_EXTERNAL_FILE);
    Ok(scratch.as_slice())
}

fn decode_extended(message: &mut Vec<u8>) -> Result<(), CodecError> {
    match message.last().copied() {
        None => {
            error!("the extended codec cannot decode an empty message");
            Err(CodecError::Decoder)
        }
        Some(TRAILER_IN_PLACE) => {
            message.pop();
            Ok(())
        }
        Some(TRAILER_EXTERNAL_FILE) => {
            message.pop();
            let path = PathBuf::from(OsString::from_vec(mem::take(message)));
            *message = read_and_remove_spill_file(&path)?;
            Ok(())
        }
        Some(other) => {
            error!(
                "the final byte of the message is {other:#04x}, which is not an \
                 accepted value for the extended codec"
            );
            Err(CodecError::Decoder)
        }
    }
}

/// The directory for spill files: the first set variable among `TMPDIR`,
/// `TMP`, `TEMP`, and `TEMPDIR`, else `/tmp`.
fn temp_directory() -> Result<PathBuf, CodecError> {
    let (value, variable) = TEMP_DIR_VARIABLES
        .iter()
        .find_map(|&name| env::var_os(name).map(|value| (value, Some(name))))
        .unwrap_or_else(|| (OsString::from("/tmp"), None));

    let path = PathBuf::from(value);
    if !path.is_dir() {
        match variable {
            Some(name) => warn!(
                "the path {path:?}, which is the value of the environment variable \
                 {name}, is not a directory"
            ),
            None => warn!("the path {path:?} is not a directory"),
        }
        return Err(CodecError::Encoder);
    }

    Ok(path)
}

/// Write `payload` to a fresh, uniquely named file in the temporary
/// directory, readable by everyone and writable by the owner, and return
/// its path. The file is not open when this returns.
fn write_spill_file(payload: &[u8]) -> Result<PathBuf, CodecError> {
    let directory = temp_directory()?;

    for attempt in 1..=MAX_CREATE_ATTEMPTS {
        let name = format!(
            "{SPILL_FILE_PREFIX}{:016x}{:016x}",
            fastrand::u64(..),
            fastrand::u64(..)
        );
        let path = directory.join(name);

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&path)
        {
            Ok(file) => file,
            Err(error) => {
                warn!(
                    "unable to create a temporary file at {path:?}; attempt \
                     {attempt}/{MAX_CREATE_ATTEMPTS}: {error}"
                );
                continue;
            }
        };

        let written = match file.write(payload) {
            Ok(written) => written,
            Err(error) => {
                error!("unable to write to the temporary file {path:?}: {error}");
                return Err(CodecError::Encoder);
            }
        };

        if written != payload.len() {
            error!(
                "tried to write {} bytes to the temporary file {path:?} but only \
                 {written} were written",
                payload.len()
            );
            return Err(CodecError::Encoder);
        }

        return Ok(path);
    }

    // ran out of attempts
    Err(CodecError::Encoder)
}

/// Removes the spill file when the read is finished, however it finishes.
/// Removal failures are logged, never reported.
struct RemoveOnDrop<'a>(&'a Path);

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(self.0) {
            warn!("unable to remove the file {:?}: {error}", self.0);
        }
    }
}

/// Read the whole file at `path` and delete it. A file that turns out
/// shorter or longer than its reported size was modified between the size
/// query and the read, and is treated as corrupt.
fn read_and_remove_spill_file(path: &Path) -> Result<Vec<u8>, CodecError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            error!("unable to open the file {path:?} for reading: {error}");
            return Err(CodecError::Decoder);
        }
    };

    let _cleanup = RemoveOnDrop(path);

    let size = match file.metadata() {
        Ok(metadata) => metadata.len() as usize,
        Err(error) => {
            error!("unable to determine the size of the file {path:?}: {error}");
            return Err(CodecError::Decoder);
        }
    };

    if size == 0 {
        // success, since there is nothing to read
        return Ok(Vec::new());
    }

    // Read one byte past the expected size so a file that grew since the
    // size query is detected.
    let mut contents = vec![0u8; size + 1];
    let mut filled = 0;
    loop {
        match file.read(&mut contents[filled..]) {
            Ok(0) => break,
            Ok(count) => {
                filled += count;
                if filled == contents.len() {
                    break;
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => {
                error!("unable to read the contents of {path:?}: {error}");
                return Err(CodecError::Decoder);
            }
        }
    }

    if filled != size {
        error!(
            "expected {size} bytes in {path:?} but read {filled}; maybe the file \
             was modified"
        );
        return Err(CodecError::Decoder);
    }

    contents.truncate(size);
    Ok(contents)
}
