//! Error types for the write-ahead log subsystem.
//!
//! [`WalError`] covers all failure modes of the append-only log:
//! I/O errors, capacity limits, corruption detected on replay, and a
//! poisoned writer after a failed flush.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur within the write-ahead log.
#[derive(Debug)]
#[non_exhaustive]
pub enum WalError {
    /// An I/O error occurred while opening, reading or writing the log.
    Io {
        /// The underlying I/O error message.
        message: String,
        /// The file path involved, if known.
        path: Option<PathBuf>,
    },

    /// A record payload exceeds the 16-bit length field.
    PayloadTooLarge {
        /// The requested payload size in bytes.
        payload_bytes: usize,
        /// The largest encodable payload.
        max_bytes: usize,
    },

    /// The 40-bit sequence space is exhausted.
    SequenceOverflow {
        /// The sequence that could not be assigned.
        sequence: u64,
    },

    /// A record failed CRC32 integrity verification on replay.
    CorruptRecord {
        /// The sequence number of the corrupt record.
        sequence: u64,
        /// The CRC32 stored on disk.
        expected_crc: u32,
        /// The CRC32 computed from the record bytes.
        actual_crc: u32,
    },

    /// A record header announced more payload than the file holds.
    ///
    /// A truncated *final* record is treated as end-of-log by the
    /// reader; this error is only surfaced when the caller asks for
    /// strict validation.
    TruncatedRecord {
        /// Byte offset of the record header.
        offset: usize,
        /// The announced payload length.
        payload_len: usize,
    },

    /// A record carries a type code outside the known and user ranges.
    InvalidRecordType {
        /// Byte offset of the record header.
        offset: usize,
        /// The offending type code.
        type_code: u8,
    },

    /// The writer is poisoned by an earlier flush failure; the log must
    /// be reopened before further appends.
    Poisoned,
}

impl fmt::Display for WalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalError::Io { message, path } => {
                if let Some(p) = path {
                    write!(f, "WAL I/O error at {}: {message}", p.display())
                } else {
                    write!(f, "WAL I/O error: {message}")
                }
            }
            WalError::PayloadTooLarge {
                payload_bytes,
                max_bytes,
            } => {
                write!(
                    f,
                    "WAL payload too large: {payload_bytes} bytes exceeds {max_bytes}"
                )
            }
            WalError::SequenceOverflow { sequence } => {
                write!(f, "WAL sequence overflow at {sequence}")
            }
            WalError::CorruptRecord {
                sequence,
                expected_crc,
                actual_crc,
            } => {
                write!(
                    f,
                    "corrupt WAL record at sequence {sequence}: \
                     expected CRC {expected_crc:#010x}, got {actual_crc:#010x}"
                )
            }
            WalError::TruncatedRecord {
                offset,
                payload_len,
            } => {
                write!(
                    f,
                    "truncated WAL record at offset {offset}: \
                     {payload_len} payload bytes announced past end of file"
                )
            }
            WalError::InvalidRecordType { offset, type_code } => {
                write!(
                    f,
                    "invalid WAL record type {type_code:#04x} at offset {offset}"
                )
            }
            WalError::Poisoned => {
                write!(f, "WAL writer poisoned by an earlier flush failure")
            }
        }
    }
}

impl std::error::Error for WalError {}

impl From<std::io::Error> for WalError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        WalError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}
