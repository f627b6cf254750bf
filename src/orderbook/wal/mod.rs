//! Write-ahead log subsystem: binary record format, buffered writer,
//! and replay reader.
//!
//! Every book mutation is appended to the log before it is applied, so
//! replaying the log into a fresh book reconstructs the original state
//! (see [`OrderBook::recover_from_wal`](crate::OrderBook::recover_from_wal)).
//!
//! # Types
//!
//! - [`Wal`] / [`WalConfig`] — the append-only writer
//! - [`WalReader`] — sequential record iterator for replay
//! - [`WalRecord`] / [`RecordBody`] — decoded records
//! - [`InsertBody`], [`CancelBody`], [`MatchBody`] — fixed payloads
//! - [`WalError`] — failure taxonomy

pub mod error;
pub mod reader;
pub mod record;
pub mod writer;

pub use error::WalError;
pub use reader::WalReader;
pub use record::{
    CANCEL_BODY_SIZE, CancelBody, INSERT_BODY_SIZE, InsertBody, MATCH_BODY_SIZE, MAX_PAYLOAD,
    MAX_SEQUENCE, MatchBody, RECORD_CRC_SIZE, RECORD_HEADER_SIZE, RecordBody, RecordType,
    USER_TYPE_BASE, WalRecord, pack_header, unpack_header,
};
pub use writer::{DEFAULT_BUFFER_SIZE, FLUSH_ALIGN, Wal, WalConfig};
