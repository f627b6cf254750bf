//! Sequential WAL record reader over a read-only memory map.
//!
//! [`WalReader`] iterates records in file order. Decoding stops at the
//! first zero or out-of-range type byte (logical end-of-log, which is
//! how 4 KiB flush padding is skipped) and at a truncated final record
//! (a torn write is end-of-log, not corruption). CRC mismatches are
//! yielded as [`WalError::CorruptRecord`] items so the caller decides
//! whether to stop or skip.

use super::error::WalError;
use super::record::{
    CANCEL_BODY_SIZE, CancelBody, INSERT_BODY_SIZE, InsertBody, MATCH_BODY_SIZE, MatchBody,
    RECORD_CRC_SIZE, RECORD_HEADER_SIZE, RecordBody, RecordType, USER_TYPE_BASE, WalRecord,
    unpack_header,
};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Structurally scans `data` for valid records.
///
/// Returns `(valid_len, last_sequence)`: the byte length of the valid
/// prefix and the highest sequence observed. Used by the writer to
/// resume an existing log. CRC trailers are accounted for in record
/// sizes but not verified here.
pub(crate) fn scan_valid(data: &[u8], crc_enabled: bool) -> (usize, u64) {
    let crc_len = if crc_enabled { RECORD_CRC_SIZE } else { 0 };
    let mut offset = 0usize;
    let mut last_seq = 0u64;

    while offset + RECORD_HEADER_SIZE <= data.len() {
        let packed = u64::from_le_bytes(
            data[offset..offset + RECORD_HEADER_SIZE]
                .try_into()
                .unwrap_or([0; 8]),
        );
        let (seq, type_code, payload_len) = unpack_header(packed);
        if type_code == 0
            || (RecordType::from_code(type_code).is_none() && type_code < USER_TYPE_BASE)
        {
            break;
        }
        let total = RECORD_HEADER_SIZE + payload_len as usize + crc_len;
        if offset + total > data.len() {
            break; // torn final record
        }
        last_seq = seq;
        offset += total;
    }

    (offset, last_seq)
}

/// A streaming reader over a single WAL file.
///
/// Implements `Iterator<Item = Result<WalRecord, WalError>>`. Reaching
/// the logical end of the log yields `None`; it is never an error.
pub struct WalReader {
    map: Option<memmap2::Mmap>,
    path: PathBuf,
    offset: usize,
    crc: bool,
    /// Total bytes consumed, including headers and CRC trailers.
    bytes_read: u64,
    done: bool,
}

impl WalReader {
    /// Opens the log at `path` for replay.
    ///
    /// `crc` must match the writer's configuration: it determines both
    /// record framing (trailer bytes) and whether checksums are
    /// verified.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] when the file cannot be opened or
    /// mapped. A missing file is an I/O error; an empty file opens
    /// successfully and yields no records.
    pub fn open<P: AsRef<Path>>(path: P, crc: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| WalError::Io {
            message: e.to_string(),
            path: Some(path.clone()),
        })?;
        let len = file
            .metadata()
            .map_err(|e| WalError::Io {
                message: e.to_string(),
                path: Some(path.clone()),
            })?
            .len();

        let map = if len == 0 {
            None
        } else {
            // SAFETY: single-writer pattern; the engine does not append
            // while a recovery reader walks the file.
            Some(unsafe {
                memmap2::Mmap::map(&file).map_err(|e| WalError::Io {
                    message: e.to_string(),
                    path: Some(path.clone()),
                })?
            })
        };

        Ok(WalReader {
            map,
            path,
            offset: 0,
            crc,
            bytes_read: 0,
            done: false,
        })
    }

    /// Verifies the integrity of the entire log by decoding every
    /// record (checking CRC32 trailers when `crc` is set). Returns the
    /// number of valid records.
    ///
    /// # Errors
    ///
    /// The first [`WalError::CorruptRecord`] (or other decode error)
    /// encountered, or [`WalError::Io`] when the file cannot be read.
    pub fn verify_integrity<P: AsRef<Path>>(path: P, crc: bool) -> Result<u64, WalError> {
        let mut reader = WalReader::open(path, crc)?;
        let mut records = 0u64;
        for item in reader.by_ref() {
            item?;
            records += 1;
        }
        Ok(records)
    }

    /// Total bytes consumed so far, headers and CRC trailers included.
    #[inline]
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// The path this reader was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decode_next(&mut self) -> Option<Result<WalRecord, WalError>> {
        let data: &[u8] = self.map.as_ref()?;
        let crc_len = if self.crc { RECORD_CRC_SIZE } else { 0 };

        if self.offset + RECORD_HEADER_SIZE > data.len() {
            return None;
        }
        let packed = u64::from_le_bytes(
            data[self.offset..self.offset + RECORD_HEADER_SIZE]
                .try_into()
                .unwrap_or([0; 8]),
        );
        let (sequence, type_code, payload_len) = unpack_header(packed);
        if type_code == 0
            || (RecordType::from_code(type_code).is_none() && type_code < USER_TYPE_BASE)
        {
            return None; // logical end of log (zero padding or garbage)
        }

        let payload_len = payload_len as usize;
        let total = RECORD_HEADER_SIZE + payload_len + crc_len;
        if self.offset + total > data.len() {
            return None; // torn final record: EOF, not error
        }

        let record_start = self.offset;
        let payload_start = record_start + RECORD_HEADER_SIZE;
        let payload = &data[payload_start..payload_start + payload_len];

        // Advance unconditionally so a corrupt record can be skipped.
        self.offset += total;
        self.bytes_read += total as u64;

        if self.crc {
            let stored = u32::from_le_bytes(
                data[payload_start + payload_len..payload_start + payload_len + RECORD_CRC_SIZE]
                    .try_into()
                    .unwrap_or([0; 4]),
            );
            let computed = crc32fast::hash(&data[record_start..payload_start + payload_len]);
            if stored != computed {
                return Some(Err(WalError::CorruptRecord {
                    sequence,
                    expected_crc: stored,
                    actual_crc: computed,
                }));
            }
        }

        let body = match RecordType::from_code(type_code) {
            Some(RecordType::Insert) => {
                if payload_len < INSERT_BODY_SIZE {
                    return Some(Err(WalError::TruncatedRecord {
                        offset: record_start,
                        payload_len,
                    }));
                }
                let header = InsertBody::decode(payload);
                let user_len = header.user_data_size as usize;
                let aux_len = header.aux_data_size as usize;
                if INSERT_BODY_SIZE + user_len + aux_len > payload_len {
                    return Some(Err(WalError::TruncatedRecord {
                        offset: record_start,
                        payload_len,
                    }));
                }
                let user_start = INSERT_BODY_SIZE;
                let aux_start = user_start + user_len;
                RecordBody::Insert {
                    header,
                    user_data: payload[user_start..user_start + user_len].to_vec(),
                    aux_data: payload[aux_start..aux_start + aux_len].to_vec(),
                }
            }
            Some(RecordType::Cancel | RecordType::Deactivate | RecordType::Activate) => {
                if payload_len < CANCEL_BODY_SIZE {
                    return Some(Err(WalError::TruncatedRecord {
                        offset: record_start,
                        payload_len,
                    }));
                }
                let body = CancelBody::decode(payload);
                match RecordType::from_code(type_code) {
                    Some(RecordType::Deactivate) => RecordBody::Deactivate(body),
                    Some(RecordType::Activate) => RecordBody::Activate(body),
                    _ => RecordBody::Cancel(body),
                }
            }
            Some(RecordType::Match) => {
                if payload_len < MATCH_BODY_SIZE {
                    return Some(Err(WalError::TruncatedRecord {
                        offset: record_start,
                        payload_len,
                    }));
                }
                RecordBody::Match(MatchBody::decode(payload))
            }
            Some(RecordType::Checkpoint) => RecordBody::Checkpoint,
            None => RecordBody::User {
                type_code,
                payload: payload.to_vec(),
            },
        };

        Some(Ok(WalRecord { sequence, body }))
    }
}

impl Iterator for WalReader {
    type Item = Result<WalRecord, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decode_next() {
            Some(item) => Some(item),
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl std::fmt::Debug for WalReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalReader")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("crc", &self.crc)
            .finish()
    }
}
