//! Buffered append-only WAL writer.
//!
//! Records accumulate in a 4 KiB-aligned in-memory buffer; the only
//! syscall on the hot path is the `write` issued by [`Wal::flush`] when
//! the buffer fills. Flushes always start at a 4 KiB-aligned file
//! offset and write a 4 KiB multiple: the unaligned tail of the buffer
//! is retained and its file range is rewritten by the next flush, so
//! zero padding only ever exists at the end of the file (where replay
//! treats it as end-of-log).
//!
//! There is no `fsync` on the hot path. Durability points are
//! [`Wal::sync`], [`Wal::append_checkpoint`], the caller-driven
//! [`Wal::maybe_sync`] timer, and [`Wal::close`].
//!
//! On open, a non-empty log is scanned from the start; the writer
//! resumes sequence numbering one past the highest valid record and
//! truncates any torn tail.

use super::error::WalError;
use super::reader::scan_valid;
use super::record::{
    CANCEL_BODY_SIZE, CancelBody, INSERT_BODY_SIZE, MATCH_BODY_SIZE, MAX_PAYLOAD, MAX_SEQUENCE,
    MatchBody, RECORD_CRC_SIZE, RECORD_HEADER_SIZE, RecordType, USER_TYPE_BASE, pack_header,
};
use crate::orderbook::types::OrderSlot;
use std::alloc::{self, Layout};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::{debug, warn};

/// Flush alignment in bytes. Also the direct-I/O block size.
pub const FLUSH_ALIGN: usize = 4096;

/// Default append buffer size (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Configuration for a [`Wal`] writer.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Path of the log file (created when absent).
    pub path: PathBuf,
    /// Append buffer size in bytes; rounded up to a 4 KiB multiple.
    pub buffer_size: usize,
    /// Append a CRC32 trailer to every record.
    pub crc: bool,
    /// Open the file with `O_DIRECT` (Linux only; ignored elsewhere).
    pub direct_io: bool,
    /// Minimum interval between [`Wal::maybe_sync`] fsyncs, in
    /// milliseconds. `None` disables the timer entirely.
    pub sync_interval_ms: Option<u64>,
}

impl WalConfig {
    /// Default configuration for the given path: 1 MiB buffer, CRC on,
    /// buffered I/O, no sync timer.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        WalConfig {
            path: path.as_ref().to_path_buf(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            crc: true,
            direct_io: false,
            sync_interval_ms: None,
        }
    }

    /// Disables the CRC32 trailer.
    #[must_use]
    pub fn without_crc(mut self) -> Self {
        self.crc = false;
        self
    }

    /// Enables direct I/O.
    #[must_use]
    pub fn with_direct_io(mut self) -> Self {
        self.direct_io = true;
        self
    }

    /// Sets the caller-driven sync interval.
    #[must_use]
    pub fn with_sync_interval_ms(mut self, interval: u64) -> Self {
        self.sync_interval_ms = Some(interval);
        self
    }
}

/// A heap buffer aligned to [`FLUSH_ALIGN`], as required by `O_DIRECT`.
struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
}

impl AlignedBuf {
    fn new(len: usize) -> Self {
        debug_assert!(len > 0 && len % FLUSH_ALIGN == 0);
        // Alignment and size are validated above; a null return means
        // allocation failure, which we surface as an OOM abort like Vec.
        let layout = Layout::from_size_align(len, FLUSH_ALIGN)
            .unwrap_or_else(|_| panic!("invalid WAL buffer layout"));
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        AlignedBuf { ptr, len }
    }

    #[inline]
    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the buffer's lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.len, FLUSH_ALIGN)
            .unwrap_or_else(|_| panic!("invalid WAL buffer layout"));
        // SAFETY: allocated with the same layout in new().
        unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
    }
}

// SAFETY: AlignedBuf is a plain owned byte region.
unsafe impl Send for AlignedBuf {}

/// The append-only write-ahead log writer.
///
/// Owned by the engine thread; all methods take `&mut self`. A failed
/// flush poisons the writer — every later append returns
/// [`WalError::Poisoned`] until the log is reopened.
pub struct Wal {
    file: File,
    path: PathBuf,
    buf: AlignedBuf,
    /// Bytes currently buffered (including a carried unaligned tail).
    used: usize,
    /// Aligned file offset the buffer will be written at.
    file_offset: u64,
    next_seq: u64,
    crc: bool,
    sync_interval_ns: Option<u64>,
    last_sync_ns: u64,
    poisoned: bool,
}

impl Wal {
    /// Opens or creates the log at `config.path`.
    ///
    /// A non-empty file is scanned from the start for the last valid
    /// record; sequence numbering resumes one past it and any torn
    /// bytes after it are truncated away.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] when the file cannot be opened, mapped
    /// or truncated.
    pub fn open(config: WalConfig) -> Result<Self, WalError> {
        let buffer_size = config.buffer_size.max(FLUSH_ALIGN).next_multiple_of(FLUSH_ALIGN);

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(target_os = "linux")]
        if config.direct_io {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_DIRECT);
        }
        let file = options.open(&config.path).map_err(|e| WalError::Io {
            message: e.to_string(),
            path: Some(config.path.clone()),
        })?;

        let file_len = file
            .metadata()
            .map_err(|e| WalError::Io {
                message: e.to_string(),
                path: Some(config.path.clone()),
            })?
            .len() as usize;

        let mut buf = AlignedBuf::new(buffer_size);
        let mut valid_len = 0usize;
        let mut last_seq = 0u64;

        if file_len > 0 {
            // Scan through a transient read-only map; structural
            // validity only, CRC verification belongs to replay.
            let scan_file = File::open(&config.path).map_err(|e| WalError::Io {
                message: e.to_string(),
                path: Some(config.path.clone()),
            })?;
            // SAFETY: single-writer pattern; nothing else mutates the
            // file while we scan it.
            let map = unsafe {
                memmap2::Mmap::map(&scan_file).map_err(|e| WalError::Io {
                    message: e.to_string(),
                    path: Some(config.path.clone()),
                })?
            };
            (valid_len, last_seq) = scan_valid(&map, config.crc);

            // Carry the unaligned tail of valid data into the buffer so
            // the next flush rewrites its block in full.
            let aligned = valid_len & !(FLUSH_ALIGN - 1);
            let tail = valid_len - aligned;
            if tail > 0 {
                buf.as_mut_slice()[..tail].copy_from_slice(&map[aligned..valid_len]);
            }
        }

        // Drop any torn or padded bytes past the last valid record.
        if valid_len != file_len {
            file.set_len(valid_len as u64).map_err(|e| WalError::Io {
                message: e.to_string(),
                path: Some(config.path.clone()),
            })?;
        }

        let aligned = valid_len & !(FLUSH_ALIGN - 1);
        debug!(
            path = %config.path.display(),
            resumed_sequence = last_seq + 1,
            valid_bytes = valid_len,
            "WAL opened"
        );

        Ok(Wal {
            file,
            path: config.path,
            buf,
            used: valid_len - aligned,
            file_offset: aligned as u64,
            next_seq: last_seq + 1,
            crc: config.crc,
            sync_interval_ns: config.sync_interval_ms.map(|ms| ms * 1_000_000),
            last_sync_ns: 0,
            poisoned: false,
        })
    }

    /// The sequence number the next append will be assigned.
    #[inline]
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_seq
    }

    /// The sequence number of the last appended record, or `None` for
    /// an empty log.
    #[inline]
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        (self.next_seq > 1).then(|| self.next_seq - 1)
    }

    /// Whether CRC32 trailers are being written.
    #[inline]
    #[must_use]
    pub fn crc_enabled(&self) -> bool {
        self.crc
    }

    /// Appends an INSERT record for `slot` with its payloads.
    ///
    /// `user_data` comes from the slot's inline payload region,
    /// `aux_data` from slab B; both may be empty. The payload is
    /// zero-padded to an 8-byte multiple.
    ///
    /// # Errors
    ///
    /// [`WalError::PayloadTooLarge`] when the payloads exceed the
    /// 16-bit length field, [`WalError::Poisoned`] after a failed
    /// flush, or [`WalError::Io`] when the implied flush fails.
    pub fn append_insert(
        &mut self,
        slot: &OrderSlot,
        user_data: &[u8],
        aux_data: &[u8],
    ) -> Result<u64, WalError> {
        let raw_len = INSERT_BODY_SIZE + user_data.len() + aux_data.len();
        let payload_len = raw_len.next_multiple_of(8);
        if payload_len > MAX_PAYLOAD || user_data.len() > u16::MAX as usize {
            return Err(WalError::PayloadTooLarge {
                payload_bytes: raw_len,
                max_bytes: MAX_PAYLOAD,
            });
        }

        let body = super::record::InsertBody {
            order_id: slot.order_id,
            price: slot.price,
            volume: slot.volume,
            volume_remain: slot.volume_remain,
            timestamp_ns: slot.timestamp_ns,
            org: slot.org,
            product: slot.product,
            user_data_size: user_data.len() as u16,
            aux_data_size: aux_data.len() as u16,
            flags: slot.flags.bits(),
        };

        self.append_record(RecordType::Insert as u8, payload_len, |out| {
            body.encode_into(&mut out[..INSERT_BODY_SIZE]);
            let mut at = INSERT_BODY_SIZE;
            out[at..at + user_data.len()].copy_from_slice(user_data);
            at += user_data.len();
            out[at..at + aux_data.len()].copy_from_slice(aux_data);
            at += aux_data.len();
            out[at..].fill(0);
        })
    }

    /// Appends a CANCEL record.
    ///
    /// # Errors
    ///
    /// See [`Wal::append_insert`].
    pub fn append_cancel(&mut self, body: &CancelBody) -> Result<u64, WalError> {
        self.append_cancel_like(RecordType::Cancel as u8, body)
    }

    /// Appends a DEACTIVATE record (CANCEL layout).
    ///
    /// # Errors
    ///
    /// See [`Wal::append_insert`].
    pub fn append_deactivate(&mut self, body: &CancelBody) -> Result<u64, WalError> {
        self.append_cancel_like(RecordType::Deactivate as u8, body)
    }

    /// Appends an ACTIVATE record (CANCEL layout).
    ///
    /// # Errors
    ///
    /// See [`Wal::append_insert`].
    pub fn append_activate(&mut self, body: &CancelBody) -> Result<u64, WalError> {
        self.append_cancel_like(RecordType::Activate as u8, body)
    }

    fn append_cancel_like(&mut self, type_code: u8, body: &CancelBody) -> Result<u64, WalError> {
        self.append_record(type_code, CANCEL_BODY_SIZE, |out| body.encode_into(out))
    }

    /// Appends a MATCH record.
    ///
    /// # Errors
    ///
    /// See [`Wal::append_insert`].
    pub fn append_match(&mut self, body: &MatchBody) -> Result<u64, WalError> {
        self.append_record(RecordType::Match as u8, MATCH_BODY_SIZE, |out| {
            body.encode_into(out)
        })
    }

    /// Appends a CHECKPOINT marker and makes the log durable up to it
    /// (flush + fsync).
    ///
    /// # Errors
    ///
    /// See [`Wal::append_insert`]; additionally fails when the fsync
    /// fails.
    pub fn append_checkpoint(&mut self) -> Result<u64, WalError> {
        let seq = self.append_record(RecordType::Checkpoint as u8, 0, |_| {})?;
        self.sync(0)?;
        Ok(seq)
    }

    /// Appends a user-defined record with a type code in `0x80..=0xFF`.
    ///
    /// # Errors
    ///
    /// [`WalError::InvalidRecordType`] for codes below `0x80`; otherwise
    /// see [`Wal::append_insert`].
    pub fn append_user(&mut self, type_code: u8, payload: &[u8]) -> Result<u64, WalError> {
        if type_code < USER_TYPE_BASE {
            return Err(WalError::InvalidRecordType {
                offset: self.file_offset as usize + self.used,
                type_code,
            });
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(WalError::PayloadTooLarge {
                payload_bytes: payload.len(),
                max_bytes: MAX_PAYLOAD,
            });
        }
        self.append_record(type_code, payload.len(), |out| out.copy_from_slice(payload))
    }

    /// Shared append path: sizes the record, flushes when the buffer is
    /// full, writes the packed header, fills the payload, and appends
    /// the optional CRC trailer.
    fn append_record(
        &mut self,
        type_code: u8,
        payload_len: usize,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<u64, WalError> {
        if self.poisoned {
            return Err(WalError::Poisoned);
        }
        if payload_len > MAX_PAYLOAD {
            return Err(WalError::PayloadTooLarge {
                payload_bytes: payload_len,
                max_bytes: MAX_PAYLOAD,
            });
        }
        let total =
            RECORD_HEADER_SIZE + payload_len + if self.crc { RECORD_CRC_SIZE } else { 0 };
        if self.used + total > self.buf.len {
            self.flush()?;
            if self.used + total > self.buf.len {
                // A single record larger than the configured buffer.
                return Err(WalError::PayloadTooLarge {
                    payload_bytes: payload_len,
                    max_bytes: self.buf.len - RECORD_HEADER_SIZE - RECORD_CRC_SIZE,
                });
            }
        }

        let seq = self.next_seq;
        if seq > MAX_SEQUENCE {
            return Err(WalError::SequenceOverflow { sequence: seq });
        }

        let start = self.used;
        let buf = self.buf.as_mut_slice();
        buf[start..start + RECORD_HEADER_SIZE]
            .copy_from_slice(&pack_header(seq, type_code, payload_len as u16).to_le_bytes());
        fill(&mut buf[start + RECORD_HEADER_SIZE..start + RECORD_HEADER_SIZE + payload_len]);
        if self.crc {
            let crc_at = start + RECORD_HEADER_SIZE + payload_len;
            let crc = crc32fast::hash(&buf[start..crc_at]);
            buf[crc_at..crc_at + RECORD_CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        }

        self.used += total;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Writes the buffered records to the file in one `write`, padded
    /// to a 4 KiB multiple. The unaligned tail stays buffered and its
    /// block is rewritten by the next flush.
    ///
    /// # Errors
    ///
    /// [`WalError::Io`] on seek/write failure; the writer is poisoned
    /// afterwards.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.poisoned {
            return Err(WalError::Poisoned);
        }
        if self.used == 0 {
            return Ok(());
        }

        let write_len = self.used.next_multiple_of(FLUSH_ALIGN);
        self.buf.as_mut_slice()[self.used..write_len].fill(0);

        let result = self
            .file
            .seek(SeekFrom::Start(self.file_offset))
            .and_then(|_| self.file.write_all(&self.buf.as_slice()[..write_len]));
        if let Err(e) = result {
            self.poisoned = true;
            warn!(path = %self.path.display(), error = %e, "WAL flush failed; writer poisoned");
            return Err(WalError::Io {
                message: e.to_string(),
                path: Some(self.path.clone()),
            });
        }

        let consumed = self.used & !(FLUSH_ALIGN - 1);
        let tail = self.used - consumed;
        if tail > 0 {
            let buf = self.buf.as_mut_slice();
            buf.copy_within(consumed..consumed + tail, 0);
        }
        self.file_offset += consumed as u64;
        self.used = tail;
        Ok(())
    }

    /// Flushes and fsyncs. `now_ns` feeds the sync-interval timer.
    ///
    /// # Errors
    ///
    /// [`WalError::Io`] on flush or fsync failure.
    pub fn sync(&mut self, now_ns: u64) -> Result<(), WalError> {
        self.flush()?;
        self.file.sync_data().map_err(|e| {
            self.poisoned = true;
            WalError::Io {
                message: e.to_string(),
                path: Some(self.path.clone()),
            }
        })?;
        self.last_sync_ns = now_ns;
        Ok(())
    }

    /// Fsyncs when the configured `sync_interval_ms` has elapsed since
    /// the last sync. Call this from the engine loop with a cheap
    /// monotonic timestamp; it is a no-op when no interval is set.
    ///
    /// # Errors
    ///
    /// [`WalError::Io`] on flush or fsync failure.
    pub fn maybe_sync(&mut self, now_ns: u64) -> Result<(), WalError> {
        match self.sync_interval_ns {
            Some(interval) if now_ns.saturating_sub(self.last_sync_ns) >= interval => {
                self.sync(now_ns)
            }
            _ => Ok(()),
        }
    }

    /// Flushes, fsyncs and closes the log.
    ///
    /// # Errors
    ///
    /// [`WalError::Io`] when the final flush or fsync fails.
    pub fn close(mut self) -> Result<(), WalError> {
        self.flush()?;
        self.file.sync_all().map_err(|e| WalError::Io {
            message: e.to_string(),
            path: Some(self.path.clone()),
        })?;
        debug!(path = %self.path.display(), last_sequence = ?self.last_sequence(), "WAL closed");
        Ok(())
    }

    /// The path this writer was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("path", &self.path)
            .field("next_seq", &self.next_seq)
            .field("buffered", &self.used)
            .field("crc", &self.crc)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
