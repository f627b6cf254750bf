//! On-disk record layout for the write-ahead log.
//!
//! Little-endian throughout. Every record starts with an 8-byte packed
//! header:
//!
//! ```text
//! packed = seq(40 bits) << 24 | type(8 bits) << 16 | payload_len(16 bits)
//! ```
//!
//! followed by a type-specific payload and, when checksums are enabled,
//! a 4-byte CRC32 (IEEE polynomial) over header + payload. INSERT
//! payloads are zero-padded to an 8-byte multiple; a run of zero bytes
//! decodes to type 0 and terminates replay, which is how 4 KiB flush
//! padding at the end of the file is skipped.

use serde::{Deserialize, Serialize};

/// Size of the packed record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 8;

/// Size of the optional CRC32 trailer in bytes.
pub const RECORD_CRC_SIZE: usize = 4;

/// Largest encodable payload (16-bit length field).
pub const MAX_PAYLOAD: usize = 0xFFFF;

/// Largest assignable sequence number (40-bit field).
pub const MAX_SEQUENCE: u64 = (1 << 40) - 1;

/// First type code of the user-defined record range.
pub const USER_TYPE_BASE: u8 = 0x80;

/// Size of the fixed INSERT body header in bytes.
pub const INSERT_BODY_SIZE: usize = 56;

/// Size of the CANCEL / DEACTIVATE / ACTIVATE payload in bytes.
pub const CANCEL_BODY_SIZE: usize = 24;

/// Size of the MATCH payload in bytes.
pub const MATCH_BODY_SIZE: usize = 48;

/// Record type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    /// An order entered the book.
    Insert = 1,
    /// An order was cancelled.
    Cancel = 2,
    /// A trade executed between a maker and a taker.
    Match = 3,
    /// Reserved for future snapshot support.
    Checkpoint = 4,
    /// An order was suspended.
    Deactivate = 5,
    /// A suspended order was restored.
    Activate = 6,
}

impl RecordType {
    /// Decodes a known engine type code. User-range codes (`0x80..`)
    /// and invalid codes return `None`.
    #[inline]
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RecordType::Insert),
            2 => Some(RecordType::Cancel),
            3 => Some(RecordType::Match),
            4 => Some(RecordType::Checkpoint),
            5 => Some(RecordType::Deactivate),
            6 => Some(RecordType::Activate),
            _ => None,
        }
    }
}

/// Packs a record header. Caller guarantees the field ranges.
#[inline]
#[must_use]
pub fn pack_header(sequence: u64, type_code: u8, payload_len: u16) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE);
    (sequence << 24) | (u64::from(type_code) << 16) | u64::from(payload_len)
}

/// Unpacks a record header into `(sequence, type_code, payload_len)`.
#[inline]
#[must_use]
pub fn unpack_header(packed: u64) -> (u64, u8, u16) {
    (
        packed >> 24,
        ((packed >> 16) & 0xFF) as u8,
        (packed & 0xFFFF) as u16,
    )
}

/// Fixed body header of an INSERT record (56 bytes).
///
/// | offset | size | field            |
/// |--------|------|------------------|
/// | 0      | 8    | order_id         |
/// | 8      | 8    | price            |
/// | 16     | 8    | volume           |
/// | 24     | 8    | volume_remain    |
/// | 32     | 8    | timestamp_ns     |
/// | 40     | 2    | org              |
/// | 42     | 2    | product          |
/// | 44     | 2    | user_data_size   |
/// | 46     | 2    | aux_data_size    |
/// | 48     | 4    | flags            |
/// | 52     | 4    | reserved (zero)  |
///
/// `user_data_size` bytes of slot payload and `aux_data_size` bytes of
/// slab-B payload follow immediately after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertBody {
    /// Order identifier.
    pub order_id: u64,
    /// Limit price.
    pub price: u64,
    /// Original volume.
    pub volume: u64,
    /// Remaining volume at the time the record was written.
    pub volume_remain: u64,
    /// Nanosecond timestamp of the insert.
    pub timestamp_ns: u64,
    /// Owning organization.
    pub org: u16,
    /// Product id.
    pub product: u16,
    /// Bytes of trailing user payload.
    pub user_data_size: u16,
    /// Bytes of trailing auxiliary payload.
    pub aux_data_size: u16,
    /// Packed order flags.
    pub flags: u32,
}

impl InsertBody {
    /// Encodes the body header into `out` (must be exactly
    /// [`INSERT_BODY_SIZE`] bytes).
    pub fn encode_into(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), INSERT_BODY_SIZE);
        out[0..8].copy_from_slice(&self.order_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.price.to_le_bytes());
        out[16..24].copy_from_slice(&self.volume.to_le_bytes());
        out[24..32].copy_from_slice(&self.volume_remain.to_le_bytes());
        out[32..40].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out[40..42].copy_from_slice(&self.org.to_le_bytes());
        out[42..44].copy_from_slice(&self.product.to_le_bytes());
        out[44..46].copy_from_slice(&self.user_data_size.to_le_bytes());
        out[46..48].copy_from_slice(&self.aux_data_size.to_le_bytes());
        out[48..52].copy_from_slice(&self.flags.to_le_bytes());
        out[52..56].fill(0);
    }

    /// Decodes a body header from `data` (at least [`INSERT_BODY_SIZE`]
    /// bytes).
    #[must_use]
    pub fn decode(data: &[u8]) -> Self {
        debug_assert!(data.len() >= INSERT_BODY_SIZE);
        InsertBody {
            order_id: read_u64(data, 0),
            price: read_u64(data, 8),
            volume: read_u64(data, 16),
            volume_remain: read_u64(data, 24),
            timestamp_ns: read_u64(data, 32),
            org: read_u16(data, 40),
            product: read_u16(data, 42),
            user_data_size: read_u16(data, 44),
            aux_data_size: read_u16(data, 46),
            flags: read_u32(data, 48),
        }
    }
}

/// Payload of CANCEL, DEACTIVATE and ACTIVATE records (24 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBody {
    /// Order identifier.
    pub order_id: u64,
    /// Nanosecond timestamp of the operation.
    pub timestamp_ns: u64,
    /// Slab index the order occupied when the record was written.
    pub slot_idx: u32,
    /// Product id.
    pub product: u16,
}

impl CancelBody {
    /// Encodes the payload into `out` (exactly [`CANCEL_BODY_SIZE`]
    /// bytes).
    pub fn encode_into(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), CANCEL_BODY_SIZE);
        out[0..8].copy_from_slice(&self.order_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out[16..20].copy_from_slice(&self.slot_idx.to_le_bytes());
        out[20..22].copy_from_slice(&self.product.to_le_bytes());
        out[22..24].fill(0);
    }

    /// Decodes the payload from `data`.
    #[must_use]
    pub fn decode(data: &[u8]) -> Self {
        debug_assert!(data.len() >= CANCEL_BODY_SIZE);
        CancelBody {
            order_id: read_u64(data, 0),
            timestamp_ns: read_u64(data, 8),
            slot_idx: read_u32(data, 16),
            product: read_u16(data, 20),
        }
    }
}

/// Payload of MATCH records (48 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchBody {
    /// Resting (maker) order id.
    pub maker_id: u64,
    /// Aggressing (taker) order id.
    pub taker_id: u64,
    /// Execution price (the maker's price).
    pub price: u64,
    /// Executed volume.
    pub volume: u64,
    /// Nanosecond timestamp of the fill.
    pub timestamp_ns: u64,
    /// Product id.
    pub product: u16,
}

impl MatchBody {
    /// Encodes the payload into `out` (exactly [`MATCH_BODY_SIZE`]
    /// bytes).
    pub fn encode_into(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), MATCH_BODY_SIZE);
        out[0..8].copy_from_slice(&self.maker_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.taker_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.price.to_le_bytes());
        out[24..32].copy_from_slice(&self.volume.to_le_bytes());
        out[32..40].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out[40..42].copy_from_slice(&self.product.to_le_bytes());
        out[42..48].fill(0);
    }

    /// Decodes the payload from `data`.
    #[must_use]
    pub fn decode(data: &[u8]) -> Self {
        debug_assert!(data.len() >= MATCH_BODY_SIZE);
        MatchBody {
            maker_id: read_u64(data, 0),
            taker_id: read_u64(data, 8),
            price: read_u64(data, 16),
            volume: read_u64(data, 24),
            timestamp_ns: read_u64(data, 32),
            product: read_u16(data, 40),
        }
    }
}

/// A decoded record as yielded by the reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    /// The sequence number from the packed header.
    pub sequence: u64,
    /// The decoded payload.
    pub body: RecordBody,
}

/// The type-specific payload of a [`WalRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordBody {
    /// An order entered the book, with its trailing payloads.
    Insert {
        /// The fixed body header.
        header: InsertBody,
        /// Inline user payload (slab A).
        user_data: Vec<u8>,
        /// Auxiliary payload (slab B).
        aux_data: Vec<u8>,
    },
    /// An order was cancelled.
    Cancel(CancelBody),
    /// A trade executed.
    Match(MatchBody),
    /// Reserved checkpoint marker.
    Checkpoint,
    /// An order was suspended.
    Deactivate(CancelBody),
    /// A suspended order was restored.
    Activate(CancelBody),
    /// A user-defined record; replay dispatches it to the registered
    /// handler.
    User {
        /// The raw type code (`0x80..=0xFF`).
        type_code: u8,
        /// The opaque payload bytes.
        payload: Vec<u8>,
    },
}

#[inline]
fn read_u64(data: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(data[off..off + 8].try_into().unwrap_or([0; 8]))
}

#[inline]
fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(data[off..off + 4].try_into().unwrap_or([0; 4]))
}

#[inline]
fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(data[off..off + 2].try_into().unwrap_or([0; 2]))
}
