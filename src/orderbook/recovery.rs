//! Crash recovery: rebuild a book by replaying its write-ahead log.
//!
//! Replay applies records strictly in sequence order. INSERT allocates
//! and links a slot; CANCEL / DEACTIVATE / ACTIVATE re-run their book
//! operations (missing ids are ignored); MATCH decrements the maker
//! directly instead of re-running the matching engine, so recovery is
//! deterministic regardless of listener policy. WAL emission is
//! suppressed for the duration — replay never re-logs itself.

use super::book::OrderBook;
use super::error::OrderBookError;
use super::types::{OrderFlags, OrderStatus};
use super::wal::{RecordBody, WalError, WalReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Options controlling [`OrderBook::recover_from_wal`].
#[derive(Debug, Clone, Copy)]
pub struct RecoverOptions {
    /// Stop replay at the first integrity error (CRC mismatch or
    /// malformed record). When `false`, bad records are counted and
    /// skipped.
    pub stop_on_corruption: bool,
}

impl Default for RecoverOptions {
    fn default() -> Self {
        RecoverOptions {
            stop_on_corruption: true,
        }
    }
}

/// Per-type counters accumulated during replay.
///
/// `bytes` includes record headers and CRC trailers. `last_sequence`
/// is the highest sequence of a successfully applied record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// INSERT records applied.
    pub inserts: u64,
    /// CANCEL records applied.
    pub cancels: u64,
    /// MATCH records applied.
    pub matches: u64,
    /// DEACTIVATE records applied.
    pub deactivates: u64,
    /// ACTIVATE records applied.
    pub activates: u64,
    /// CHECKPOINT markers seen.
    pub checkpoints: u64,
    /// User-range records dispatched to the handler.
    pub user_records: u64,
    /// Integrity errors encountered (skipped or halted on, per
    /// [`RecoverOptions::stop_on_corruption`]).
    pub integrity_errors: u64,
    /// Total bytes consumed, headers and CRC trailers included.
    pub bytes: u64,
    /// Highest sequence number observed.
    pub last_sequence: u64,
}

impl OrderBook {
    /// Replays `reader` into this book with default options and no
    /// user-record handler.
    ///
    /// # Errors
    ///
    /// See [`recover_from_wal_with`](Self::recover_from_wal_with).
    pub fn recover_from_wal(
        &mut self,
        reader: WalReader,
        options: RecoverOptions,
    ) -> Result<RecoveryStats, OrderBookError> {
        self.recover_from_wal_with(reader, options, |type_code, _payload| {
            warn!(type_code, "unhandled user WAL record during recovery");
        })
    }

    /// Replays `reader` into this book, dispatching user-range records
    /// (`0x80..=0xFF`) to `user_handler`.
    ///
    /// Integrity errors (CRC mismatches, malformed records) are not
    /// `Err`s: they are counted in
    /// [`RecoveryStats::integrity_errors`] and either halt or skip per
    /// `options`. The accumulated stats are returned either way.
    ///
    /// # Errors
    ///
    /// Returns an error only when replay itself cannot proceed: slab
    /// exhaustion, range violations from a mismatched book
    /// configuration, or a duplicate id in the log.
    pub fn recover_from_wal_with<F>(
        &mut self,
        mut reader: WalReader,
        options: RecoverOptions,
        mut user_handler: F,
    ) -> Result<RecoveryStats, OrderBookError>
    where
        F: FnMut(u8, &[u8]),
    {
        // Replay must not re-log itself.
        let wal = self.wal.take();
        let result = self.replay(&mut reader, options, &mut user_handler);
        self.wal = wal;

        let stats = result?;
        debug!(
            inserts = stats.inserts,
            cancels = stats.cancels,
            matches = stats.matches,
            deactivates = stats.deactivates,
            activates = stats.activates,
            integrity_errors = stats.integrity_errors,
            bytes = stats.bytes,
            last_sequence = stats.last_sequence,
            "WAL recovery complete"
        );
        Ok(stats)
    }

    fn replay<F>(
        &mut self,
        reader: &mut WalReader,
        options: RecoverOptions,
        user_handler: &mut F,
    ) -> Result<RecoveryStats, OrderBookError>
    where
        F: FnMut(u8, &[u8]),
    {
        let mut stats = RecoveryStats::default();

        for item in reader.by_ref() {
            let record = match item {
                Ok(record) => record,
                Err(err @ (WalError::CorruptRecord { .. } | WalError::TruncatedRecord { .. })) => {
                    stats.integrity_errors += 1;
                    warn!(error = %err, "integrity error during WAL replay");
                    if options.stop_on_corruption {
                        break;
                    }
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            stats.last_sequence = stats.last_sequence.max(record.sequence);
            match record.body {
                RecordBody::Insert {
                    header,
                    user_data,
                    aux_data,
                } => {
                    let idx = self.slab.alloc()?;
                    {
                        let slot = self.slab.slot_mut(idx);
                        slot.order_id = header.order_id;
                        slot.price = header.price;
                        slot.volume = header.volume;
                        slot.volume_remain = header.volume_remain;
                        slot.timestamp_ns = header.timestamp_ns;
                        slot.org = header.org;
                        slot.product = header.product;
                        slot.flags = OrderFlags::from_bits(header.flags);
                    }
                    copy_clamped(self.slab.user_data_mut(idx), &user_data);
                    copy_clamped(self.slab.aux_data_mut(idx), &aux_data);
                    if let Err(e) = self.insert(header.product, idx) {
                        self.slab.free(idx);
                        return Err(e);
                    }
                    stats.inserts += 1;
                }
                RecordBody::Cancel(body) => {
                    self.cancel(body.order_id); // missing ids are ignored
                    stats.cancels += 1;
                }
                RecordBody::Match(body) => {
                    self.apply_match(body.maker_id, body.volume);
                    stats.matches += 1;
                }
                RecordBody::Deactivate(body) => {
                    self.deactivate(body.order_id);
                    stats.deactivates += 1;
                }
                RecordBody::Activate(body) => {
                    self.activate(body.order_id);
                    stats.activates += 1;
                }
                RecordBody::Checkpoint => {
                    stats.checkpoints += 1;
                }
                RecordBody::User { type_code, payload } => {
                    user_handler(type_code, &payload);
                    stats.user_records += 1;
                }
            }
        }

        stats.bytes = reader.bytes_read();
        Ok(stats)
    }

    /// Applies a replayed fill to the maker: decrement by at most the
    /// recorded volume, remove when it reaches zero.
    fn apply_match(&mut self, maker_id: u64, volume: u64) {
        let Some(loc) = self.order_index.get(&maker_id).copied() else {
            return;
        };
        let remain = {
            let slot = self.slab.slot_mut(loc.slot);
            let dec = slot.volume_remain.min(volume);
            slot.volume_remain -= dec;
            let status = if slot.volume_remain == 0 {
                OrderStatus::Filled
            } else {
                OrderStatus::Partial
            };
            slot.flags.set_status(status);
            slot.volume_remain
        };
        if remain == 0 {
            self.remove_resting(loc.product, loc.slot);
        }
    }
}

/// Copies as much of `src` as the destination region holds.
fn copy_clamped(dst: &mut [u8], src: &[u8]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}
