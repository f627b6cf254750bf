//! WAL writer/reader tests: framing, CRC, resume, torn tails.

use matchbook_rs::{
    CancelBody, MatchBody, OrderFlags, OrderKind, OrderSlot, RecordBody, Side, Wal, WalConfig,
    WalError, WalReader,
};

fn wal_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("book.wal")
}

fn sample_slot(order_id: u64, price: u64, volume: u64) -> OrderSlot {
    let mut slot = OrderSlot::EMPTY;
    slot.order_id = order_id;
    slot.price = price;
    slot.volume = volume;
    slot.volume_remain = volume;
    slot.timestamp_ns = 1_700_000_000_000_000_000;
    slot.org = 1;
    slot.product = 0;
    slot.flags = OrderFlags::new(Side::Bid, OrderKind::Gtc);
    slot
}

fn cancel_body(order_id: u64) -> CancelBody {
    CancelBody {
        order_id,
        timestamp_ns: 2,
        slot_idx: 7,
        product: 0,
    }
}

#[test]
fn test_append_read_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    let mut wal = Wal::open(WalConfig::new(&path)).expect("open");
    assert_eq!(wal.next_sequence(), 1);
    assert_eq!(wal.last_sequence(), None);

    let seq1 = wal
        .append_insert(&sample_slot(1, 100, 10), b"user", b"auxdata")
        .expect("insert");
    let seq2 = wal.append_cancel(&cancel_body(1)).expect("cancel");
    let seq3 = wal
        .append_match(&MatchBody {
            maker_id: 2,
            taker_id: 3,
            price: 101,
            volume: 3,
            timestamp_ns: 9,
            product: 0,
        })
        .expect("match");
    assert_eq!((seq1, seq2, seq3), (1, 2, 3));
    assert_eq!(wal.last_sequence(), Some(3));
    wal.close().expect("close");

    let records: Vec<_> = WalReader::open(&path, true)
        .expect("reader")
        .collect::<Result<_, _>>()
        .expect("no errors");
    assert_eq!(records.len(), 3);

    match &records[0].body {
        RecordBody::Insert {
            header,
            user_data,
            aux_data,
        } => {
            assert_eq!(header.order_id, 1);
            assert_eq!(header.price, 100);
            assert_eq!(header.volume_remain, 10);
            assert_eq!(user_data.as_slice(), b"user");
            assert_eq!(aux_data.as_slice(), b"auxdata");
        }
        other => panic!("expected insert, got {other:?}"),
    }
    assert!(matches!(
        records[1].body,
        RecordBody::Cancel(CancelBody { order_id: 1, .. })
    ));
    assert!(matches!(
        records[2].body,
        RecordBody::Match(MatchBody {
            maker_id: 2,
            taker_id: 3,
            price: 101,
            volume: 3,
            ..
        })
    ));
}

#[test]
fn test_reopen_resumes_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    {
        let mut wal = Wal::open(WalConfig::new(&path)).expect("open");
        for id in 1..=5 {
            wal.append_cancel(&cancel_body(id)).expect("append");
        }
        wal.close().expect("close");
    }

    // After open-append-close-reopen, the next sequence is last + 1.
    let mut wal = Wal::open(WalConfig::new(&path)).expect("reopen");
    assert_eq!(wal.next_sequence(), 6);
    wal.append_cancel(&cancel_body(6)).expect("append");
    wal.close().expect("close");

    let sequences: Vec<u64> = WalReader::open(&path, true)
        .expect("reader")
        .map(|r| r.expect("record").sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_flush_padding_is_skipped_on_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    let mut wal = Wal::open(WalConfig::new(&path)).expect("open");
    wal.append_cancel(&cancel_body(1)).expect("append");
    wal.flush().expect("flush");
    wal.close().expect("close");

    // The file on disk is a 4 KiB multiple, zero padded.
    let len = std::fs::metadata(&path).expect("metadata").len();
    assert_eq!(len % 4096, 0);
    assert!(len > 0);

    let records: Vec<_> = WalReader::open(&path, true)
        .expect("reader")
        .collect::<Result<_, _>>()
        .expect("no errors");
    assert_eq!(records.len(), 1);
}

#[test]
fn test_crc_mismatch_reported_at_corrupt_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    {
        let mut wal = Wal::open(WalConfig::new(&path)).expect("open");
        for id in 1..=5 {
            wal.append_cancel(&cancel_body(id)).expect("append");
        }
        wal.close().expect("close");
    }

    // Flip one payload byte of the third record.
    let mut data = std::fs::read(&path).expect("read file");
    let record_len = 8 + 24 + 4; // header + cancel body + crc
    let offset = 2 * record_len + 8 + 3; // third record, inside payload
    data[offset] ^= 0xFF;
    std::fs::write(&path, &data).expect("write file");

    let results: Vec<_> = WalReader::open(&path, true).expect("reader").collect();
    assert_eq!(results.len(), 5);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    match &results[2] {
        Err(WalError::CorruptRecord { sequence, .. }) => assert_eq!(*sequence, 3),
        other => panic!("expected CRC mismatch, got {other:?}"),
    }
    // The reader can keep going past the bad record.
    assert!(results[3].is_ok());
    assert!(results[4].is_ok());
}

#[test]
fn test_truncated_tail_is_eof_not_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    {
        let mut wal = Wal::open(WalConfig::new(&path)).expect("open");
        for id in 1..=3 {
            wal.append_cancel(&cancel_body(id)).expect("append");
        }
        wal.close().expect("close");
    }

    // Chop the file mid-record.
    let data = std::fs::read(&path).expect("read");
    let record_len = 8 + 24 + 4;
    std::fs::write(&path, &data[..2 * record_len + 10]).expect("truncate");

    let results: Vec<_> = WalReader::open(&path, true).expect("reader").collect();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));

    // Reopen for append: the torn tail is dropped, sequence resumes.
    let wal = Wal::open(WalConfig::new(&path)).expect("reopen");
    assert_eq!(wal.next_sequence(), 3);
}

#[test]
fn test_without_crc_framing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    {
        let mut wal = Wal::open(WalConfig::new(&path).without_crc()).expect("open");
        assert!(!wal.crc_enabled());
        wal.append_insert(&sample_slot(1, 100, 10), &[], &[])
            .expect("insert");
        wal.append_cancel(&cancel_body(1)).expect("cancel");
        wal.close().expect("close");
    }

    let records: Vec<_> = WalReader::open(&path, false)
        .expect("reader")
        .collect::<Result<_, _>>()
        .expect("no errors");
    assert_eq!(records.len(), 2);

    // Reopen honors the no-CRC framing too.
    let wal = Wal::open(WalConfig::new(&path).without_crc()).expect("reopen");
    assert_eq!(wal.next_sequence(), 3);
}

#[test]
fn test_user_records_roundtrip_and_range_check() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    let mut wal = Wal::open(WalConfig::new(&path)).expect("open");
    wal.append_user(0x80, b"hello").expect("user record");
    wal.append_user(0xFF, &[]).expect("user record");
    let err = wal.append_user(0x10, b"nope").expect_err("below user base");
    assert!(matches!(err, WalError::InvalidRecordType { type_code: 0x10, .. }));
    wal.close().expect("close");

    let records: Vec<_> = WalReader::open(&path, true)
        .expect("reader")
        .collect::<Result<_, _>>()
        .expect("no errors");
    assert_eq!(records.len(), 2);
    match &records[0].body {
        RecordBody::User { type_code, payload } => {
            assert_eq!(*type_code, 0x80);
            assert_eq!(payload.as_slice(), b"hello");
        }
        other => panic!("expected user record, got {other:?}"),
    }
}

#[test]
fn test_payload_too_large_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    let mut wal = Wal::open(WalConfig::new(&path)).expect("open");
    let huge = vec![0u8; 70_000];
    let err = wal.append_user(0x80, &huge).expect_err("too large");
    assert!(matches!(err, WalError::PayloadTooLarge { .. }));

    let slot = sample_slot(1, 1, 1);
    let err = wal
        .append_insert(&slot, &huge, &[])
        .expect_err("insert too large");
    assert!(matches!(err, WalError::PayloadTooLarge { .. }));
    wal.close().expect("close");
}

#[test]
fn test_checkpoint_flushes_and_is_replayable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    let mut wal = Wal::open(WalConfig::new(&path)).expect("open");
    wal.append_cancel(&cancel_body(1)).expect("cancel");
    wal.append_checkpoint().expect("checkpoint");

    // Durable without close: a reader sees both records already.
    let records: Vec<_> = WalReader::open(&path, true)
        .expect("reader")
        .collect::<Result<_, _>>()
        .expect("no errors");
    assert_eq!(records.len(), 2);
    assert!(matches!(records[1].body, RecordBody::Checkpoint));
    wal.close().expect("close");
}

#[test]
fn test_verify_integrity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);

    {
        let mut wal = Wal::open(WalConfig::new(&path)).expect("open");
        for id in 1..=4 {
            wal.append_cancel(&cancel_body(id)).expect("append");
        }
        wal.close().expect("close");
    }
    assert_eq!(WalReader::verify_integrity(&path, true).expect("clean"), 4);

    // Corrupt one byte; verification reports the bad record.
    let mut data = std::fs::read(&path).expect("read");
    data[8 + 2] ^= 0xFF;
    std::fs::write(&path, &data).expect("write");
    let err = WalReader::verify_integrity(&path, true).expect_err("corrupt");
    assert!(matches!(err, WalError::CorruptRecord { sequence: 1, .. }));
}

#[test]
fn test_empty_file_yields_no_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = wal_path(&dir);
    std::fs::write(&path, b"").expect("create empty");

    let records: Vec<_> = WalReader::open(&path, true).expect("reader").collect();
    assert!(records.is_empty());
}
