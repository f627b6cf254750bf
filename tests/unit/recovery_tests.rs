//! Recovery tests: WAL replay reconstructs the book, stats are
//! accurate, corruption policy is honored.

use matchbook_rs::{
    BookConfig, NoopListener, OrderBook, OrderKind, OrderStatus, RecordBody, RecoverOptions, Side,
    SlabConfig, Wal, WalConfig, WalReader,
};

fn config() -> BookConfig {
    BookConfig {
        slab: SlabConfig {
            capacity: 1024,
            preallocate: false,
            user_data_size: 8,
            aux_data_size: 16,
        },
        max_products: 4,
        max_orgs: 8,
    }
}

fn logged_book(path: &std::path::Path) -> OrderBook {
    let wal = Wal::open(WalConfig::new(path)).expect("wal open");
    OrderBook::with_wal(config(), wal)
}

fn rest(book: &mut OrderBook, product: u16, id: u64, price: u64, volume: u64, side: Side, org: u16) {
    let idx = book
        .prepare_order(id, price, volume, side, OrderKind::Gtc, org, product)
        .expect("prepare");
    book.insert(product, idx).expect("insert");
}

/// Closes the book's WAL, flushing everything to disk.
fn close_wal(book: &mut OrderBook) {
    book.detach_wal().expect("wal attached").close().expect("close");
}

#[test]
fn test_match_scenario_wal_contents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("book.wal");
    let mut book = logged_book(&path);

    rest(&mut book, 0, 1, 100, 10, Side::Bid, 0);
    rest(&mut book, 0, 2, 101, 5, Side::Bid, 0);
    let outcome = book
        .submit_order(0, 3, 100, 3, Side::Ask, OrderKind::Limit, 1, &mut NoopListener)
        .expect("submit");
    assert_eq!(outcome.executed, 3);
    close_wal(&mut book);

    // INSERT(1), INSERT(2), MATCH(maker=2, taker=3, 101, 3); the taker
    // was fully consumed so no INSERT for it.
    let records: Vec<_> = WalReader::open(&path, true)
        .expect("reader")
        .collect::<Result<_, _>>()
        .expect("no errors");
    assert_eq!(records.len(), 3);
    match &records[0].body {
        RecordBody::Insert { header, .. } => assert_eq!(header.order_id, 1),
        other => panic!("expected INSERT, got {other:?}"),
    }
    match &records[1].body {
        RecordBody::Insert { header, .. } => assert_eq!(header.order_id, 2),
        other => panic!("expected INSERT, got {other:?}"),
    }
    match &records[2].body {
        RecordBody::Match(body) => {
            assert_eq!(body.maker_id, 2);
            assert_eq!(body.taker_id, 3);
            assert_eq!(body.price, 101);
            assert_eq!(body.volume, 3);
        }
        other => panic!("expected MATCH, got {other:?}"),
    }
}

#[test]
fn test_replay_reconstructs_book() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("book.wal");
    let mut book = logged_book(&path);

    // Payloads travel in the INSERT record, so they go in before insert.
    let idx = book
        .prepare_order(1, 100, 10, Side::Bid, OrderKind::Gtc, 0, 0)
        .expect("prepare");
    book.user_data_mut(idx).copy_from_slice(b"8bytes!!");
    book.insert(0, idx).expect("insert");
    rest(&mut book, 0, 2, 101, 5, Side::Bid, 1);
    rest(&mut book, 0, 3, 105, 7, Side::Ask, 2);
    rest(&mut book, 1, 4, 50, 3, Side::Bid, 0);

    // Partial fill of order 2, full fill of nothing else.
    let outcome = book
        .submit_order(0, 5, 101, 2, Side::Ask, OrderKind::Limit, 3, &mut NoopListener)
        .expect("submit");
    assert_eq!(outcome.executed, 2);

    assert!(book.cancel(4));
    assert!(book.deactivate(1));
    close_wal(&mut book);

    let mut recovered = OrderBook::new(config());
    let reader = WalReader::open(&path, true).expect("reader");
    let stats = recovered
        .recover_from_wal(reader, RecoverOptions::default())
        .expect("recover");

    assert_eq!(stats.inserts, 4);
    assert_eq!(stats.matches, 1);
    assert_eq!(stats.cancels, 1);
    assert_eq!(stats.deactivates, 1);
    assert_eq!(stats.integrity_errors, 0);
    assert!(stats.bytes > 0);
    assert!(stats.last_sequence >= 7);

    // Identical book shape.
    assert_eq!(recovered.best_bid(0), book.best_bid(0));
    assert_eq!(recovered.best_ask(0), book.best_ask(0));
    assert_eq!(recovered.best_bid(1), None);
    assert_eq!(
        recovered.volume_at_price(0, Side::Bid, 101),
        book.volume_at_price(0, Side::Bid, 101)
    );
    assert_eq!(recovered.volume_at_price(0, Side::Bid, 101), 3);
    assert_eq!(recovered.order_count(), book.order_count());

    // The deactivated order survives with its payload and status.
    let slot = recovered.get_slot_by_id(1).expect("deactivated slot");
    assert_eq!(slot.status(), OrderStatus::Deactivated);
    let idx = recovered.slot_index_of(1).expect("idx");
    assert_eq!(recovered.user_data(idx), b"8bytes!!");
}

#[test]
fn test_replay_match_zeroes_maker_without_cancel_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("book.wal");
    let mut book = logged_book(&path);

    rest(&mut book, 0, 1, 100, 3, Side::Bid, 0);
    let outcome = book
        .submit_order(0, 2, 100, 3, Side::Ask, OrderKind::Limit, 1, &mut NoopListener)
        .expect("submit");
    assert!(outcome.is_complete());
    close_wal(&mut book);

    let mut recovered = OrderBook::new(config());
    let stats = recovered
        .recover_from_wal(
            WalReader::open(&path, true).expect("reader"),
            RecoverOptions::default(),
        )
        .expect("recover");

    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.matches, 1);
    assert!(recovered.get_slot_by_id(1).is_none());
    assert_eq!(recovered.order_count(), 0);
    assert_eq!(recovered.slots_used(), 0);
}

#[test]
fn test_replay_activate_restores_resting_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("book.wal");
    let mut book = logged_book(&path);

    rest(&mut book, 0, 1, 100, 10, Side::Bid, 0);
    assert!(book.deactivate(1));
    assert!(book.activate(1));
    close_wal(&mut book);

    let mut recovered = OrderBook::new(config());
    let stats = recovered
        .recover_from_wal(
            WalReader::open(&path, true).expect("reader"),
            RecoverOptions::default(),
        )
        .expect("recover");

    assert_eq!(stats.deactivates, 1);
    assert_eq!(stats.activates, 1);
    assert_eq!(recovered.best_bid(0), Some(100));
    assert_eq!(
        recovered.get_slot_by_id(1).expect("slot").status(),
        OrderStatus::New
    );
}

#[test]
fn test_corruption_stop_vs_skip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("book.wal");
    let mut book = logged_book(&path);

    rest(&mut book, 0, 1, 100, 1, Side::Bid, 0);
    rest(&mut book, 0, 2, 101, 1, Side::Bid, 0);
    rest(&mut book, 0, 3, 102, 1, Side::Bid, 0);
    close_wal(&mut book);

    // Corrupt the second INSERT's payload.
    let mut data = std::fs::read(&path).expect("read");
    let insert_len = 8 + 56 + 8 + 16 + 4; // header + body + user + aux + crc
    data[insert_len + 8 + 4] ^= 0xFF;
    std::fs::write(&path, &data).expect("write");

    // Stop at the first mismatch: only order 1 is recovered.
    let mut strict = OrderBook::new(config());
    let stats = strict
        .recover_from_wal(
            WalReader::open(&path, true).expect("reader"),
            RecoverOptions {
                stop_on_corruption: true,
            },
        )
        .expect("recover");
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.integrity_errors, 1);
    assert_eq!(strict.order_count(), 1);

    // Skip mode recovers orders 1 and 3.
    let mut lenient = OrderBook::new(config());
    let stats = lenient
        .recover_from_wal(
            WalReader::open(&path, true).expect("reader"),
            RecoverOptions {
                stop_on_corruption: false,
            },
        )
        .expect("recover");
    assert_eq!(stats.inserts, 2);
    assert_eq!(stats.integrity_errors, 1);
    assert_eq!(lenient.order_count(), 2);
    assert!(lenient.get_slot_by_id(2).is_none());
    assert!(lenient.get_slot_by_id(3).is_some());
}

#[test]
fn test_user_records_dispatch_to_handler() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("book.wal");

    {
        let mut wal = Wal::open(WalConfig::new(&path)).expect("wal");
        wal.append_user(0x90, b"alpha").expect("user");
        wal.append_user(0x91, b"beta").expect("user");
        wal.close().expect("close");
    }

    let mut seen: Vec<(u8, Vec<u8>)> = Vec::new();
    let mut book = OrderBook::new(config());
    let stats = book
        .recover_from_wal_with(
            WalReader::open(&path, true).expect("reader"),
            RecoverOptions::default(),
            |code, payload| seen.push((code, payload.to_vec())),
        )
        .expect("recover");

    assert_eq!(stats.user_records, 2);
    assert_eq!(
        seen,
        vec![(0x90, b"alpha".to_vec()), (0x91, b"beta".to_vec())]
    );
}

#[test]
fn test_recovered_book_continues_logging() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("book.wal");

    {
        let mut book = logged_book(&path);
        rest(&mut book, 0, 1, 100, 10, Side::Bid, 0);
        close_wal(&mut book);
    }

    // Recover, reattach the same log, keep operating.
    let mut book = OrderBook::new(config());
    book.recover_from_wal(
        WalReader::open(&path, true).expect("reader"),
        RecoverOptions::default(),
    )
    .expect("recover");
    let wal = Wal::open(WalConfig::new(&path)).expect("reopen wal");
    assert_eq!(wal.next_sequence(), 2);
    book.attach_wal(wal);

    rest(&mut book, 0, 2, 101, 5, Side::Bid, 0);
    assert!(book.cancel(1));
    close_wal(&mut book);

    let mut recovered = OrderBook::new(config());
    recovered
        .recover_from_wal(
            WalReader::open(&path, true).expect("reader"),
            RecoverOptions::default(),
        )
        .expect("recover");
    assert_eq!(recovered.best_bid(0), Some(101));
    assert!(recovered.get_slot_by_id(1).is_none());
    assert_eq!(recovered.order_count(), 1);
}
