//! billet lifecycle and totals invariants

use shroud_core::field::FieldElement;
use shroud_core::serialnum::compute_serialnum;
use shroud_wallet::billet::{bill_flags, bill_status, Billet, BilletNotify, SerialQueryStatus, TxQueryClient};
use shroud_wallet::totals::{get_total_balance, total_type, NoWaitAmounts};
use shroud_wallet::{WalletDb, WalletError};
use std::collections::HashMap;
use std::sync::Arc;

const MONITOR_SECRET: [u8; 32] = [7u8; 32];

fn open_db() -> (tempfile::TempDir, WalletDb) {
    let dir = tempfile::tempdir().unwrap();
    let db = WalletDb::open(dir.path()).unwrap();
    (dir, db)
}

fn new_billet(id: u64, amount: u128, flags: u32) -> Billet {
    Billet {
        id,
        status: bill_status::PENDING,
        flags,
        create_tx: id,
        dest_id: 42,
        blockchain: 1,
        address: [id as u8; 32],
        commitment: [id as u8 ^ 0xff; 32],
        amount,
        ..Default::default()
    }
}

fn wallet_balance(db: &WalletDb) -> i128 {
    get_total_balance(
        &db.read(),
        total_type::DA_DESTINATION | total_type::RB_BALANCE,
        true,
        false,
        0,
        0,
        0,
        u32::MAX,
        0,
        u64::MAX,
    )
    .unwrap()
}

#[derive(Default)]
struct MapClient {
    statuses: HashMap<[u8; 32], SerialQueryStatus>,
}

impl TxQueryClient for MapClient {
    fn query_serialnums(
        &self,
        _blockchain: u64,
        serials: &[[u8; 32]],
    ) -> shroud_wallet::Result<Vec<SerialQueryStatus>> {
        Ok(serials
            .iter()
            .map(|s| {
                self.statuses
                    .get(s)
                    .cloned()
                    .unwrap_or(SerialQueryStatus::Unspent)
            })
            .collect())
    }
}

#[test]
fn balance_follows_the_lifecycle() {
    let (_dir, db) = open_db();
    let no_wait = NoWaitAmounts::new();
    let notify = BilletNotify::new();

    let mut billet = new_billet(1, 1000, bill_flags::RECV_MASK | bill_flags::TRUSTED);

    // pending to a trusted spendable destination counts toward the balance
    let mut w = db.write();
    billet.record_pending(&mut w, &no_wait).unwrap();
    w.commit().unwrap();
    assert_eq!(wallet_balance(&db), 1000);

    // clearing moves the amount from the pending row to the balance row
    let mut w = db.write();
    billet
        .set_status_cleared(&mut w, 5, &MONITOR_SECRET, &no_wait, &notify)
        .unwrap();
    w.commit().unwrap();
    assert_eq!(billet.status, bill_status::CLEARED);
    assert_eq!(billet.commitnum, 5);
    assert_eq!(wallet_balance(&db), 1000);

    let pending_row = db
        .read()
        .total(&shroud_wallet::totals::TotalKey {
            total_type: total_type::PENDING_BIT,
            reference: 0,
            asset: 0,
            delaytime: 0,
            blockchain: 1,
        })
        .unwrap();
    assert_eq!(pending_row, 0);

    // received totals track the destination
    let received = db
        .read()
        .total(&shroud_wallet::totals::TotalKey {
            total_type: total_type::RB_RECEIVED | total_type::DA_DESTINATION,
            reference: 42,
            asset: 0,
            delaytime: 0,
            blockchain: 1,
        })
        .unwrap();
    assert_eq!(received, 1000);

    // allocating reserves the amount out of the spendable balance
    let mut w = db.write();
    billet.set_status_allocated(&mut w).unwrap();
    w.commit().unwrap();
    assert_eq!(wallet_balance(&db), 0);

    // spending removes both the allocation and the balance
    let mut w = db.write();
    billet.set_status_spent(&mut w, &[9u8; 32], 77).unwrap();
    w.commit().unwrap();
    assert_eq!(billet.status, bill_status::SPENT);
    assert_eq!(wallet_balance(&db), 0);
}

#[test]
fn serialnum_derived_on_clear() {
    let (_dir, db) = open_db();
    let no_wait = NoWaitAmounts::new();
    let notify = BilletNotify::new();

    let mut billet = new_billet(1, 500, bill_flags::RECV_MASK | bill_flags::TRUSTED);
    let mut w = db.write();
    billet
        .set_status_cleared(&mut w, 9, &MONITOR_SECRET, &no_wait, &notify)
        .unwrap();
    w.commit().unwrap();

    let commitment = FieldElement::from_bytes(&billet.commitment);
    assert_eq!(
        billet.serialnum,
        compute_serialnum(&MONITOR_SECRET, &commitment, 9)
    );
}

#[test]
fn watch_only_money_stays_out_of_the_balance() {
    let (_dir, db) = open_db();
    let no_wait = NoWaitAmounts::new();
    let notify = BilletNotify::new();

    // track-only destination: not fully received, clears to SENT
    let mut billet = new_billet(1, 800, bill_flags::RECV_TRACK);
    let mut w = db.write();
    billet
        .set_status_cleared(&mut w, 1, &MONITOR_SECRET, &no_wait, &notify)
        .unwrap();
    w.commit().unwrap();
    assert_eq!(billet.status, bill_status::SENT);

    // excluded from the plain balance, visible when watch totals are in
    assert_eq!(wallet_balance(&db), 0);
    let with_watch = get_total_balance(
        &db.read(),
        total_type::DA_DESTINATION | total_type::RB_BALANCE,
        true,
        true,
        0,
        0,
        0,
        u32::MAX,
        0,
        u64::MAX,
    )
    .unwrap();
    assert_eq!(with_watch, 800);
}

#[test]
fn transitions_reject_replays() {
    let (_dir, db) = open_db();
    let no_wait = NoWaitAmounts::new();
    let notify = BilletNotify::new();

    let mut billet = new_billet(1, 100, bill_flags::RECV_MASK | bill_flags::TRUSTED);
    let mut w = db.write();
    billet
        .set_status_cleared(&mut w, 1, &MONITOR_SECRET, &no_wait, &notify)
        .unwrap();
    assert!(matches!(
        billet.set_status_cleared(&mut w, 1, &MONITOR_SECRET, &no_wait, &notify),
        Err(WalletError::InvalidTransition(_))
    ));

    billet.set_status_spent(&mut w, &[1u8; 32], 0).unwrap();
    assert!(matches!(
        billet.set_status_spent(&mut w, &[1u8; 32], 0),
        Err(WalletError::InvalidTransition(_))
    ));
    w.commit().unwrap();

    // the totals were applied exactly once despite the replays
    assert_eq!(wallet_balance(&db), 0);
}

#[test]
fn conflicting_spends_flag_their_transactions() {
    let (_dir, db) = open_db();
    let no_wait = NoWaitAmounts::new();
    let notify = BilletNotify::new();

    let mut billet = new_billet(1, 100, bill_flags::RECV_MASK | bill_flags::TRUSTED);
    let mut w = db.write();
    billet
        .set_status_cleared(&mut w, 1, &MONITOR_SECRET, &no_wait, &notify)
        .unwrap();

    // two wallet transactions both recorded a spend of this billet
    w.billet_spend_insert(1, 10, &[0xaa; 32], 50).unwrap();
    w.billet_spend_insert(1, 11, &[0xbb; 32], 60).unwrap();

    // the chain shows the spend carried tx 10's hashkey
    billet.set_status_spent(&mut w, &[0xaa; 32], 50).unwrap();
    w.commit().unwrap();

    let r = db.read();
    assert!(!r.tx_is_conflicted(10).unwrap());
    assert!(r.tx_is_conflicted(11).unwrap());
}

#[test]
fn poll_unspent_folds_in_observed_spends() {
    let (_dir, db) = open_db();
    let no_wait = NoWaitAmounts::new();
    let notify = BilletNotify::new();

    let mut spent_billet = new_billet(1, 300, bill_flags::RECV_MASK | bill_flags::TRUSTED);
    let mut kept_billet = new_billet(2, 700, bill_flags::RECV_MASK | bill_flags::TRUSTED);

    let mut w = db.write();
    spent_billet
        .set_status_cleared(&mut w, 1, &MONITOR_SECRET, &no_wait, &notify)
        .unwrap();
    kept_billet
        .set_status_cleared(&mut w, 2, &MONITOR_SECRET, &no_wait, &notify)
        .unwrap();
    w.commit().unwrap();

    let mut client = MapClient::default();
    client.statuses.insert(
        spent_billet.serialnum,
        SerialQueryStatus::Spent {
            hashkey: [3u8; 32],
            tx_commitnum: 9,
        },
    );

    let total = Billet::poll_unspent(&db, &client).unwrap();
    assert_eq!(total, 700);

    let reloaded = db.read().billet(1).unwrap().unwrap();
    assert_eq!(reloaded.status, bill_status::SPENT);
    assert_eq!(reloaded.spend_hashkey, [3u8; 32]);
    assert_eq!(wallet_balance(&db), 700);
}

#[test]
fn check_detects_pending_spends() {
    let (_dir, db) = open_db();
    let no_wait = NoWaitAmounts::new();
    let notify = BilletNotify::new();

    let mut billet = new_billet(1, 100, bill_flags::RECV_MASK | bill_flags::TRUSTED);
    let mut w = db.write();
    billet
        .set_status_cleared(&mut w, 1, &MONITOR_SECRET, &no_wait, &notify)
        .unwrap();
    w.commit().unwrap();

    let mut client = MapClient::default();
    client
        .statuses
        .insert(billet.serialnum, SerialQueryStatus::Pending);

    let billets = vec![billet];
    assert_eq!(
        Billet::check_if_billets_spent(&db, &client, &billets, true).unwrap(),
        2
    );
    assert_eq!(
        Billet::check_if_billets_spent(&db, &client, &billets, false).unwrap(),
        0
    );
}

#[test]
fn reset_allocated_releases_and_rebuilds() {
    let (_dir, db) = open_db();
    let no_wait = NoWaitAmounts::new();
    let notify = BilletNotify::new();

    let mut billet = new_billet(1, 400, bill_flags::RECV_MASK | bill_flags::TRUSTED);
    let mut w = db.write();
    billet
        .set_status_cleared(&mut w, 1, &MONITOR_SECRET, &no_wait, &notify)
        .unwrap();
    billet.set_status_allocated(&mut w).unwrap();
    w.commit().unwrap();
    assert_eq!(wallet_balance(&db), 0);

    let total = Billet::reset_allocated(&db, true).unwrap();
    assert_eq!(total, 400);

    let reloaded = db.read().billet(1).unwrap().unwrap();
    assert_eq!(reloaded.status, bill_status::CLEARED);
    assert_eq!(wallet_balance(&db), 400);
}

#[test]
fn billet_notify_wakes_waiters() {
    let notify = Arc::new(BilletNotify::new());
    let last = notify.available_count();

    // timeout path: nothing arrives
    assert!(!notify.wait_new_billet(last, 0));

    let waiter = {
        let notify = notify.clone();
        std::thread::spawn(move || notify.wait_new_billet(last, 30))
    };
    // give the waiter a chance to block, then signal
    std::thread::sleep(std::time::Duration::from_millis(20));
    notify.notify_new_billet(true);
    assert!(waiter.join().unwrap());
}
