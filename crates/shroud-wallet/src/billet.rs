//! billet lifecycle
//!
//! a billet is one output the wallet owns. status walks
//!
//! ```text
//!               create_tx
//!                  │
//!                  ▼
//! PENDING ──clear──▶ {SENT | PREALLOCATED→ALLOCATED | CLEARED}
//!    │                          │
//!    │                          ▼
//!    │                       SPENT   (serial observed indelible)
//!    │
//!    └── ABANDONED / ERROR / VOID   (administrative)
//! ```
//!
//! every transition updates the totals index exactly once, so balances are
//! answered from totals without rescanning billets.

use crate::db::{WalletDb, WalletWriter};
use crate::totals::{add_balance, add_balances, total_type, NoWaitAmounts};
use crate::{Result, WalletError};
use serde::{Deserialize, Serialize};
use shroud_core::field::FieldElement;
use shroud_core::serialnum::compute_serialnum;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub mod bill_status {
    pub const VOID: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const ABANDONED: u8 = 2;
    pub const PENDING: u8 = 3;
    pub const PREALLOCATED: u8 = 4;
    pub const SENT: u8 = 5;
    pub const CLEARED: u8 = 6;
    pub const ALLOCATED: u8 = 7;
    pub const SPENT: u8 = 8;

    pub fn name(status: u8) -> &'static str {
        match status {
            VOID => "Void",
            ERROR => "Error",
            ABANDONED => "Abandoned",
            PENDING => "Pending",
            PREALLOCATED => "Preallocated",
            SENT => "Sent",
            CLEARED => "Cleared",
            ALLOCATED => "Allocated",
            SPENT => "Spent",
            _ => "INVALID",
        }
    }
}

pub mod bill_flags {
    /// receive bits; aligned with the totals track/watch bits
    pub const RECV_WATCH: u32 = 1 << 0;
    pub const RECV_TRACK: u32 = 1 << 1;
    pub const RECV_MASK: u32 = RECV_WATCH | RECV_TRACK;
    /// destination is trusted: pending amounts count toward the balance
    pub const TRUSTED: u32 = 1 << 4;
    /// change output back to ourselves; not counted as received
    pub const IS_CHANGE: u32 = 1 << 5;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Billet {
    pub id: u64,
    pub status: u8,
    pub flags: u32,
    /// wallet transaction that created this output
    pub create_tx: u64,
    pub dest_id: u64,
    pub blockchain: u64,
    pub address: [u8; 32],
    pub domain: u32,
    pub asset: u64,
    pub amount_fp: u64,
    pub amount: u128,
    pub delaytime: u32,
    pub commit_iv: [u8; 16],
    pub commitment: [u8; 32],
    pub commitnum: u64,
    pub serialnum: [u8; 32],
    pub spend_hashkey: [u8; 32],
    pub spend_tx_commitnum: u64,
}

/// reply of the node's serial-number query, one entry per serial
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialQueryStatus {
    Unspent,
    Pending,
    Spent { hashkey: [u8; 32], tx_commitnum: u64 },
}

/// the node query seam; the transact client implements this over the wire
pub trait TxQueryClient {
    fn query_serialnums(
        &self,
        blockchain: u64,
        serials: &[[u8; 32]],
    ) -> Result<Vec<SerialQueryStatus>>;
}

impl Billet {
    pub fn has_serialnum(&self) -> bool {
        Self::status_has_serialnum(self.status, self.flags)
    }

    pub fn status_has_serialnum(status: u8, flags: u32) -> bool {
        flags & bill_flags::RECV_TRACK != 0 && status >= bill_status::SENT
    }

    pub fn is_unspent(&self) -> bool {
        matches!(
            self.status,
            bill_status::SENT | bill_status::CLEARED | bill_status::ALLOCATED
        )
    }

    /// record a newly created pending billet. trusted spendable amounts
    /// start counting toward the balance immediately.
    pub fn record_pending(&self, w: &mut WalletWriter<'_>, no_wait: &NoWaitAmounts) -> Result<()> {
        if self.status != bill_status::PENDING {
            return Err(WalletError::InvalidTransition(self.status));
        }
        w.billet_insert(self)?;

        if self.flags & bill_flags::RECV_MASK != 0 && self.flags & bill_flags::TRUSTED != 0 {
            add_balances(
                w,
                total_type::PENDING_BIT,
                0,
                self.dest_id,
                self.asset,
                self.delaytime,
                self.blockchain,
                true,
                self.amount,
            )?;
            if self.delaytime == 0 {
                no_wait.add(self.amount, true, 0, false);
            }
        }
        Ok(())
    }

    /// the output became indelible at `commitnum`. must run inside one
    /// wallet write transaction.
    pub fn set_status_cleared(
        &mut self,
        w: &mut WalletWriter<'_>,
        commitnum: u64,
        monitor_secret: &[u8; 32],
        no_wait: &NoWaitAmounts,
        notify: &BilletNotify,
    ) -> Result<()> {
        let old_status = self.status;
        if !matches!(
            old_status,
            bill_status::PENDING
                | bill_status::PREALLOCATED
                | bill_status::ABANDONED
                | bill_status::VOID
                | bill_status::ERROR
        ) {
            return Err(WalletError::InvalidTransition(old_status));
        }
        tracing::trace!(
            "billet {} cleared at commitnum {commitnum}, was {}",
            self.id,
            bill_status::name(old_status)
        );

        self.status = if self.flags & bill_flags::RECV_MASK != bill_flags::RECV_MASK {
            bill_status::SENT
        } else if old_status == bill_status::PREALLOCATED {
            bill_status::ALLOCATED
        } else {
            bill_status::CLEARED
        };
        self.commitnum = commitnum;

        if self.has_serialnum() {
            let commitment = FieldElement::from_bytes(&self.commitment);
            self.serialnum = compute_serialnum(monitor_secret, &commitment, commitnum);

            if self.status == bill_status::CLEARED && self.delaytime == 0 {
                let pending = if self.flags & bill_flags::TRUSTED != 0 {
                    self.amount
                } else {
                    0
                };
                no_wait.add(pending, false, self.amount, false);
            }

            let recv = if self.flags & bill_flags::IS_CHANGE != 0 {
                0
            } else {
                total_type::RB_RECEIVED
            };
            let sent_tw = if self.status == bill_status::SENT {
                (self.flags & bill_flags::RECV_MASK) as u8
            } else {
                0
            };
            add_balances(
                w,
                recv | sent_tw,
                0,
                self.dest_id,
                self.asset,
                self.delaytime,
                self.blockchain,
                true,
                self.amount,
            )?;

            // a preallocated billet clears directly into the allocated set
            if self.status == bill_status::ALLOCATED {
                add_balances(
                    w,
                    total_type::ALLOCATED_BIT,
                    0,
                    self.dest_id,
                    self.asset,
                    self.delaytime,
                    self.blockchain,
                    true,
                    self.amount,
                )?;
            }

            if old_status == bill_status::PENDING
                && self.flags & bill_flags::RECV_MASK != 0
                && self.flags & bill_flags::TRUSTED != 0
            {
                add_balances(
                    w,
                    total_type::PENDING_BIT,
                    0,
                    self.dest_id,
                    self.asset,
                    self.delaytime,
                    self.blockchain,
                    false,
                    self.amount,
                )?;
            }
        }

        w.billet_insert(self)?;

        if self.amount != 0 && self.status >= bill_status::CLEARED {
            notify.notify_new_billet(true);
        }
        Ok(())
    }

    /// reserve a cleared billet as input to an outgoing transaction
    pub fn set_status_allocated(&mut self, w: &mut WalletWriter<'_>) -> Result<()> {
        if self.status != bill_status::CLEARED {
            return Err(WalletError::InvalidTransition(self.status));
        }
        self.status = bill_status::ALLOCATED;
        add_balances(
            w,
            total_type::ALLOCATED_BIT,
            0,
            self.dest_id,
            self.asset,
            self.delaytime,
            self.blockchain,
            true,
            self.amount,
        )?;
        w.billet_insert(self)
    }

    /// the billet's serial number was observed indelible: the output is
    /// spent. transactions that recorded a different spend of this billet
    /// are marked conflicted.
    pub fn set_status_spent(
        &mut self,
        w: &mut WalletWriter<'_>,
        hashkey: &[u8; 32],
        tx_commitnum: u64,
    ) -> Result<()> {
        if self.status == bill_status::SPENT {
            return Err(WalletError::InvalidTransition(self.status));
        }
        tracing::trace!(
            "billet {} spent, hashkey {}",
            self.id,
            hex_snip(hashkey)
        );

        if self.status == bill_status::ALLOCATED {
            add_balances(
                w,
                total_type::ALLOCATED_BIT,
                0,
                self.dest_id,
                self.asset,
                self.delaytime,
                self.blockchain,
                false,
                self.amount,
            )?;
        }

        self.status = bill_status::SPENT;
        self.spend_hashkey = *hashkey;
        self.spend_tx_commitnum = tx_commitnum;

        add_balances(
            w,
            0,
            0,
            self.dest_id,
            self.asset,
            self.delaytime,
            self.blockchain,
            false,
            self.amount,
        )?;

        w.billet_insert(self)?;

        for (tx_id, recorded_hashkey, recorded_commitnum) in w.billet_spends(self.id)? {
            let conflicted = recorded_hashkey != *hashkey
                || (recorded_commitnum != 0 && tx_commitnum != 0 && recorded_commitnum != tx_commitnum);
            if conflicted {
                tracing::info!("tx {tx_id} conflicts with observed spend of billet {}", self.id);
                w.tx_set_conflicted(tx_id);
            }
        }
        Ok(())
    }

    /// batch the billets' serials through the node. returns 1 if any input
    /// was already spent, else 2 if any is pending and `or_pending` is
    /// set, else 0.
    pub fn check_if_billets_spent(
        db: &WalletDb,
        txquery: &dyn TxQueryClient,
        billets: &[Billet],
        or_pending: bool,
    ) -> Result<i32> {
        assert!(!billets.is_empty() && billets.len() <= shroud_core::TX_MAXIN);

        let blockchain = billets[0].blockchain;
        let mut serials = Vec::with_capacity(billets.len());
        for billet in billets {
            if billet.blockchain != blockchain {
                return Err(WalletError::BlockchainMismatch);
            }
            serials.push(billet.serialnum);
        }

        let statuses = txquery.query_serialnums(blockchain, &serials)?;
        let mut result = 0;

        for (billet, status) in billets.iter().zip(statuses) {
            match status {
                SerialQueryStatus::Pending if or_pending && result == 0 => {
                    result = 2;
                }
                SerialQueryStatus::Spent {
                    hashkey,
                    tx_commitnum,
                } => {
                    let mut w = db.write();
                    let mut current = w
                        .billet(billet.id)?
                        .ok_or(WalletError::BilletNotFound(billet.id))?;
                    if current.status != bill_status::SPENT {
                        current.set_status_spent(&mut w, &hashkey, tx_commitnum)?;
                    }
                    w.commit()?;
                    result = 1;
                }
                _ => {}
            }
        }

        Ok(result)
    }

    /// walk every unspent billet and fold spends observed on the node into
    /// the wallet. returns the total unspent native amount.
    pub fn poll_unspent(db: &WalletDb, txquery: &dyn TxQueryClient) -> Result<u128> {
        tracing::trace!("polling unspent billets");
        let mut after = None;
        let mut total: u128 = 0;

        loop {
            let page = db.read().unspent_billets_after(after, 64)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some((last.amount, last.id));

            for billet in page {
                if !matches!(
                    billet.status,
                    bill_status::CLEARED | bill_status::ALLOCATED
                ) {
                    continue;
                }
                let spent =
                    Self::check_if_billets_spent(db, txquery, std::slice::from_ref(&billet), false)?;
                if spent == 0 && billet.asset == 0 {
                    total += billet.amount;
                }
            }
        }

        tracing::info!("unspent total {total}");
        Ok(total)
    }

    /// administrative rollback: release every allocation. with
    /// `reset_balance` the pending/allocated totals are zeroed and the
    /// balance rebuilt from cleared billets.
    pub fn reset_allocated(db: &WalletDb, reset_balance: bool) -> Result<u128> {
        tracing::info!("releasing allocated billets, reset_balance {reset_balance}");

        let mut w = db.write();
        let billets = w.billets_all()?;

        // pending/allocated addends are no longer meaningful once the
        // allocations are released; the balance itself only on request
        for (key, total) in w.totals_all()? {
            let zero = key.total_type & total_type::PA_BITS != 0
                || (reset_balance && key.total_type == 0);
            if zero && total != 0 {
                w.total_put(&key, 0);
            }
        }

        let mut total: u128 = 0;
        for mut billet in billets {
            match billet.status {
                bill_status::PREALLOCATED => {
                    billet.status = bill_status::PENDING;
                    w.billet_insert(&billet)?;
                }
                bill_status::ALLOCATED => {
                    billet.status = bill_status::CLEARED;
                    w.billet_insert(&billet)?;
                }
                _ => {}
            }

            if reset_balance && billet.status == bill_status::CLEARED {
                if billet.asset == 0 {
                    total += billet.amount;
                }
                // only the zeroed wallet-balance row is rebuilt
                add_balance(
                    &mut w,
                    total_type::DA_DESTINATION | total_type::RB_BALANCE,
                    0,
                    billet.asset,
                    0,
                    billet.blockchain,
                    true,
                    billet.amount,
                )?;
            }
        }

        w.commit()?;
        Ok(total)
    }
}

fn hex_snip(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(10);
    for b in bytes.iter().take(4) {
        s.push_str(&format!("{b:02x}"));
    }
    s.push_str("..");
    s
}

/// billet-available signal: transaction builders sleep here until a new
/// spendable billet clears
#[derive(Default)]
pub struct BilletNotify {
    count: Mutex<u64>,
    available: Condvar,
}

impl BilletNotify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available_count(&self) -> u64 {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn notify_new_billet(&self, increment: bool) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        if increment {
            *count += 1;
        }
        tracing::debug!("billet available count {}", *count);
        self.available.notify_all();
    }

    /// wait until the available count moves past `last_count` or the
    /// timeout passes. returns true when a new billet arrived.
    pub fn wait_new_billet(&self, last_count: u64, seconds: u32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(seconds as u64);
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count == last_count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .available
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            count = guard;
        }
        true
    }
}
