//! multi-axis totals index
//!
//! every total row is keyed by a bit-packed type plus (reference, asset,
//! delaytime, blockchain). the type packs four orthogonal axes:
//! destination-or-account, a pending and an allocated addend, balance-or-
//! received, and a track/watch split for received totals. balance queries
//! sum the enabled variants, counting allocated rows as subtractions.

use crate::db::{WalletReader, WalletWriter};
use crate::Result;
use std::sync::Mutex;

pub mod total_type {
    /// destination (0) or account (1)
    pub const DA_BIT: u8 = 1 << 5;
    pub const DA_DESTINATION: u8 = 0;
    pub const DA_ACCOUNT: u8 = DA_BIT;

    pub const PENDING_BIT: u8 = 1 << 4;
    pub const ALLOCATED_BIT: u8 = 1 << 3;
    pub const PA_BITS: u8 = PENDING_BIT | ALLOCATED_BIT;

    /// balance (0) or received (1)
    pub const RB_BIT: u8 = 1 << 2;
    pub const RB_BALANCE: u8 = 0;
    pub const RB_RECEIVED: u8 = RB_BIT;

    pub const TRACK_BIT: u8 = 1 << 1;
    pub const WATCH_BIT: u8 = 1 << 0;
    pub const TW_BITS: u8 = TRACK_BIT | WATCH_BIT;

    pub const MAX: u8 = DA_BIT | PENDING_BIT | RB_BALANCE | PA_BITS | TW_BITS;
}

/// identity of one total row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalKey {
    pub total_type: u8,
    pub reference: u64,
    pub asset: u64,
    pub delaytime: u32,
    pub blockchain: u64,
}

/// largest delaytime enumerated by balance queries
pub const DELAYTIME_MAX: u32 = 63;

/// fan one delta out to the wallet, account and destination rows.
/// `total_type` carries the received flag and any track/watch bits; the
/// pending/allocated addend bits pass through to the balance rows.
#[allow(clippy::too_many_arguments)]
pub fn add_balances(
    w: &mut WalletWriter<'_>,
    total_type: u8,
    account: u64,
    destination: u64,
    asset: u64,
    delaytime: u32,
    blockchain: u64,
    add: bool,
    amount: u128,
) -> Result<()> {
    if amount == 0 {
        return Ok(());
    }
    tracing::debug!(
        "add_balances type {total_type:#04x} account {account} destination {destination} \
         asset {asset} delaytime {delaytime} blockchain {blockchain} add {add} amount {amount}"
    );

    let base = total_type & !total_type::RB_RECEIVED;

    add_balance(
        w,
        base | total_type::DA_DESTINATION | total_type::RB_BALANCE,
        0,
        asset,
        delaytime,
        blockchain,
        add,
        amount,
    )?;
    add_balance(
        w,
        base | total_type::DA_ACCOUNT | total_type::RB_BALANCE,
        account,
        asset,
        delaytime,
        blockchain,
        add,
        amount,
    )?;

    if total_type & total_type::RB_RECEIVED != 0 {
        add_balance(
            w,
            total_type | total_type::DA_ACCOUNT,
            account,
            asset,
            delaytime,
            blockchain,
            add,
            amount,
        )?;

        let no_tw = total_type & !total_type::TW_BITS;
        add_balance(
            w,
            no_tw | total_type::DA_DESTINATION,
            0,
            asset,
            delaytime,
            blockchain,
            add,
            amount,
        )?;
        add_balance(
            w,
            no_tw | total_type::DA_DESTINATION,
            destination,
            asset,
            delaytime,
            blockchain,
            add,
            amount,
        )?;
    }

    Ok(())
}

/// apply one signed delta to one total row
#[allow(clippy::too_many_arguments)]
pub fn add_balance(
    w: &mut WalletWriter<'_>,
    total_type: u8,
    reference: u64,
    asset: u64,
    delaytime: u32,
    blockchain: u64,
    add: bool,
    amount: u128,
) -> Result<()> {
    if amount == 0 {
        return Ok(());
    }
    let key = TotalKey {
        total_type,
        reference,
        asset,
        delaytime,
        blockchain,
    };
    let current = w.total(&key)?;
    let delta = amount as i128;
    let updated = if add { current + delta } else { current - delta };
    w.total_put(&key, updated);
    Ok(())
}

/// sum a selected subset of totals. with `sum_pc` the pending and
/// allocated variants are folded in, allocated rows as subtractions; with
/// `incwatch` the track/watch variants are widened.
#[allow(clippy::too_many_arguments)]
pub fn get_total_balance(
    r: &WalletReader<'_>,
    total_type: u8,
    sum_pc: bool,
    incwatch: bool,
    reference: u64,
    asset: u64,
    min_delaytime: u32,
    max_delaytime: u32,
    min_blockchain: u64,
    max_blockchain: u64,
) -> Result<i128> {
    use total_type::*;

    let pa_variants: &[u8] = if !sum_pc {
        &[0]
    } else {
        match total_type & PA_BITS {
            0 => &[0, ALLOCATED_BIT, PENDING_BIT],
            PENDING_BIT => &[0, PENDING_BIT],
            ALLOCATED_BIT => &[0, ALLOCATED_BIT],
            _ => &[ALLOCATED_BIT, PENDING_BIT],
        }
    };
    let tw_variants: &[u8] = if !incwatch {
        &[0]
    } else {
        match total_type & TW_BITS {
            0 => &[0, WATCH_BIT, TRACK_BIT],
            TRACK_BIT => &[0, TRACK_BIT],
            WATCH_BIT => &[0, WATCH_BIT],
            _ => &[WATCH_BIT, TRACK_BIT],
        }
    };

    let base = if sum_pc {
        total_type & !PA_BITS
    } else {
        total_type
    };
    let base = if incwatch { base & !TW_BITS } else { base };

    let max_delaytime = max_delaytime.min(DELAYTIME_MAX);
    let mut balance: i128 = 0;

    for pa in pa_variants {
        for tw in tw_variants {
            let row_type = base | *pa | *tw;
            for delaytime in min_delaytime..=max_delaytime {
                for (key, total) in
                    r.totals_range(row_type, reference, asset, delaytime, min_blockchain, max_blockchain)?
                {
                    debug_assert_eq!(key.total_type, row_type);
                    if sum_pc && row_type & ALLOCATED_BIT != 0 {
                        balance -= total;
                    } else {
                        balance += total;
                    }
                }
            }
        }
    }

    Ok(balance)
}

/// reserved no-wait amount tracker: the amount of promptly spendable
/// billets pending versus the amount outgoing builders have reserved.
/// `required` is never allowed to exceed `pending`.
#[derive(Default)]
pub struct NoWaitAmounts {
    inner: Mutex<(u128, u128)>,
}

impl NoWaitAmounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// signed updates with saturation at zero. returns `true` when the
    /// required amount could not be raised because it would pass pending.
    pub fn add(
        &self,
        pending: u128,
        add_pending: bool,
        required: u128,
        add_required: bool,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut refused = false;

        if add_pending {
            inner.0 += pending;
        } else {
            inner.0 = inner.0.saturating_sub(pending);
        }

        if add_required {
            let newval = inner.1 + required;
            if newval <= inner.0 {
                inner.1 = newval;
            } else {
                refused = true;
            }
        } else {
            inner.1 = inner.1.saturating_sub(required);
        }

        tracing::debug!(
            "no-wait pending {} required {} refused {refused}",
            inner.0,
            inner.1
        );
        refused
    }

    /// shortfall outgoing builders still wait on
    pub fn net_required(&self) -> u128 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.1.saturating_sub(inner.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_wait_saturates_and_refuses() {
        let nw = NoWaitAmounts::new();
        assert_eq!(nw.net_required(), 0);

        // raising required above pending is refused
        assert!(nw.add(0, true, 100, true));
        assert_eq!(nw.net_required(), 0);

        // with pending available, required may rise
        assert!(!nw.add(150, true, 0, false));
        assert!(!nw.add(0, true, 100, true));
        assert_eq!(nw.net_required(), 0);

        // spending the pending leaves a shortfall
        assert!(!nw.add(150, false, 0, false));
        assert_eq!(nw.net_required(), 100);

        // subtraction saturates at zero
        assert!(!nw.add(1_000, false, 1_000, false));
        assert_eq!(nw.net_required(), 0);
    }
}
