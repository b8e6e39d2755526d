//! crosschain exchange requests
//!
//! an Xreq is an open order to trade the native asset against a foreign
//! asset. buy requests offer native and want foreign; sell requests the
//! reverse. naked requests carry no pledge, simple requests pledge a
//! percentage of the trade.

use serde::{Deserialize, Serialize};

/// matching types. buyers sit below sellers numerically so a matchable type
/// range is always one contiguous `(min, max)` pair.
pub mod xcx_type {
    pub const NAKED_BUY: u8 = 10;
    pub const SIMPLE_BUY: u8 = 11;
    pub const NAKED_SELL: u8 = 20;
    pub const SIMPLE_SELL: u8 = 21;
    pub const SIMPLE_TRADE: u8 = 31;

    pub fn is_buyer(t: u8) -> bool {
        t == NAKED_BUY || t == SIMPLE_BUY
    }

    pub fn is_seller(t: u8) -> bool {
        t == NAKED_SELL || t == SIMPLE_SELL
    }

    pub fn is_simple(t: u8) -> bool {
        t == SIMPLE_BUY || t == SIMPLE_SELL || t == SIMPLE_TRADE
    }

    pub fn is_naked(t: u8) -> bool {
        t == NAKED_BUY || t == NAKED_SELL
    }

    /// the contiguous range of types the other side of `t` can carry
    pub fn matching_range(t: u8) -> Option<(u8, u8)> {
        if is_buyer(t) {
            Some((NAKED_SELL, SIMPLE_SELL))
        } else if is_seller(t) {
            Some((NAKED_BUY, SIMPLE_BUY))
        } else {
            None
        }
    }
}

/// pledge percentage carried by simple requests
pub const XREQ_SIMPLE_PLEDGE: u32 = 50;
/// hold period of a simple request before it can expire
pub const XREQ_SIMPLE_HOLD_TIME: u32 = 7200;
/// minimum remaining life after the hold period
pub const XREQ_MIN_POSTHOLD_TIME: u32 = 600;

/// scan direction for rate-ordered selects: sellers want buyers at the
/// highest rate first, buyers want sellers at the lowest
pub fn rate_sign(select_buyers: bool) -> i32 {
    if select_buyers {
        -1
    } else {
        1
    }
}

pub fn default_payment_time(testnet: bool) -> u32 {
    if testnet {
        10 * 60
    } else {
        2 * 3600
    }
}

pub fn default_confirmations(testnet: bool) -> u32 {
    if testnet {
        2
    } else {
        6
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XreqFlags {
    pub auto_accept_matches: bool,
    pub add_immediately_to_blockchain: bool,
    pub no_minimum_after_first_match: bool,
    pub must_liquidate_crossing_minimum: bool,
    pub must_liquidate_below_minimum: bool,
    /// set once the request has entered the match book
    pub have_matching: bool,
}

/// an open exchange request as held in the match book
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Xreq {
    /// monotonic id assigned when the request enters the book; 0 before that
    pub xreqnum: u64,
    pub objid: [u8; 32],
    pub xcx_type: u8,
    pub base_asset: u64,
    pub quote_asset: u64,
    /// utf-8 tag of the off-chain asset
    pub foreign_asset: String,
    pub min_amount: u128,
    pub max_amount: u128,
    pub open_amount: u128,
    pub net_rate_required: f64,
    pub wait_discount: f64,
    pub base_costs: f64,
    pub quote_costs: f64,
    /// rate bound for new matches; also the decoded query starting rate
    pub open_rate_required: f64,
    /// rate of the best pending (not yet indelible) match, 0 when none
    pub pending_match_rate: f64,
    pub pending_match_amount: u128,
    pub pending_match_hold_time: u32,
    pub destination: [u8; 32],
    pub foreign_address: String,
    pub flags: XreqFlags,
    pub consideration_required: u32,
    pub consideration_offered: u32,
    pub pledge: u32,
    pub hold_time: u32,
    pub hold_time_required: u32,
    pub min_wait_time: u32,
    pub accept_time_required: u32,
    pub accept_time_offered: u32,
    pub payment_time: u32,
    pub confirmations: u32,
    pub expire_time: u64,
    /// blocktime of the block that added the request to the book
    pub blocktime: u64,
}

impl Xreq {
    pub fn is_buyer(&self) -> bool {
        xcx_type::is_buyer(self.xcx_type)
    }

    /// hash of the foreign asset tag, used to partition the rate index
    pub fn foreign_asset_hash(foreign_asset: &str) -> [u8; 8] {
        let hash = blake3::hash(foreign_asset.as_bytes());
        let mut out = [0u8; 8];
        out.copy_from_slice(&hash.as_bytes()[..8]);
        out
    }
}
