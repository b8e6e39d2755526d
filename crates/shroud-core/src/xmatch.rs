//! matched exchange request pairs
//!
//! when a buy and a sell request cross, the match engine records an Xmatch
//! carrying the agreed amount and rate plus a snapshot of both sides at
//! match time. the snapshots survive even after the live requests leave the
//! book.

use crate::xreq::{xcx_type, Xreq, XreqFlags};
use serde::{Deserialize, Serialize};

/// settlement state of a match
pub mod match_status {
    pub const MATCHED: u8 = 1;
    pub const ACCEPTED: u8 = 2;
    pub const PAID: u8 = 3;
    pub const SETTLED: u8 = 4;
    pub const UNPAID_EXPIRED: u8 = 5;
    pub const CANCELLED: u8 = 6;
}

/// one side of a match: the request as it stood when the match formed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Xmatchreq {
    pub xreqnum: u64,
    pub objid: [u8; 32],
    pub xcx_type: u8,
    pub base_asset: u64,
    pub quote_asset: u64,
    pub foreign_asset: String,
    pub min_amount: u128,
    pub max_amount: u128,
    pub net_rate_required: f64,
    pub wait_discount: f64,
    pub base_costs: f64,
    pub quote_costs: f64,
    pub consideration_required: u32,
    pub consideration_offered: u32,
    pub match_consideration: u32,
    pub pledge: u32,
    pub hold_time: u32,
    pub hold_time_required: u32,
    pub min_wait_time: u32,
    pub accept_time_required: u32,
    pub accept_time_offered: u32,
    pub payment_time: u32,
    pub confirmations: u32,
    pub flags: XreqFlags,
    pub foreign_address: String,
    /// disposition of the live request at query time
    pub disposition: u8,
    pub open_amount: u128,
}

impl Xmatchreq {
    pub fn is_buyer(&self) -> bool {
        xcx_type::is_buyer(self.xcx_type)
    }

    pub fn from_xreq(xreq: &Xreq) -> Self {
        Self {
            xreqnum: xreq.xreqnum,
            objid: xreq.objid,
            xcx_type: xreq.xcx_type,
            base_asset: xreq.base_asset,
            quote_asset: xreq.quote_asset,
            foreign_asset: xreq.foreign_asset.clone(),
            min_amount: xreq.min_amount,
            max_amount: xreq.max_amount,
            net_rate_required: xreq.net_rate_required,
            wait_discount: xreq.wait_discount,
            base_costs: xreq.base_costs,
            quote_costs: xreq.quote_costs,
            consideration_required: xreq.consideration_required,
            consideration_offered: xreq.consideration_offered,
            match_consideration: 0,
            pledge: xreq.pledge,
            hold_time: xreq.hold_time,
            hold_time_required: xreq.hold_time_required,
            min_wait_time: xreq.min_wait_time,
            accept_time_required: xreq.accept_time_required,
            accept_time_offered: xreq.accept_time_offered,
            payment_time: xreq.payment_time,
            confirmations: xreq.confirmations,
            flags: xreq.flags,
            foreign_address: xreq.foreign_address.clone(),
            disposition: 0,
            open_amount: xreq.open_amount,
        }
    }
}

/// a matched buy+sell pair subject to pledge, hold time and settlement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Xmatch {
    pub xmatchnum: u64,
    pub xcx_type: u8,
    pub status: u8,
    pub base_amount: u128,
    pub rate: f64,
    pub accept_time: u32,
    pub match_pledge: u32,
    pub next_deadline: u64,
    pub match_timestamp: u64,
    pub accept_timestamp: u64,
    pub final_timestamp: u64,
    pub amount_paid: u128,
    pub mining_amount: u128,
    /// whether the full request snapshots should accompany this match when
    /// it is streamed; lookups by match number send only request numbers
    pub have_xreqs: bool,
    pub xbuy: Xmatchreq,
    pub xsell: Xmatchreq,
}

impl Xmatch {
    /// the side with `xreqnum`, if either
    pub fn side(&self, xreqnum: u64) -> Option<&Xmatchreq> {
        if self.xbuy.xreqnum == xreqnum {
            Some(&self.xbuy)
        } else if self.xsell.xreqnum == xreqnum {
            Some(&self.xsell)
        } else {
            None
        }
    }

    /// the side opposite `xreqnum`, if `xreqnum` is one of the two
    pub fn counterparty(&self, xreqnum: u64) -> Option<&Xmatchreq> {
        if self.xbuy.xreqnum == xreqnum {
            Some(&self.xsell)
        } else if self.xsell.xreqnum == xreqnum {
            Some(&self.xbuy)
        } else {
            None
        }
    }
}
