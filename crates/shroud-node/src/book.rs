//! match-book query semantics
//!
//! resolves a wire exchange-requests query into a rate-ordered store scan.
//! a buyer asks for sellers and walks rates upward from the requested
//! start; a seller asks for buyers and walks downward. paging by row offset
//! is deliberately bounded to one wire-rate bucket: the reply carries the
//! next representable rate in scan direction so clients page by rate, which
//! the store can do in logarithmic time, instead of by offset, which it
//! cannot.

use shroud_core::unifloat::{self, UNIFLOAT_WIRE_MAX};
use shroud_core::xreq::{self, xcx_type, Xreq};
use shroud_store::store::{StoreReader, XreqScan};
use crate::Result;

pub const FLAG_ONLY_PENDING_MATCHED: u8 = 1 << 0;
pub const FLAG_INCLUDE_PENDING_MATCHED: u8 = 1 << 1;

/// a parsed exchange-requests query, fields in wire order
#[derive(Debug, Clone)]
pub struct XreqsQuery {
    pub xcx_type: u8,
    pub min_amount: u128,
    pub max_amount: u128,
    pub rate_fp: u64,
    pub base_asset: u64,
    pub quote_asset: u64,
    pub maxret: u16,
    pub offset: u16,
    pub flags: u8,
    pub foreign_asset: String,
}

/// the query after direction and rate resolution
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub query: XreqsQuery,
    /// true when the querier is a seller scanning buyer requests
    pub select_buyers: bool,
    pub scan_sign: i32,
    pub type_min: u8,
    pub type_max: u8,
    /// exact starting rate requested
    pub open_rate_required: f64,
    /// next representable rate in scan direction; bounds offset paging
    pub matching_rate_required: f64,
    pub start_wire_rate: u64,
    pub only_pending_matched: bool,
    pub include_pending_matched: bool,
    /// echoed side-dependent terms
    pub pledge: u32,
    pub payment_time: u32,
    pub confirmations: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum QueryError {
    InvalidFlags,
    InvalidType,
}

/// apply the direction and rate rules to a parsed query
pub fn resolve(query: XreqsQuery, testnet: bool) -> std::result::Result<ResolvedQuery, QueryError> {
    let only_pending_matched = query.flags & FLAG_ONLY_PENDING_MATCHED != 0;
    let include_pending_matched = query.flags & FLAG_INCLUDE_PENDING_MATCHED != 0;
    let unknown = query.flags & !(FLAG_ONLY_PENDING_MATCHED | FLAG_INCLUDE_PENDING_MATCHED);
    if (only_pending_matched && include_pending_matched) || unknown != 0 {
        return Err(QueryError::InvalidFlags);
    }

    let select_buyers = !xcx_type::is_buyer(query.xcx_type);
    let (type_min, type_max) =
        xcx_type::matching_range(query.xcx_type).ok_or(QueryError::InvalidType)?;
    let scan_sign = xreq::rate_sign(select_buyers);

    let mut rate_fp = query.rate_fp;
    let mut open_rate_required = unifloat::wire_decode(rate_fp);

    // a zero rate on a descending scan means "start from the top"
    if open_rate_required == 0.0 && scan_sign < 0 {
        open_rate_required = f64::MAX;
        rate_fp = UNIFLOAT_WIRE_MAX;
    }

    let matching_rate_required = unifloat::wire_decode_step(rate_fp, scan_sign);

    let pledge = if xcx_type::is_simple(query.xcx_type) {
        xreq::XREQ_SIMPLE_PLEDGE
    } else {
        0
    };

    Ok(ResolvedQuery {
        select_buyers,
        scan_sign,
        type_min,
        type_max,
        open_rate_required,
        matching_rate_required,
        start_wire_rate: rate_fp,
        only_pending_matched,
        include_pending_matched,
        pledge,
        payment_time: xreq::default_payment_time(testnet),
        confirmations: xreq::default_confirmations(testnet),
        query,
    })
}

/// run the resolved query against one store snapshot
pub fn execute(reader: &StoreReader<'_>, resolved: &ResolvedQuery) -> Result<(Vec<Xreq>, bool)> {
    let scan = XreqScan {
        type_min: resolved.type_min,
        type_max: resolved.type_max,
        base_asset: resolved.query.base_asset,
        quote_asset: resolved.query.quote_asset,
        foreign_asset: resolved.query.foreign_asset.clone(),
        min_amount: resolved.query.min_amount,
        max_amount: resolved.query.max_amount,
        start_wire_rate: resolved.start_wire_rate as u32,
        descending: resolved.scan_sign < 0,
        offset: resolved.query.offset,
        maxret: resolved.query.maxret as usize,
        include_pending_matched: resolved.include_pending_matched,
    };

    let found = if resolved.only_pending_matched {
        reader.xreqs_select_pending_match_rate(&scan)?
    } else {
        reader.xreqs_select_open_rate(&scan)?
    };
    Ok(found)
}
