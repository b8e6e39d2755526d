//! wire message tags
//!
//! every request frame carries one of these tags. queries are read-only and
//! pay the query proof-of-work difficulty; transaction tags change state and
//! pay the higher tx difficulty (payments have their own).

pub const TX_QUERY_PARAMS: u32 = 0x7378_0101;
pub const TX_QUERY_ADDRESS: u32 = 0x7378_0102;
pub const TX_QUERY_INPUTS: u32 = 0x7378_0103;
pub const TX_QUERY_SERIAL: u32 = 0x7378_0104;
pub const TX_QUERY_XREQS: u32 = 0x7378_0105;
pub const TX_QUERY_XMATCH_OBJID: u32 = 0x7378_0106;
pub const TX_QUERY_XMATCH_REQNUM: u32 = 0x7378_0107;
pub const TX_QUERY_XMATCH_MATCHNUM: u32 = 0x7378_0108;
pub const TX_QUERY_XMINING_INFO: u32 = 0x7378_0109;

pub const TX: u32 = 0x7378_0201;
pub const MINT: u32 = 0x7378_0202;
pub const TX_XDOMAIN: u32 = 0x7378_0203;
pub const XCX_NAKED_BUY: u32 = 0x7378_0211;
pub const XCX_NAKED_SELL: u32 = 0x7378_0212;
pub const XCX_SIMPLE_BUY: u32 = 0x7378_0213;
pub const XCX_SIMPLE_SELL: u32 = 0x7378_0214;
pub const XCX_SIMPLE_TRADE: u32 = 0x7378_0215;
pub const XCX_PAYMENT: u32 = 0x7378_0216;

/// read-only query tags, excluding the params dump (which skips both the
/// proof of work and the clock check)
pub fn is_query(tag: u32) -> bool {
    matches!(
        tag,
        TX_QUERY_ADDRESS
            | TX_QUERY_INPUTS
            | TX_QUERY_SERIAL
            | TX_QUERY_XREQS
            | TX_QUERY_XMATCH_OBJID
            | TX_QUERY_XMATCH_REQNUM
            | TX_QUERY_XMATCH_MATCHNUM
            | TX_QUERY_XMINING_INFO
    )
}

/// state-changing object tags
pub fn is_tx(tag: u32) -> bool {
    matches!(
        tag,
        TX | MINT
            | TX_XDOMAIN
            | XCX_NAKED_BUY
            | XCX_NAKED_SELL
            | XCX_SIMPLE_BUY
            | XCX_SIMPLE_SELL
            | XCX_SIMPLE_TRADE
            | XCX_PAYMENT
    )
}

/// exchange-request tags validated on the exchange priority lane
pub fn is_xreq(tag: u32) -> bool {
    matches!(
        tag,
        XCX_NAKED_BUY | XCX_NAKED_SELL | XCX_SIMPLE_BUY | XCX_SIMPLE_SELL | XCX_SIMPLE_TRADE
    )
}

pub fn recognized(tag: u32) -> bool {
    tag == TX_QUERY_PARAMS || is_query(tag) || is_tx(tag)
}
