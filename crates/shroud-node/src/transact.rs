//! transact wire server
//!
//! the port wallets reach through the anonymity network. requests are
//! length-prefixed binary frames carrying a proof of work; replies are
//! NUL-terminated text, either a status line (`OK:`, `INVALID:`, `ERROR:`,
//! `UNKNOWN:`, `Not Found`) or a JSON document for queries. one request per
//! connection; the server always closes after the reply.
//!
//! frame layout: `size:u32 | tag:u32 | timestamp:u64 | pow | body`, where
//! `size` counts the whole frame and the proof binds (tag, timestamp, body).

use crate::book::{self, XreqsQuery};
use crate::commitments::read_merkle_path;
use crate::service::TransactService;
use crate::validate::{self, Priority, TxValidator};
use crate::NodeContext;
use serde_json::{json, Map, Value};
use shroud_core::codec::{MsgHeader, Reader, MSG_HEADER_SIZE};
use shroud_core::field::FieldElement;
use shroud_core::timestamp::{
    timestamp_in_window, unixtime, TIMESTAMP_FUTURE_ALLOWANCE, TIMESTAMP_PAST_ALLOWANCE,
};
use shroud_core::xreq::{Xreq, XreqFlags, XREQ_MIN_POSTHOLD_TIME, XREQ_SIMPLE_HOLD_TIME};
use shroud_core::xmatch::{Xmatch, Xmatchreq};
use shroud_core::{pow, tags, MINT_ACCEPT_SPAN, MINT_COUNT, POW_SIZE};
use shroud_store::param_key;
use shroud_store::store::SerialStatus;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

pub const MAX_REQUEST_SIZE: usize = 64_000;
pub const MAX_REPLY_SIZE: usize = 64_000;

const QUERY_MAX_COMMITS: usize = 20;
const QUERY_MAX_XREQS: usize = 20;
const QUERY_MAX_MATCHES: usize = 8;

/// covers the whole connection excluding validation
const TRANSACT_TIMEOUT: Duration = Duration::from_secs(10);
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(20);

/// bytes read before the body: header, timestamp, proof nonces
const PREFIX_SIZE: usize = MSG_HEADER_SIZE + 8 + POW_SIZE;

/// accept loop; one task per connection
pub(crate) async fn serve(
    listener: TcpListener,
    ctx: Arc<NodeContext>,
    service: Arc<TransactService>,
    validator: Arc<TxValidator>,
) {
    let mut shutdown = ctx.chain.shutdown_signal();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            ctx.clone(),
                            service.clone(),
                            validator.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("transact accept failed: {e}");
                    }
                }
            }
        }
    }
    tracing::info!("transact service stopped");
}

/// what the read pipeline decided to do with the request
enum Step {
    Reply(String),
    /// nothing useful to say; just close
    Close,
    /// accepted tx-like object, hand to the validation queue
    Validate {
        priority: Priority,
        tag: u32,
        objid: [u8; 32],
        body: Vec<u8>,
    },
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<NodeContext>,
    service: Arc<TransactService>,
    validator: Arc<TxValidator>,
) {
    tracing::trace!("transact connection from {peer}");

    let step = match timeout(TRANSACT_TIMEOUT, read_request(&mut stream, &ctx, &service)).await {
        Ok(step) => step,
        Err(_) => Step::Close,
    };

    let reply = match step {
        Step::Close => None,
        Step::Reply(text) => Some(text),
        Step::Validate {
            priority,
            tag,
            objid,
            body,
        } => Some(run_validation(&ctx, &service, &validator, priority, tag, objid, body).await),
    };

    if let Some(text) = reply {
        send_reply(&mut stream, &text).await;
    }
}

/// enqueue the object and race its callback against the validation timer.
/// exactly one reply wins: the oneshot is consumed by whichever side fires
/// first, late results land on a dead receiver.
async fn run_validation(
    ctx: &NodeContext,
    service: &TransactService,
    validator: &TxValidator,
    priority: Priority,
    tag: u32,
    objid: [u8; 32],
    body: Vec<u8>,
) -> String {
    if !service.is_connected_to_net(ctx) {
        return "ERROR:server not connected".into();
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    match validator.enqueue_validate(priority, tag, objid, body, reply_tx) {
        validate::Enqueue::Failed(_) => "ERROR:server error".into(),
        validate::Enqueue::AlreadyValid => "OK:0".into(),
        validate::Enqueue::Queued => match timeout(VALIDATION_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) if result < 0 => validate::result_string(result).into(),
            Ok(Ok(result)) => format!("OK:{result}"),
            Ok(Err(_)) => "UNKNOWN:server error".into(),
            Err(_) => "UNKNOWN:server timeout".into(),
        },
    }
}

async fn read_request(
    stream: &mut TcpStream,
    ctx: &NodeContext,
    service: &TransactService,
) -> Step {
    let mut prefix = [0u8; PREFIX_SIZE];
    if stream.read_exact(&mut prefix).await.is_err() {
        return Step::Reply("ERROR:unexpected short read".into());
    }

    let header = match MsgHeader::parse(&prefix) {
        Ok(h) => h,
        Err(_) => return Step::Reply("ERROR:unexpected short read".into()),
    };
    let size = header.size as usize;
    let tag = header.tag;
    tracing::trace!("transact request size {size} tag {tag:#x}");

    if size < PREFIX_SIZE || size > MAX_REQUEST_SIZE {
        return Step::Reply("ERROR:message size field invalid".into());
    }
    if !tags::recognized(tag) {
        return Step::Reply("ERROR:unrecognized message type".into());
    }

    let timestamp = u64::from_le_bytes(prefix[8..16].try_into().unwrap());
    if tag != tags::TX_QUERY_PARAMS {
        let now = unixtime();
        if !timestamp_in_window(
            timestamp,
            TIMESTAMP_PAST_ALLOWANCE,
            TIMESTAMP_FUTURE_ALLOWANCE,
            now,
        ) {
            return Step::Reply(format!("ERROR:invalid timestamp:{now}"));
        }
    }

    let mut body = vec![0u8; size - PREFIX_SIZE];
    if stream.read_exact(&mut body).await.is_err() {
        return Step::Reply("ERROR:message size field does not match bytes received".into());
    }

    let difficulty = match tag {
        tags::TX_QUERY_PARAMS => 0,
        tags::XCX_PAYMENT => ctx.params.xcx_pay_work_difficulty,
        t if tags::is_query(t) => service.config.query_work_difficulty,
        _ => ctx.params.tx_work_difficulty,
    };
    let objid = pow::binding_hash(tag, timestamp, &body);
    if !pow::verify(&objid, &prefix[16..PREFIX_SIZE], difficulty) {
        return Step::Reply(format!("ERROR:proof of work failed:{difficulty}"));
    }

    if tags::is_tx(tag) {
        return preflight_tx(ctx, tag, objid, body);
    }

    Step::Reply(dispatch_query(ctx, service, tag, &body))
}

/// structural and mint-era checks on tx-like objects before enqueueing
fn preflight_tx(ctx: &NodeContext, tag: u32, objid: [u8; 32], body: Vec<u8>) -> Step {
    let summary = match validate::parse_tx_summary(&body) {
        Some(s) => s,
        None => return Step::Reply("ERROR:binary object not valid".into()),
    };
    let param_level = summary.param_level;

    if ctx.params.implement_mint {
        let block_level = ctx.chain.last_indelible_level();
        if tag == tags::MINT {
            let bad = param_level == 0
                || (param_level == 1 && block_level > MINT_ACCEPT_SPAN + 1)
                || (param_level > 1
                    && param_level.saturating_add(MINT_ACCEPT_SPAN + 1) < block_level)
                || param_level >= MINT_COUNT
                || param_level > block_level;
            if bad {
                tracing::info!(
                    "rejecting mint at param level {param_level}, blockchain level {block_level}"
                );
                return Step::Reply(
                    "INVALID:mint transaction not allowed, invalid or too old".into(),
                );
            }
        } else if param_level < MINT_COUNT + MINT_ACCEPT_SPAN {
            return Step::Reply("INVALID:non-mint transaction during mint".into());
        }
    } else if tag == tags::MINT && !ctx.params.is_testnet() {
        return Step::Reply("INVALID:mint transaction not allowed".into());
    }

    let priority = if tags::is_xreq(tag) {
        Priority::XreqHi
    } else {
        Priority::TxHi
    };
    Step::Validate {
        priority,
        tag,
        objid,
        body,
    }
}

fn dispatch_query(ctx: &NodeContext, service: &TransactService, tag: u32, body: &[u8]) -> String {
    match tag {
        tags::TX_QUERY_PARAMS => query_params(ctx, service),
        tags::TX_QUERY_ADDRESS => query_address(ctx, body),
        tags::TX_QUERY_INPUTS => query_inputs(ctx, service, body),
        tags::TX_QUERY_SERIAL => query_serials(ctx, body),
        tags::TX_QUERY_XREQS => query_xreqs(ctx, body),
        tags::TX_QUERY_XMATCH_OBJID | tags::TX_QUERY_XMATCH_REQNUM => {
            query_xmatchreq(ctx, tag, body)
        }
        tags::TX_QUERY_XMATCH_MATCHNUM => query_xmatch(ctx, body),
        tags::TX_QUERY_XMINING_INFO => query_xmining_info(ctx, service),
        _ => "ERROR:unrecognized message type".into(),
    }
}

async fn send_reply(stream: &mut TcpStream, text: &str) {
    let text = if text.len() + 1 > MAX_REPLY_SIZE {
        tracing::error!("reply of {} bytes exceeds the reply buffer", text.len());
        "UNKNOWN:server reply buffer write error"
    } else {
        text
    };
    let mut buf = Vec::with_capacity(text.len() + 1);
    buf.extend_from_slice(text.as_bytes());
    buf.push(0);
    if let Err(e) = stream.write_all(&buf).await {
        tracing::trace!("reply write failed: {e}");
        return;
    }
    let _ = stream.shutdown().await;
}

fn hex0x(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

const SERVER_ERROR: &str = "ERROR:server error";
const BLOCKCHAIN_ERROR: &str = "ERROR:requested blockchain not tracked by this server";
const TOO_MANY_OBJECTS: &str = "ERROR:too many query objects";

fn stream_net_params(map: &mut Map<String, Value>, ctx: &NodeContext, service: &TransactService) {
    map.insert("server-timestamp".into(), json!(unixtime()));
    map.insert("server-version".into(), json!(ctx.params.server_version));
    map.insert(
        "server-protocol-version".into(),
        json!(ctx.params.protocol_version),
    );
    map.insert(
        "parameters-last-modified-level".into(),
        json!(ctx.params.params_last_modified_level),
    );
    map.insert("blockchain-number".into(), json!(ctx.params.blockchain));
    map.insert(
        "connected-to-network".into(),
        json!(service.is_connected_to_net(ctx) as u32),
    );
}

fn stream_tx_params(map: &mut Map<String, Value>, ctx: &NodeContext, service: &TransactService) {
    map.insert(
        "query-work-difficulty".into(),
        json!(service.config.query_work_difficulty),
    );
    map.insert(
        "tx-work-difficulty".into(),
        json!(ctx.params.tx_work_difficulty),
    );
    map.insert(
        "xcx-naked-buy-work-difficulty".into(),
        json!(ctx.params.xcx_naked_buy_work_difficulty),
    );
    map.insert(
        "xcx-pay-work-difficulty".into(),
        json!(ctx.params.xcx_pay_work_difficulty),
    );
    map.insert(
        "xcx-request-minimum-expiration-time".into(),
        json!(XREQ_SIMPLE_HOLD_TIME + XREQ_MIN_POSTHOLD_TIME),
    );
    map.insert("merkle-tree-oldest-commitment-number".into(), json!(0));
    map.insert(
        "merkle-tree-next-commitment-number".into(),
        json!(ctx.tree.next_commitnum(false)),
    );
}

fn stream_amount_bits(map: &mut Map<String, Value>, ctx: &NodeContext, include_donation: bool) {
    map.insert("asset-bits".into(), json!(ctx.params.asset_bits));
    map.insert("amount-bits".into(), json!(ctx.params.amount_bits));
    if include_donation {
        map.insert("donation-bits".into(), json!(ctx.params.donation_bits));
    }
    map.insert("exponent-bits".into(), json!(ctx.params.exponent_bits));
}

fn stream_donation_params(map: &mut Map<String, Value>, ctx: &NodeContext) {
    let pp = &ctx.params.proof_params;
    map.insert(
        "minimum-donation-per-transaction".into(),
        json!(pp.minimum_donation_fp),
    );
    map.insert("donation-per-transaction".into(), json!(pp.donation_per_tx_fp));
    map.insert("donation-per-byte".into(), json!(pp.donation_per_byte_fp));
    map.insert("donation-per-output".into(), json!(pp.donation_per_output_fp));
    map.insert("donation-per-input".into(), json!(pp.donation_per_input_fp));
    map.insert(
        "donation-per-crosschain-exchange-request".into(),
        json!(pp.donation_per_xcx_req_fp),
    );
}

fn stream_blockchain_status(map: &mut Map<String, Value>, ctx: &NodeContext) {
    let status = ctx.chain.status();
    map.insert(
        "blockchain-highest-indelible-level".into(),
        json!(status.last_indelible_level),
    );
    map.insert(
        "blockchain-highest-indelible-timestamp".into(),
        json!(status.last_indelible_timestamp),
    );
    map.insert(
        "blockchain-last-matching-completed-blocktime".into(),
        json!(status.last_matching_completed_block_time),
    );
    map.insert(
        "blockchain-last-matching-start-blocktime".into(),
        json!(status.last_matching_start_block_time),
    );
}

fn stream_value_limits(map: &mut Map<String, Value>, ctx: &NodeContext) {
    let pp = &ctx.params.proof_params;
    map.insert("minimum-output-exponent".into(), json!(pp.outvalmin));
    map.insert("maximum-output-exponent".into(), json!(pp.outvalmax));
    map.insert("maximum-input-exponent".into(), json!(pp.invalmax));
}

fn stream_domain_params(map: &mut Map<String, Value>, ctx: &NodeContext) {
    map.insert(
        "default-output-billet-domain-id".into(),
        json!(ctx.params.default_domain),
    );
}

fn stream_params(map: &mut Map<String, Value>, ctx: &NodeContext, service: &TransactService) {
    stream_net_params(map, ctx, service);
    stream_tx_params(map, ctx, service);
    stream_amount_bits(map, ctx, true);
    stream_donation_params(map, ctx);
}

fn query_params(ctx: &NodeContext, service: &TransactService) -> String {
    let mut results = Map::new();
    stream_params(&mut results, ctx, service);
    stream_blockchain_status(&mut results, ctx);
    stream_value_limits(&mut results, ctx);
    stream_domain_params(&mut results, ctx);

    json!({ "tx-parameters-query-results": results }).to_string()
}

fn query_address(ctx: &NodeContext, body: &[u8]) -> String {
    let mut r = Reader::new(body);
    let parsed = (|| {
        let blockchain = r.uint(shroud_core::TX_CHAIN_BYTES)?;
        let address = r.bigint::<{ shroud_core::TX_ADDRESS_BYTES }>()?;
        let commitstart = r.u64()?;
        let maxret = r.u16()?;
        r.finish()?;
        Ok::<_, shroud_core::CoreError>((blockchain, address, commitstart, maxret))
    })();
    let (blockchain, address, commitstart, maxret) = match parsed {
        Ok(p) if p.3 != 0 => p,
        _ => return "ERROR:malformed binary tx-address-query".into(),
    };

    if blockchain != ctx.params.blockchain {
        return BLOCKCHAIN_ERROR.into();
    }
    let maxret = (maxret as usize).min(QUERY_MAX_COMMITS);

    let reader = ctx.store.read();
    let (rows, have_more) = match reader.tx_outputs(&address, commitstart, maxret) {
        Ok(found) => found,
        Err(e) => {
            tracing::error!("tx_outputs scan failed: {e}");
            return SERVER_ERROR.into();
        }
    };
    if rows.is_empty() {
        return "Not Found".into();
    }

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let mut entry = Map::new();
        let domain = row.domain >> 1;
        entry.insert("domain".into(), json!(domain));
        if domain != ctx.params.default_domain {
            entry.insert("is-special-domain".into(), json!(1));
        }
        stream_amount_bits(&mut entry, ctx, false);
        if row.domain & 1 != 0 {
            entry.insert("encrypted".into(), json!(0));
            entry.insert("asset".into(), json!(row.asset_enc));
            entry.insert("amount".into(), json!(row.amount_enc));
        } else {
            entry.insert("encrypted".into(), json!(1));
            entry.insert(
                "encrypted-asset".into(),
                json!(format!("0x{:x}", row.asset_enc)),
            );
            entry.insert(
                "encrypted-amount".into(),
                json!(format!("0x{:x}", row.amount_enc)),
            );
        }
        entry.insert("blockchain".into(), json!(ctx.params.blockchain));
        entry.insert("commitment-iv".into(), json!(hex0x(&row.commit_iv)));
        entry.insert("commitment".into(), json!(hex0x(&row.commitment)));
        entry.insert("commitment-number".into(), json!(row.commitnum));
        results.push(Value::Object(entry));
    }

    json!({
        "tx-address-query-report": {
            "server-timestamp": unixtime(),
            "address": hex0x(&address),
            "commitment-number-start": commitstart,
            "more-results-available": have_more as u32,
            "tx-address-query-results": results,
        }
    })
    .to_string()
}

fn query_inputs(ctx: &NodeContext, service: &TransactService, body: &[u8]) -> String {
    const ENTRY: usize = 8;
    let chain_bytes = shroud_core::TX_CHAIN_BYTES;
    if body.len() < chain_bytes || (body.len() - chain_bytes) % ENTRY != 0 {
        return "ERROR:malformed binary tx-input-query".into();
    }
    let nin = (body.len() - chain_bytes) / ENTRY;
    if nin > shroud_core::TX_MAXINPATH {
        return TOO_MANY_OBJECTS.into();
    }

    let mut r = Reader::new(body);
    let blockchain = r.uint(chain_bytes).expect("length checked");
    if blockchain != 0 && blockchain != ctx.params.blockchain {
        return BLOCKCHAIN_ERROR.into();
    }

    // all reads under one snapshot so the paths are co-consistent
    let reader = ctx.store.read();

    let tree_state = (|| {
        let param_level = reader.param_u64(param_key::COMMIT_BLOCKLEVEL)?;
        let row_end = reader.param_u64(param_key::COMMIT_COMMITNUM_HI)?;
        let null_input = reader.param(param_key::COMMIT_NULL_INPUT, 0)?;
        Ok::<_, shroud_store::StoreError>((param_level, row_end, null_input))
    })();
    let (param_level, row_end, nullhash) = match tree_state {
        Ok((Some(level), Some(end), Some(null))) if null.len() == 32 => {
            let mut raw = [0u8; 32];
            raw.copy_from_slice(&null);
            (level, end, FieldElement::from_bytes(&raw))
        }
        Ok(_) | Err(_) => return SERVER_ERROR.into(),
    };
    let root = match reader.commit_root_at_level(param_level) {
        Ok(Some(root)) => root,
        _ => return SERVER_ERROR.into(),
    };

    let param_time = if root.timestamp > shroud_core::CHAIN_TIME_OFFSET {
        (root.timestamp - shroud_core::CHAIN_TIME_OFFSET) / shroud_core::CHAIN_TIME_DIVISOR
    } else {
        0
    };

    let mut inputs = Vec::with_capacity(nin);
    for i in 0..nin {
        let commitnum = r.u64().expect("length checked");
        if commitnum > row_end {
            return format!("Not Found:{i}");
        }
        let path = match read_merkle_path(&reader, commitnum, row_end, &nullhash) {
            Ok(mp) => mp,
            Err(e) => {
                tracing::error!("merkle path read failed: {e}");
                return SERVER_ERROR.into();
            }
        };
        let hexpath: Vec<String> = path
            .path
            .iter()
            .map(|fe| hex0x(&fe.to_bytes()))
            .collect();
        inputs.push(json!({
            "commitment-number": commitnum,
            "merkle-path": hexpath,
        }));
    }

    let mut report = Map::new();
    stream_params(&mut report, ctx, service);

    let mut results = Map::new();
    results.insert("parameter-level".into(), json!(param_level));
    results.insert("parameter-time".into(), json!(param_time));
    results.insert("merkle-root".into(), json!(hex0x(&root.root)));
    stream_value_limits(&mut results, ctx);
    stream_domain_params(&mut results, ctx);
    results.insert("inputs".into(), json!(inputs));

    report.insert("tx-input-query-results".into(), Value::Object(results));

    json!({ "tx-input-query-report": report }).to_string()
}

fn query_serials(ctx: &NodeContext, body: &[u8]) -> String {
    let entry = shroud_core::TX_SERIALNUM_BYTES;
    let chain_bytes = shroud_core::TX_CHAIN_BYTES;
    if body.len() < chain_bytes + entry || (body.len() - chain_bytes) % entry != 0 {
        return "ERROR:malformed binary tx-serial-number-query".into();
    }
    let nserials = (body.len() - chain_bytes) / entry;
    if nserials > shroud_core::TX_MAXIN {
        return TOO_MANY_OBJECTS.into();
    }

    let mut r = Reader::new(body);
    let blockchain = r.uint(chain_bytes).expect("length checked");
    if blockchain != ctx.params.blockchain {
        return BLOCKCHAIN_ERROR.into();
    }

    let reader = ctx.store.read();
    let mut results = Vec::with_capacity(nserials);
    for _ in 0..nserials {
        let serial = r.bigint::<{ shroud_core::TX_SERIALNUM_BYTES }>().expect("length checked");
        let status = match reader.serial_status(&serial) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("serial lookup failed: {e}");
                return SERVER_ERROR.into();
            }
        };
        let mut entry = Map::new();
        entry.insert("serial-number".into(), json!(hex0x(&serial)));
        match status {
            SerialStatus::Indelible {
                hashkey,
                tx_commitnum,
            } => {
                entry.insert("status".into(), json!("indelible"));
                entry.insert("hashkey".into(), json!(hex0x(&hashkey)));
                if tx_commitnum != 0 {
                    entry.insert("transaction-commitment-number".into(), json!(tx_commitnum));
                }
            }
            SerialStatus::Pending => {
                entry.insert("status".into(), json!("pending"));
            }
            SerialStatus::Unspent => {
                entry.insert("status".into(), json!("unspent"));
            }
        }
        results.push(Value::Object(entry));
    }

    json!({ "tx-serial-number-query-results": results }).to_string()
}

fn query_xreqs(ctx: &NodeContext, body: &[u8]) -> String {
    let mut r = Reader::new(body);
    let parsed = (|| {
        let xcx = r.u8()?;
        let min_amount = r.amount()?;
        let max_amount = r.amount()?;
        let rate_fp = r.uint(shroud_core::UNIFLOAT_WIRE_BYTES)?;
        let base_asset = r.u64()?;
        let quote_asset = r.u64()?;
        let maxret = r.u16()?;
        let offset = r.u16()?;
        let flags = r.u8()?;
        let foreign_asset = r.tail_str()?;
        Ok::<_, shroud_core::CoreError>(XreqsQuery {
            xcx_type: xcx,
            min_amount,
            max_amount,
            rate_fp,
            base_asset,
            quote_asset,
            maxret,
            offset,
            flags,
            foreign_asset,
        })
    })();
    let mut query = match parsed {
        Ok(q) => q,
        Err(_) => return "ERROR:malformed exchange-requests-query".into(),
    };
    query.maxret = query.maxret.min(QUERY_MAX_XREQS as u16);

    let resolved = match book::resolve(query, ctx.params.is_testnet()) {
        Ok(resolved) => resolved,
        Err(book::QueryError::InvalidFlags) => {
            return "ERROR:invalid exchange-requests-query flags".into()
        }
        Err(book::QueryError::InvalidType) => {
            return "ERROR:malformed exchange-requests-query".into()
        }
    };

    let reader = ctx.store.read();
    let (found, have_more) = match book::execute(&reader, &resolved) {
        Ok(found) => found,
        Err(e) => {
            tracing::error!("xreqs scan failed: {e}");
            return SERVER_ERROR.into();
        }
    };
    drop(reader);

    let q = &resolved.query;
    let mut report = Map::new();
    report.insert("server-timestamp".into(), json!(unixtime()));
    report.insert("blockchain-number".into(), json!(ctx.params.blockchain));
    if resolved.only_pending_matched {
        report.insert("include-only-pending-matched".into(), json!(true));
    } else if resolved.include_pending_matched {
        report.insert("include-pending-matched".into(), json!(true));
    }
    report.insert("base-asset".into(), json!(q.base_asset));
    report.insert("quote-asset".into(), json!(q.quote_asset));
    if !q.foreign_asset.is_empty() {
        report.insert("foreign-asset".into(), json!(q.foreign_asset));
    }
    report.insert("exchange-request-matching-type".into(), json!(q.xcx_type));
    report.insert("type-minimum".into(), json!(resolved.type_min));
    report.insert("type-maximum".into(), json!(resolved.type_max));
    if resolved.select_buyers {
        report.insert("type-is-buyer".into(), json!(true));
        report.insert("maximum-rate".into(), json!(resolved.open_rate_required));
        report.insert(
            "maximum-rate-step".into(),
            json!(resolved.matching_rate_required),
        );
    } else {
        report.insert("type-is-seller".into(), json!(true));
        report.insert("minimum-rate".into(), json!(resolved.open_rate_required));
        report.insert(
            "minimum-rate-step".into(),
            json!(resolved.matching_rate_required),
        );
    }
    report.insert("minimum-amount".into(), json!(q.min_amount.to_string()));
    report.insert("maximum-amount".into(), json!(q.max_amount.to_string()));
    report.insert("consideration-required".into(), json!(0));
    report.insert("consideration-offered".into(), json!(0));
    report.insert("accept-time-required".into(), json!(0));
    report.insert("accept-time-offered".into(), json!(0));
    let side = if resolved.select_buyers {
        "required"
    } else {
        "offered"
    };
    report.insert(format!("pledge-{side}"), json!(resolved.pledge));
    report.insert(format!("payment-time-{side}"), json!(resolved.payment_time));
    report.insert(format!("confirmations-{side}"), json!(resolved.confirmations));

    let results: Vec<Value> = found.iter().map(stream_xreq).collect();
    report.insert("exchange-requests-query-results".into(), json!(results));
    report.insert("results-offset".into(), json!(q.offset));
    report.insert("more-results-available".into(), json!(have_more as u32));

    json!({ "exchange-requests-query-report": report }).to_string()
}

fn stream_flags(map: &mut Map<String, Value>, flags: &XreqFlags) {
    map.insert(
        "add-immediately-to-blockchain".into(),
        json!(flags.add_immediately_to_blockchain as u32),
    );
    map.insert(
        "auto-accept-matches".into(),
        json!(flags.auto_accept_matches as u32),
    );
    map.insert(
        "no-minimum-after-first-match".into(),
        json!(flags.no_minimum_after_first_match as u32),
    );
    map.insert(
        "must-liquidate-crossing-minimum".into(),
        json!(flags.must_liquidate_crossing_minimum as u32),
    );
    map.insert(
        "must-liquidate-below-minimum".into(),
        json!(flags.must_liquidate_below_minimum as u32),
    );
}

fn stream_xreq(xreq: &Xreq) -> Value {
    let mut map = Map::new();
    map.insert("exchange-request-type".into(), json!(xreq.xcx_type));
    map.insert("request-number".into(), json!(xreq.xreqnum));
    map.insert("object-id".into(), json!(hex::encode(xreq.objid)));
    map.insert("expire-time".into(), json!(xreq.expire_time));
    map.insert("base-asset".into(), json!(xreq.base_asset));
    map.insert("quote-asset".into(), json!(xreq.quote_asset));
    if !xreq.foreign_asset.is_empty() {
        map.insert("foreign-asset".into(), json!(xreq.foreign_asset));
    }
    map.insert("minimum-amount".into(), json!(xreq.min_amount.to_string()));
    map.insert("maximum-amount".into(), json!(xreq.max_amount.to_string()));
    map.insert("net-rate-required".into(), json!(xreq.net_rate_required));
    map.insert("wait-discount".into(), json!(xreq.wait_discount));
    map.insert("base-costs".into(), json!(xreq.base_costs));
    map.insert("quote-costs".into(), json!(xreq.quote_costs));
    map.insert("destination".into(), json!(hex0x(&xreq.destination)));
    if !xreq.foreign_address.is_empty() {
        map.insert("foreign-address".into(), json!(xreq.foreign_address));
    }
    stream_flags(&mut map, &xreq.flags);
    map.insert(
        "consideration-required".into(),
        json!(xreq.consideration_required),
    );
    map.insert(
        "consideration-offered".into(),
        json!(xreq.consideration_offered),
    );
    let side = if xreq.is_buyer() { "offered" } else { "required" };
    map.insert(format!("pledge-{side}"), json!(xreq.pledge));
    map.insert("hold-time".into(), json!(xreq.hold_time));
    map.insert("hold-time-required".into(), json!(xreq.hold_time_required));
    map.insert("minimum-wait-time".into(), json!(xreq.min_wait_time));
    map.insert(
        "accept-time-required".into(),
        json!(xreq.accept_time_required),
    );
    map.insert(
        "accept-time-offered".into(),
        json!(xreq.accept_time_offered),
    );
    map.insert(format!("payment-time-{side}"), json!(xreq.payment_time));
    map.insert(format!("confirmations-{side}"), json!(xreq.confirmations));
    if xreq.xreqnum != 0 {
        map.insert("blocktime".into(), json!(xreq.blocktime));
    }
    map.insert("open-amount".into(), json!(xreq.open_amount.to_string()));
    map.insert("open-rate-required".into(), json!(xreq.open_rate_required));
    if xreq.pending_match_rate != 0.0 {
        map.insert(
            "pending-match-amount".into(),
            json!(xreq.pending_match_amount.to_string()),
        );
        map.insert("pending-match-rate".into(), json!(xreq.pending_match_rate));
        map.insert(
            "pending-match-hold-time".into(),
            json!(xreq.pending_match_hold_time),
        );
    }
    Value::Object(map)
}

fn stream_xmatchreq(match_: &Xmatch, req: &Xmatchreq) -> (String, Value) {
    let isbuyer = req.is_buyer();
    let label = if isbuyer { "buy-request" } else { "sell-request" };

    let mut map = Map::new();
    map.insert("number".into(), json!(req.xreqnum));
    if match_.have_xreqs {
        map.insert("object-id".into(), json!(hex::encode(req.objid)));
        map.insert("type".into(), json!(req.xcx_type));
        map.insert("minimum-amount".into(), json!(req.min_amount.to_string()));
        map.insert("maximum-amount".into(), json!(req.max_amount.to_string()));
        map.insert("net-rate-required".into(), json!(req.net_rate_required));
        map.insert("wait-discount".into(), json!(req.wait_discount));
        map.insert("base-costs".into(), json!(req.base_costs));
        map.insert("quote-costs".into(), json!(req.quote_costs));
        map.insert(
            "consideration-required".into(),
            json!(req.consideration_required),
        );
        map.insert(
            "consideration-offered".into(),
            json!(req.consideration_offered),
        );
        let side = if isbuyer { "offered" } else { "required" };
        map.insert(format!("pledge-{side}"), json!(req.pledge));
        map.insert("hold-time".into(), json!(req.hold_time));
        map.insert("hold-time-required".into(), json!(req.hold_time_required));
        map.insert("minimum-wait-time".into(), json!(req.min_wait_time));
        map.insert(
            "accept-time-required".into(),
            json!(req.accept_time_required),
        );
        map.insert("accept-time-offered".into(), json!(req.accept_time_offered));
        map.insert(format!("payment-time-{side}"), json!(req.payment_time));
        map.insert(format!("confirmations-{side}"), json!(req.confirmations));
        stream_flags(&mut map, &req.flags);
        if req.flags.have_matching && !isbuyer {
            map.insert("foreign-address".into(), json!(req.foreign_address));
        }
    }
    (label.into(), Value::Object(map))
}

fn stream_xmatch(map: &mut Map<String, Value>, match_: &Xmatch) {
    map.insert("number".into(), json!(match_.xmatchnum));
    map.insert("type".into(), json!(match_.xcx_type));
    map.insert("status".into(), json!(match_.status));
    map.insert("base-asset".into(), json!(match_.xsell.base_asset));
    map.insert("quote-asset".into(), json!(match_.xsell.quote_asset));
    if !match_.xsell.foreign_asset.is_empty() {
        map.insert("foreign-asset".into(), json!(match_.xsell.foreign_asset));
    }
    map.insert("base-amount".into(), json!(match_.base_amount.to_string()));
    map.insert("rate".into(), json!(match_.rate));
    map.insert("accept-time".into(), json!(match_.accept_time));
    if match_.xbuy.match_consideration != 0 {
        map.insert(
            "buyer-consideration".into(),
            json!(match_.xbuy.match_consideration),
        );
    }
    if match_.xsell.match_consideration != 0 {
        map.insert(
            "seller-consideration".into(),
            json!(match_.xsell.match_consideration),
        );
    }
    if match_.match_pledge != 0 {
        map.insert("match-pledge".into(), json!(match_.match_pledge));
    }
    if match_.next_deadline != 0 {
        map.insert("next-deadline".into(), json!(match_.next_deadline));
    }
    if match_.match_timestamp != 0 {
        map.insert("match-timestamp".into(), json!(match_.match_timestamp));
    }
    if match_.accept_timestamp != 0 {
        map.insert("accept-timestamp".into(), json!(match_.accept_timestamp));
    }
    if match_.final_timestamp != 0 {
        map.insert("final-timestamp".into(), json!(match_.final_timestamp));
    }
    map.insert("amount-paid".into(), json!(match_.amount_paid.to_string()));
    map.insert(
        "mining-amount".into(),
        json!(match_.mining_amount.to_string()),
    );
}

fn query_xmatchreq(ctx: &NodeContext, tag: u32, body: &[u8]) -> String {
    const MALFORMED: &str = "ERROR:malformed binary exchange-matchreq-query";

    let mut r = Reader::new(body);
    let blockchain = match r.uint(shroud_core::TX_CHAIN_BYTES) {
        Ok(b) => b,
        Err(_) => return MALFORMED.into(),
    };

    let mut objid: Option<[u8; 32]> = None;
    let mut xreqnum: u64 = 0;
    let mut xmatchnum: u64 = 0;
    let maxret;

    if tag == tags::TX_QUERY_XMATCH_OBJID {
        let parsed = (|| {
            let oid = r.bigint::<32>()?;
            let maxret = r.u16()?;
            r.finish()?;
            Ok::<_, shroud_core::CoreError>((oid, maxret))
        })();
        match parsed {
            Ok((oid, m)) if m != 0 => {
                objid = Some(oid);
                maxret = m;
            }
            _ => return MALFORMED.into(),
        }
    } else {
        let parsed = (|| {
            let xreqnum = r.u64()?;
            let maxret = r.u16()?;
            let xmatchnum = r.u64()?;
            r.finish()?;
            Ok::<_, shroud_core::CoreError>((xreqnum, maxret, xmatchnum))
        })();
        match parsed {
            Ok((req, m, matchnum)) if req != 0 && m != 0 => {
                xreqnum = req;
                maxret = m;
                xmatchnum = matchnum;
            }
            _ => return MALFORMED.into(),
        }
    }

    if blockchain != ctx.params.blockchain {
        return BLOCKCHAIN_ERROR.into();
    }
    let maxret = (maxret as usize).min(QUERY_MAX_MATCHES);

    let reader = ctx.store.read();

    if let Some(oid) = objid {
        match reader.xreqnum_for_objid(&oid) {
            Ok(Some(num)) => xreqnum = num,
            Ok(None) => {}
            Err(e) => {
                tracing::error!("objid lookup failed: {e}");
                return SERVER_ERROR.into();
            }
        }
    }

    let mut report = Map::new();
    report.insert("server-timestamp".into(), json!(unixtime()));
    report.insert("blockchain-number".into(), json!(ctx.params.blockchain));
    stream_blockchain_status(&mut report, ctx);
    if let Some(oid) = objid {
        report.insert("request-object-id".into(), json!(hex::encode(oid)));
    }
    if xreqnum != 0 {
        report.insert("request-number".into(), json!(xreqnum));
    }

    let mut results = Vec::new();
    let mut have_more = false;
    let mut header_extra: Option<(u8, Option<String>)> = None;
    let matchnum_start = xmatchnum;

    for i in 0..=maxret {
        let found = match reader.xmatch_for_reqnum(xreqnum, xmatchnum) {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("match lookup failed: {e}");
                return SERVER_ERROR.into();
            }
        };
        let m = match found {
            Some(m) => m,
            None => break,
        };

        if header_extra.is_none() {
            if let Some(req) = m.side(xreqnum) {
                let open = req
                    .flags
                    .have_matching
                    .then(|| req.open_amount.to_string());
                header_extra = Some((req.disposition, open));
            }
        }

        if i == maxret {
            have_more = true;
            break;
        }

        let mut entry = Map::new();
        stream_xmatch(&mut entry, &m);
        if let Some(counterparty) = m.counterparty(xreqnum) {
            let (label, value) = stream_xmatchreq(&m, counterparty);
            entry.insert(label, value);
        }
        results.push(json!({ "match": entry }));

        xmatchnum = m.xmatchnum + 1;
    }

    if let Some((disposition, open_amount)) = header_extra {
        report.insert("disposition".into(), json!(disposition));
        if let Some(open) = open_amount {
            report.insert("open-amount".into(), json!(open));
        }
    }
    report.insert("request-match-number-start".into(), json!(matchnum_start));
    report.insert("exchange-matchreq-query-results".into(), json!(results));
    report.insert("more-results-available".into(), json!(have_more as u32));

    json!({ "exchange-matchreq-query-report": report }).to_string()
}

fn query_xmatch(ctx: &NodeContext, body: &[u8]) -> String {
    let mut r = Reader::new(body);
    let parsed = (|| {
        let blockchain = r.uint(shroud_core::TX_CHAIN_BYTES)?;
        let xmatchnum = r.u64()?;
        r.finish()?;
        Ok::<_, shroud_core::CoreError>((blockchain, xmatchnum))
    })();
    let (blockchain, xmatchnum) = match parsed {
        Ok(p) if p.1 != 0 => p,
        _ => return "ERROR:malformed binary exchange-match-query".into(),
    };
    if blockchain != ctx.params.blockchain {
        return BLOCKCHAIN_ERROR.into();
    }

    let reader = ctx.store.read();
    let found = match reader.xmatch(xmatchnum) {
        Ok(found) => found,
        Err(e) => {
            tracing::error!("match lookup failed: {e}");
            return SERVER_ERROR.into();
        }
    };

    let mut report = Map::new();
    report.insert("server-timestamp".into(), json!(unixtime()));
    report.insert("blockchain-number".into(), json!(ctx.params.blockchain));
    stream_blockchain_status(&mut report, ctx);
    report.insert("match-number".into(), json!(xmatchnum));

    let mut results = Map::new();
    if let Some(mut m) = found {
        // lookups by match number send only the request numbers
        m.have_xreqs = false;
        stream_xmatch(&mut results, &m);
        let (label, value) = stream_xmatchreq(&m, &m.xbuy);
        results.insert(label, value);
        let (label, value) = stream_xmatchreq(&m, &m.xsell);
        results.insert(label, value);
    }
    report.insert("exchange-match-query-results".into(), Value::Object(results));

    json!({ "exchange-match-query-report": report }).to_string()
}

fn query_xmining_info(ctx: &NodeContext, service: &TransactService) -> String {
    let mining = &ctx.params.mining;

    let mut results = Map::new();
    stream_net_params(&mut results, ctx, service);
    stream_blockchain_status(&mut results, ctx);
    results.insert("mining-start-time".into(), json!(mining.mining_start_time));
    results.insert(
        "mining-update-time-increment".into(),
        json!(mining.mining_update_time_increment),
    );
    results.insert("total-mined".into(), json!(mining.total_mined.to_string()));
    results.insert(
        "total-remaining-to-mine".into(),
        json!(mining.total_remaining_to_mine.to_string()),
    );
    results.insert(
        "mining-amount-multiplier".into(),
        json!(mining.mining_amount_multiplier),
    );
    results.insert(
        "currently-mineable-amount-increment".into(),
        json!(mining.mineable_amount_increment.to_string()),
    );
    results.insert(
        "currently-mineable-amount".into(),
        json!(mining.currently_mineable_amount.to_string()),
    );
    results.insert(
        "currently-mineable-amount-maximum".into(),
        json!(mining.max_currently_mineable_amount.to_string()),
    );
    results.insert(
        "mining-fraction-per-match-maximum".into(),
        json!(mining.mining_max_fraction_per_match),
    );
    results.insert(
        "mining-fraction-per-match-minimum".into(),
        json!(mining.mining_min_fraction_per_match),
    );
    results.insert("mining-match-average-amount".into(), json!(mining.avg_amount));
    results.insert(
        "mining-match-average-rate".into(),
        json!(mining.avg_match_rate),
    );
    results.insert(
        "mining-request-average-match-rate-required".into(),
        json!(mining.avg_match_rate_required),
    );
    results.insert(
        "mining-request-minimum-expiration-time".into(),
        json!(XREQ_SIMPLE_HOLD_TIME + XREQ_MIN_POSTHOLD_TIME),
    );

    json!({ "exchange-mining-info-query-results": results }).to_string()
}
