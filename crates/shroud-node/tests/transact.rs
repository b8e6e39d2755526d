//! end-to-end tests of the transact wire protocol over real sockets

use shroud_core::codec::{MsgHeader, Writer, MSG_HEADER_SIZE};
use shroud_core::field::FieldElement;
use shroud_core::merkle::{reduce_path, MERKLE_DEPTH};
use shroud_core::timestamp::unixtime;
use shroud_core::unifloat;
use shroud_core::xreq::{xcx_type, Xreq};
use shroud_core::{pow, tags, POW_SIZE};
use shroud_node::service::{TransactConfig, TransactService};
use shroud_node::validate::spawn_state_validator;
use shroud_node::{NodeContext, NodeParams};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const PREFIX_SIZE: usize = MSG_HEADER_SIZE + 8 + POW_SIZE;

struct TestNode {
    ctx: Arc<NodeContext>,
    addr: SocketAddr,
    _dir: tempfile::TempDir,
}

async fn start_node(params: NodeParams, config: TransactConfig) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let ctx = NodeContext::open(params, dir.path()).unwrap();
    let validator = spawn_state_validator(ctx.clone());
    let service = TransactService::new(TransactConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        ..config
    });
    let addr = service.start(ctx.clone(), validator).await.unwrap();
    TestNode {
        ctx,
        addr,
        _dir: dir,
    }
}

async fn default_node() -> TestNode {
    start_node(NodeParams::default(), TransactConfig::default()).await
}

/// build a frame, solving the proof of work for `difficulty`
fn frame(tag: u32, timestamp: u64, body: &[u8], difficulty: u64) -> Vec<u8> {
    let size = PREFIX_SIZE + body.len();
    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(
        &MsgHeader {
            size: size as u32,
            tag,
        }
        .to_bytes(),
    );
    buf.extend_from_slice(&timestamp.to_le_bytes());
    let objhash = pow::binding_hash(tag, timestamp, body);
    buf.extend_from_slice(&pow::solve(&objhash, difficulty));
    buf.extend_from_slice(body);
    buf
}

async fn roundtrip(addr: SocketAddr, bytes: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply.last(), Some(&0), "reply must be NUL-terminated");
    reply.pop();
    String::from_utf8(reply).unwrap()
}

fn tx_body(param_level: u64, serials: &[[u8; 32]]) -> Vec<u8> {
    let mut w = Writer::new();
    w.uint(param_level, 8);
    w.uint(serials.len() as u64, 1);
    w.uint(0, 1);
    for s in serials {
        w.bigint(s);
    }
    w.into_inner()
}

#[tokio::test]
async fn pow_failure_is_rejected() {
    let node = start_node(
        NodeParams {
            tx_work_difficulty: 1000,
            ..Default::default()
        },
        TransactConfig::default(),
    )
    .await;

    // zeroed proof of work
    let body = tx_body(1, &[]);
    let size = PREFIX_SIZE + body.len();
    let mut buf = Vec::new();
    buf.extend_from_slice(
        &MsgHeader {
            size: size as u32,
            tag: tags::TX,
        }
        .to_bytes(),
    );
    buf.extend_from_slice(&unixtime().to_le_bytes());
    buf.extend_from_slice(&[0u8; POW_SIZE]);
    buf.extend_from_slice(&body);

    let reply = roundtrip(node.addr, &buf).await;
    assert!(
        reply.starts_with("ERROR:proof of work failed:1000"),
        "got {reply}"
    );
}

#[tokio::test]
async fn mint_rejected_off_testnet() {
    // chain id 1 is not a testnet and the mint era is off
    let node = default_node().await;
    let reply = roundtrip(node.addr, &frame(tags::MINT, unixtime(), &tx_body(1, &[]), 0)).await;
    assert_eq!(reply, "INVALID:mint transaction not allowed");
}

#[tokio::test]
async fn mint_allowed_on_testnet() {
    let node = start_node(
        NodeParams {
            blockchain: 9,
            ..Default::default()
        },
        TransactConfig::default(),
    )
    .await;
    let reply = roundtrip(node.addr, &frame(tags::MINT, unixtime(), &tx_body(1, &[]), 0)).await;
    assert_eq!(reply, "OK:0");
}

#[tokio::test]
async fn unrecognized_tag_rejected() {
    let node = default_node().await;
    let reply = roundtrip(node.addr, &frame(0xdead_beef, unixtime(), &[], 0)).await;
    assert_eq!(reply, "ERROR:unrecognized message type");
}

#[tokio::test]
async fn stale_timestamp_rejected() {
    let node = default_node().await;
    let reply = roundtrip(
        node.addr,
        &frame(tags::TX_QUERY_SERIAL, unixtime() - 3600, &[], 0),
    )
    .await;
    assert!(reply.starts_with("ERROR:invalid timestamp:"), "got {reply}");
}

#[tokio::test]
async fn invalid_size_field_rejected() {
    let node = default_node().await;
    let mut buf = frame(tags::TX_QUERY_PARAMS, 0, &[], 0);
    // lie about the size but still send a full prefix
    buf[0..4].copy_from_slice(&10u32.to_le_bytes());
    let reply = roundtrip(node.addr, &buf).await;
    assert_eq!(reply, "ERROR:message size field invalid");
}

#[tokio::test]
async fn short_read_reported() {
    let node = default_node().await;
    let reply = roundtrip(node.addr, &[1, 2, 3]).await;
    assert_eq!(reply, "ERROR:unexpected short read");
}

#[tokio::test]
async fn params_query_streams_parameters() {
    let node = default_node().await;
    let reply = roundtrip(node.addr, &frame(tags::TX_QUERY_PARAMS, 0, &[], 0)).await;
    let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let results = &v["tx-parameters-query-results"];
    assert_eq!(results["blockchain-number"], 1);
    assert_eq!(results["connected-to-network"], 1);
    assert_eq!(results["merkle-tree-next-commitment-number"], 0);
    assert!(results["blockchain-highest-indelible-level"].is_u64());
    assert!(results["minimum-output-exponent"].is_u64());
    assert!(results["default-output-billet-domain-id"].is_u64());
}

#[tokio::test]
async fn serial_status_transitions_over_the_wire() {
    let node = default_node().await;
    let s1 = [1u8; 32];
    let s2 = [2u8; 32];

    let mut w = node.ctx.store.write();
    w.serial_insert_pending(&s1);
    w.commit().unwrap();

    let mut body = Writer::new();
    body.uint(1, 4).bigint(&s1).bigint(&s2);
    let body = body.into_inner();

    let reply = roundtrip(node.addr, &frame(tags::TX_QUERY_SERIAL, unixtime(), &body, 0)).await;
    let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let results = v["tx-serial-number-query-results"].as_array().unwrap();
    assert_eq!(results[0]["status"], "pending");
    assert_eq!(results[1]["status"], "unspent");

    let mut w = node.ctx.store.write();
    w.serial_insert_indelible(&s1, &[9u8; 32], 42).unwrap();
    w.commit().unwrap();

    let reply = roundtrip(node.addr, &frame(tags::TX_QUERY_SERIAL, unixtime(), &body, 0)).await;
    let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let results = v["tx-serial-number-query-results"].as_array().unwrap();
    assert_eq!(results[0]["status"], "indelible");
    assert_eq!(
        results[0]["hashkey"],
        format!("0x{}", hex::encode([9u8; 32]))
    );
    assert_eq!(results[0]["transaction-commitment-number"], 42);
    assert_eq!(results[1]["status"], "unspent");
}

#[tokio::test]
async fn tx_accepted_and_duplicate_short_circuits() {
    let node = default_node().await;
    let serial = [7u8; 32];
    let request = frame(tags::TX, unixtime(), &tx_body(1, &[serial]), 0);

    let reply = roundtrip(node.addr, &request).await;
    assert_eq!(reply, "OK:0");

    // the serial is now pending on the node
    let status = node.ctx.store.read().serial_status(&serial).unwrap();
    assert_eq!(
        status,
        shroud_store::store::SerialStatus::Pending
    );

    // resubmitting the identical object is already valid
    let reply = roundtrip(node.addr, &request).await;
    assert_eq!(reply, "OK:0");
}

#[tokio::test]
async fn spent_serial_rejected() {
    let node = default_node().await;
    let serial = [8u8; 32];
    let mut w = node.ctx.store.write();
    w.serial_insert_indelible(&serial, &[1u8; 32], 5).unwrap();
    w.commit().unwrap();

    let reply = roundtrip(
        node.addr,
        &frame(tags::TX, unixtime(), &tx_body(1, &[serial]), 0),
    )
    .await;
    assert_eq!(reply, "INVALID:already spent");
}

#[tokio::test]
async fn not_connected_rejects_tx() {
    let node = start_node(
        NodeParams::default(),
        TransactConfig {
            max_net_sec: 600,
            ..Default::default()
        },
    )
    .await;
    let reply = roundtrip(node.addr, &frame(tags::TX, unixtime(), &tx_body(1, &[]), 0)).await;
    assert_eq!(reply, "ERROR:server not connected");
}

#[tokio::test]
async fn malformed_address_query_rejected() {
    let node = default_node().await;
    let reply = roundtrip(
        node.addr,
        &frame(tags::TX_QUERY_ADDRESS, unixtime(), &[1, 2, 3], 0),
    )
    .await;
    assert_eq!(reply, "ERROR:malformed binary tx-address-query");
}

#[tokio::test]
async fn input_paths_verify_against_root() {
    let node = default_node().await;

    // one commitment, finalized at level 1
    let commitment = FieldElement::from_u64(1234);
    let mut w = node.ctx.store.write();
    let num = node.ctx.tree.next_commitnum(true);
    node.ctx.tree.add_commitment(&mut w, num, &commitment).unwrap();
    w.commit().unwrap();
    node.ctx
        .tree
        .finalize_block(
            &node.ctx.store,
            &node.ctx.chain,
            1,
            &[5u8; 32],
            1_700_000_000,
            node.ctx.params.blockchain,
        )
        .unwrap();

    let mut body = Writer::new();
    body.uint(1, 4).uint(0, 8);
    let reply = roundtrip(
        node.addr,
        &frame(tags::TX_QUERY_INPUTS, unixtime(), &body.into_inner(), 0),
    )
    .await;
    let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let results = &v["tx-input-query-report"]["tx-input-query-results"];
    assert_eq!(results["parameter-level"], 1);

    let root_hex = results["merkle-root"].as_str().unwrap();
    let path: Vec<FieldElement> = results["inputs"][0]["merkle-path"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| {
            let bytes: [u8; 32] = hex::decode(h.as_str().unwrap().trim_start_matches("0x"))
                .unwrap()
                .try_into()
                .unwrap();
            FieldElement::from_bytes(&bytes)
        })
        .collect();
    assert_eq!(path.len(), MERKLE_DEPTH);

    let reduced = reduce_path(0, &commitment, &path);
    assert_eq!(
        format!("0x{}", hex::encode(reduced.to_bytes())),
        root_hex
    );

    // unknown commitnum
    let mut body = Writer::new();
    body.uint(1, 4).uint(99, 8);
    let reply = roundtrip(
        node.addr,
        &frame(tags::TX_QUERY_INPUTS, unixtime(), &body.into_inner(), 0),
    )
    .await;
    assert_eq!(reply, "Not Found:0");
}

fn xreqs_body(xcx: u8, rate: f64, maxret: u16, offset: u16, flags: u8) -> Vec<u8> {
    let mut w = Writer::new();
    w.uint(xcx as u64, 1);
    w.amount(0);
    w.amount(0);
    w.uint(unifloat::wire_encode(rate), 4);
    w.uint(0, 8);
    w.uint(0, 8);
    w.uint(maxret as u64, 2);
    w.uint(offset as u64, 2);
    w.uint(flags as u64, 1);
    w.str("BTC");
    w.into_inner()
}

#[tokio::test]
async fn xreqs_paging_over_the_wire() {
    let node = default_node().await;

    let mut w = node.ctx.store.write();
    for (num, rate) in [(1u64, 1.0), (2, 1.0), (3, 2.0), (4, 3.0)] {
        w.xreq_insert(&Xreq {
            xreqnum: num,
            xcx_type: xcx_type::SIMPLE_SELL,
            foreign_asset: "BTC".into(),
            open_rate_required: rate,
            open_amount: 100,
            ..Default::default()
        })
        .unwrap();
    }
    w.commit().unwrap();

    let reqnums = |reply: &str| -> Vec<u64> {
        let v: serde_json::Value = serde_json::from_str(reply).unwrap();
        v["exchange-requests-query-report"]["exchange-requests-query-results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["request-number"].as_u64().unwrap())
            .collect()
    };

    // buyer from the bottom: the two rate-1.0 rows, more available
    let reply = roundtrip(
        node.addr,
        &frame(
            tags::TX_QUERY_XREQS,
            unixtime(),
            &xreqs_body(xcx_type::SIMPLE_BUY, 0.0, 2, 0, 0),
            0,
        ),
    )
    .await;
    assert_eq!(reqnums(&reply), vec![1, 2]);
    let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(
        v["exchange-requests-query-report"]["more-results-available"],
        1
    );
    assert_eq!(v["exchange-requests-query-report"]["type-is-seller"], true);

    // offset pages within the first rate bucket only
    let reply = roundtrip(
        node.addr,
        &frame(
            tags::TX_QUERY_XREQS,
            unixtime(),
            &xreqs_body(xcx_type::SIMPLE_BUY, 0.0, 2, 1, 0),
            0,
        ),
    )
    .await;
    assert_eq!(reqnums(&reply), vec![2]);

    // paging by rate reaches the next bucket
    let reply = roundtrip(
        node.addr,
        &frame(
            tags::TX_QUERY_XREQS,
            unixtime(),
            &xreqs_body(xcx_type::SIMPLE_BUY, 2.0, 2, 0, 0),
            0,
        ),
    )
    .await;
    assert_eq!(reqnums(&reply), vec![3, 4]);

    // conflicting flags
    let reply = roundtrip(
        node.addr,
        &frame(
            tags::TX_QUERY_XREQS,
            unixtime(),
            &xreqs_body(xcx_type::SIMPLE_BUY, 0.0, 2, 0, 3),
            0,
        ),
    )
    .await;
    assert_eq!(reply, "ERROR:invalid exchange-requests-query flags");
}

#[tokio::test]
async fn xmatch_queries_over_the_wire() {
    let node = default_node().await;

    let mut m = shroud_core::xmatch::Xmatch {
        xmatchnum: 10,
        base_amount: 500,
        rate: 1.25,
        have_xreqs: true,
        ..Default::default()
    };
    m.xbuy.xreqnum = 100;
    m.xbuy.xcx_type = xcx_type::SIMPLE_BUY;
    m.xbuy.objid = [0xaa; 32];
    m.xsell.xreqnum = 200;
    m.xsell.xcx_type = xcx_type::SIMPLE_SELL;
    m.xsell.objid = [0xbb; 32];
    m.xsell.foreign_asset = "BTC".into();

    let mut w = node.ctx.store.write();
    w.xmatch_insert(&m).unwrap();
    w.commit().unwrap();

    // by request number: the reply carries the counterparty snapshot
    let mut body = Writer::new();
    body.uint(1, 4).uint(100, 8).uint(5, 2).uint(0, 8);
    let reply = roundtrip(
        node.addr,
        &frame(tags::TX_QUERY_XMATCH_REQNUM, unixtime(), &body.into_inner(), 0),
    )
    .await;
    let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let report = &v["exchange-matchreq-query-report"];
    assert_eq!(report["request-number"], 100);
    let results = report["exchange-matchreq-query-results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["match"]["number"], 10);
    assert_eq!(results[0]["match"]["sell-request"]["number"], 200);

    // by match number: both sides, numbers only
    let mut body = Writer::new();
    body.uint(1, 4).uint(10, 8);
    let reply = roundtrip(
        node.addr,
        &frame(
            tags::TX_QUERY_XMATCH_MATCHNUM,
            unixtime(),
            &body.into_inner(),
            0,
        ),
    )
    .await;
    let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let results = &v["exchange-match-query-report"]["exchange-match-query-results"];
    assert_eq!(results["number"], 10);
    assert_eq!(results["buy-request"]["number"], 100);
    assert_eq!(results["sell-request"]["number"], 200);
    assert!(results["buy-request"]["object-id"].is_null());

    // by object id
    let mut body = Writer::new();
    body.uint(1, 4).bigint(&[0xaa; 32]).uint(5, 2);
    let reply = roundtrip(
        node.addr,
        &frame(tags::TX_QUERY_XMATCH_OBJID, unixtime(), &body.into_inner(), 0),
    )
    .await;
    let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let report = &v["exchange-matchreq-query-report"];
    assert_eq!(report["request-number"], 100);
}

#[tokio::test]
async fn mining_info_query_replies() {
    let node = default_node().await;
    let reply = roundtrip(
        node.addr,
        &frame(tags::TX_QUERY_XMINING_INFO, unixtime(), &[], 0),
    )
    .await;
    let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let results = &v["exchange-mining-info-query-results"];
    assert_eq!(results["total-mined"], "0");
    assert!(results["mining-start-time"].is_u64());
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let node = default_node().await;
    node.ctx.chain.start_shutdown();
    // give the accept loop a moment to observe the signal
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(TcpStream::connect(node.addr).await.is_err() || {
        // a race may still accept one connection; a second attempt after
        // the listener is gone must fail
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        TcpStream::connect(node.addr).await.is_err()
    });
}

#[tokio::test]
async fn empty_chain_root_served_after_genesis() {
    let node = default_node().await;
    node.ctx
        .tree
        .finalize_block(
            &node.ctx.store,
            &node.ctx.chain,
            0,
            &[0u8; 32],
            0,
            node.ctx.params.blockchain,
        )
        .unwrap();

    let root = node.ctx.store.read().commit_root_at_level(0).unwrap().unwrap();
    assert_eq!(
        root.root,
        FieldElement::from_u64(node.ctx.params.blockchain).to_bytes()
    );
}
