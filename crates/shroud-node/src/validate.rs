//! asynchronous transaction validation queue
//!
//! the transact server hands accepted objects to this queue and returns to
//! its socket; workers validate against blockchain state and deliver the
//! result through a single-shot channel owned by the originating
//! connection. the proof checks themselves live behind [`ObjectValidator`];
//! the built-in validator performs the state checks a node can do without
//! the proving system: duplicate object ids and serial-number conflicts,
//! then registers pending serial numbers.
//!
//! result codes are negative integers; [`result_string`] maps each to its
//! user-visible reply. nonnegative results reply `OK:<value>`.

use crate::NodeContext;
use shroud_core::codec::Reader;
use shroud_core::{TX_SERIALNUM_BYTES, TX_ADDRESS_BYTES, TX_COMMIT_IV_BYTES, FIELD_BYTES};
use shroud_store::store::SerialStatus;
use shroud_store::TxOutputRow;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// validation queue lanes; transactions and payments ahead of new
/// exchange requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    TxHi,
    XreqHi,
}

pub mod result_code {
    pub const SERVER_ERROR: i64 = -1;
    pub const OBJECT_NOT_VALID: i64 = -2;
    pub const DUPLICATE_OBJECT: i64 = -3;
    pub const ALREADY_SPENT: i64 = -4;
    pub const DUPLICATE_SERIALNUM: i64 = -5;
    pub const PARAM_LEVEL_INVALID: i64 = -6;
    pub const EXPIRED: i64 = -7;
}

/// map a negative validation result to its reply text
pub fn result_string(result: i64) -> &'static str {
    match result {
        result_code::OBJECT_NOT_VALID => "INVALID:binary object not valid",
        result_code::DUPLICATE_OBJECT => "INVALID:duplicate object",
        result_code::ALREADY_SPENT => "INVALID:already spent",
        result_code::DUPLICATE_SERIALNUM => "INVALID:duplicate serial number",
        result_code::PARAM_LEVEL_INVALID => "INVALID:parameter level invalid",
        result_code::EXPIRED => "INVALID:expired",
        _ => "ERROR:server error",
    }
}

/// minimal structural view of a tx-like object body: the parameter level,
/// the serial numbers it spends and the outputs it creates
#[derive(Debug, Clone, Default)]
pub struct TxSummary {
    pub param_level: u64,
    pub serials: Vec<[u8; TX_SERIALNUM_BYTES]>,
    pub outputs: Vec<([u8; TX_ADDRESS_BYTES], TxOutputRow)>,
}

/// parse the common body layout shared by tx-like tags:
/// `param_level:u64 | nin:u8 | nout:u8 | nin serials | nout outputs`
pub fn parse_tx_summary(body: &[u8]) -> Option<TxSummary> {
    let mut r = Reader::new(body);
    let param_level = r.u64().ok()?;
    let nin = r.u8().ok()? as usize;
    let nout = r.u8().ok()? as usize;
    if nin > shroud_core::TX_MAXIN {
        return None;
    }

    let mut serials = Vec::with_capacity(nin);
    for _ in 0..nin {
        serials.push(r.bigint::<TX_SERIALNUM_BYTES>().ok()?);
    }

    let mut outputs = Vec::with_capacity(nout);
    for _ in 0..nout {
        let address = r.bigint::<TX_ADDRESS_BYTES>().ok()?;
        let domain = r.u32().ok()?;
        let asset_enc = r.u64().ok()?;
        let amount_enc = r.u64().ok()?;
        let commit_iv = r.bigint::<TX_COMMIT_IV_BYTES>().ok()?;
        let commitment = r.bigint::<FIELD_BYTES>().ok()?;
        outputs.push((
            address,
            TxOutputRow {
                domain,
                asset_enc,
                amount_enc,
                commit_iv,
                commitment,
                commitnum: 0,
            },
        ));
    }

    r.finish().ok()?;
    Some(TxSummary {
        param_level,
        serials,
        outputs,
    })
}

/// extract only the parameter level, for the ingress pre-flight checks
pub fn param_level_from_body(body: &[u8]) -> Option<u64> {
    Reader::new(body).u64().ok()
}

/// proof validation seam. the SNARK verifier plugs in here; the node core
/// only depends on this contract.
pub trait ObjectValidator: Send + Sync + 'static {
    /// full semantic validation. returns a nonnegative indicator on
    /// success or a negative result code.
    fn validate(&self, ctx: &NodeContext, tag: u32, objid: &[u8; 32], body: &[u8]) -> i64;
}

/// state-only validation: no proofs, but real duplicate and double-spend
/// checks, and registration of pending state
pub struct StateValidator;

impl ObjectValidator for StateValidator {
    fn validate(&self, ctx: &NodeContext, _tag: u32, _objid: &[u8; 32], body: &[u8]) -> i64 {
        let summary = match parse_tx_summary(body) {
            Some(s) => s,
            None => return result_code::OBJECT_NOT_VALID,
        };

        {
            let reader = ctx.store.read();
            let mut seen = HashSet::new();
            for serial in &summary.serials {
                if !seen.insert(*serial) {
                    return result_code::DUPLICATE_SERIALNUM;
                }
                match reader.serial_status(serial) {
                    Ok(SerialStatus::Indelible { .. }) => return result_code::ALREADY_SPENT,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("serial lookup failed: {e}");
                        return result_code::SERVER_ERROR;
                    }
                }
            }
        }

        let mut w = ctx.store.write();
        for serial in &summary.serials {
            w.serial_insert_pending(serial);
        }
        for (address, row) in &summary.outputs {
            let mut row = row.clone();
            row.commitnum = ctx.tree.next_commitnum(true);
            if ctx.tree.add_commitment(&mut w, row.commitnum, &shroud_core::FieldElement::from_bytes(&row.commitment)).is_err() {
                return result_code::SERVER_ERROR;
            }
            if w.tx_output_insert(address, &row).is_err() {
                return result_code::SERVER_ERROR;
            }
        }
        if w.commit().is_err() {
            return result_code::SERVER_ERROR;
        }

        0
    }
}

struct Job {
    tag: u32,
    objid: [u8; 32],
    body: Vec<u8>,
    reply: oneshot::Sender<i64>,
}

/// outcome of handing an object to the queue
#[derive(Debug)]
pub enum Enqueue {
    /// callback will fire later through the reply channel
    Queued,
    /// object already known valid; no callback
    AlreadyValid,
    /// queue refused the object
    Failed(i64),
}

pub struct TxValidator {
    tx_lane: mpsc::Sender<Job>,
    xreq_lane: mpsc::Sender<Job>,
    seen: Arc<Mutex<HashSet<[u8; 32]>>>,
}

impl TxValidator {
    /// start one validation task per lane against `ctx`. lanes are
    /// processed independently, transactions never queue behind a burst of
    /// new exchange requests.
    pub fn spawn(ctx: Arc<NodeContext>, validator: Arc<dyn ObjectValidator>) -> Arc<Self> {
        let (tx_tx, tx_rx) = mpsc::channel::<Job>(256);
        let (xreq_tx, xreq_rx) = mpsc::channel::<Job>(256);
        let seen = Arc::new(Mutex::new(HashSet::new()));

        for (lane, rx) in [("tx", tx_rx), ("xreq", xreq_rx)] {
            let ctx = ctx.clone();
            let validator = validator.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                tracing::debug!("validation lane {lane} started");
                let mut rx = rx;
                while let Some(job) = rx.recv().await {
                    if ctx.chain.is_shutdown() {
                        let _ = job.reply.send(result_code::SERVER_ERROR);
                        continue;
                    }
                    let result = validator.validate(&ctx, job.tag, &job.objid, &job.body);
                    if result >= 0 {
                        seen.lock().unwrap_or_else(|e| e.into_inner()).insert(job.objid);
                    }
                    // receiver gone means the connection timed out or closed
                    let _ = job.reply.send(result);
                }
                tracing::debug!("validation lane {lane} stopped");
            });
        }

        Arc::new(Self {
            tx_lane: tx_tx,
            xreq_lane: xreq_tx,
            seen,
        })
    }

    /// hand an object to the queue. mirrors the collaborator contract:
    /// already-valid objects return immediately with no callback.
    pub fn enqueue_validate(
        &self,
        priority: Priority,
        tag: u32,
        objid: [u8; 32],
        body: Vec<u8>,
        reply: oneshot::Sender<i64>,
    ) -> Enqueue {
        if self
            .seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&objid)
        {
            return Enqueue::AlreadyValid;
        }

        let lane = match priority {
            Priority::TxHi => &self.tx_lane,
            Priority::XreqHi => &self.xreq_lane,
        };
        let job = Job {
            tag,
            objid,
            body,
            reply,
        };
        match lane.try_send(job) {
            Ok(()) => Enqueue::Queued,
            Err(_) => Enqueue::Failed(result_code::SERVER_ERROR),
        }
    }
}

/// build the queue with the built-in state validator
pub fn spawn_state_validator(ctx: Arc<NodeContext>) -> Arc<TxValidator> {
    TxValidator::spawn(ctx, Arc::new(StateValidator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::codec::Writer;

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

    #[test]
    fn parse_roundtrip() {
        let body = tx_body(42, &[[7u8; 32], [8u8; 32]]);
        let summary = parse_tx_summary(&body).unwrap();
        assert_eq!(summary.param_level, 42);
        assert_eq!(summary.serials.len(), 2);
        assert_eq!(summary.outputs.len(), 0);
        assert_eq!(param_level_from_body(&body), Some(42));
    }

    #[test]
    fn truncated_body_rejected() {
        let mut body = tx_body(42, &[[7u8; 32]]);
        body.truncate(body.len() - 1);
        assert!(parse_tx_summary(&body).is_none());

        // declared serial count beyond the cap
        let mut w = Writer::new();
        w.uint(1, 8).uint(200, 1).uint(0, 1);
        assert!(parse_tx_summary(&w.into_inner()).is_none());
    }

    #[test]
    fn duplicate_serial_in_one_tx_rejected() {
        let body = tx_body(1, &[[7u8; 32], [7u8; 32]]);
        let summary = parse_tx_summary(&body).unwrap();
        assert_eq!(summary.serials.len(), 2);
        // the state validator catches the duplicate; exercised in the
        // server integration tests where a context exists
    }

    #[test]
    fn result_strings_cover_codes() {
        assert_eq!(result_string(result_code::ALREADY_SPENT), "INVALID:already spent");
        assert_eq!(result_string(result_code::SERVER_ERROR), "ERROR:server error");
        assert_eq!(result_string(-999), "ERROR:server error");
    }
}
