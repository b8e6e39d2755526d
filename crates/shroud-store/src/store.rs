//! typed tables over the keyspace
//!
//! readers wrap a snapshot, writers wrap a staged transaction. key layouts
//! put the scan dimension last so range iteration walks commitnums, rates
//! and match numbers in order.

use crate::kv::{prefix_end, Keyspace, ReadSnapshot, WriteTxn};
use crate::{param_key, Result, StoreError};
use serde::{Deserialize, Serialize};
use shroud_core::xreq::Xreq;
use shroud_core::xmatch::Xmatch;
use shroud_core::FIELD_BYTES;
use std::path::Path;

const P_PARAM: u8 = b'P';
const P_TREE: u8 = b'T';
const P_ROOT: u8 = b'R';
const P_ROOT_BY_COMMITNUM: u8 = b'C';
const P_OUTPUT: u8 = b'O';
const P_SERIAL: u8 = b'S';
const P_SERIAL_PENDING: u8 = b'Q';
const P_XREQ: u8 = b'X';
const P_XREQ_RATE: u8 = b'Y';
const P_XREQ_PENDING_RATE: u8 = b'Z';
const P_XMATCH: u8 = b'M';
const P_XMATCH_BY_REQNUM: u8 = b'N';
const P_XMATCH_BY_OBJID: u8 = b'B';

fn param_k(key: u8, subkey: u8) -> Vec<u8> {
    vec![P_PARAM, key, subkey]
}

fn tree_k(height: u8, offset: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(10);
    k.push(P_TREE);
    k.push(height);
    k.extend_from_slice(&offset.to_be_bytes());
    k
}

fn root_k(level: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(P_ROOT);
    k.extend_from_slice(&level.to_be_bytes());
    k
}

fn root_by_commitnum_k(next_commitnum: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(P_ROOT_BY_COMMITNUM);
    k.extend_from_slice(&next_commitnum.to_be_bytes());
    k
}

fn output_k(address: &[u8; 32], commitnum: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(41);
    k.push(P_OUTPUT);
    k.extend_from_slice(address);
    k.extend_from_slice(&commitnum.to_be_bytes());
    k
}

fn serial_k(serial: &[u8; 32]) -> Vec<u8> {
    let mut k = Vec::with_capacity(33);
    k.push(P_SERIAL);
    k.extend_from_slice(serial);
    k
}

fn serial_pending_k(serial: &[u8; 32]) -> Vec<u8> {
    let mut k = Vec::with_capacity(33);
    k.push(P_SERIAL_PENDING);
    k.extend_from_slice(serial);
    k
}

fn xreq_k(xreqnum: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(P_XREQ);
    k.extend_from_slice(&xreqnum.to_be_bytes());
    k
}

fn xreq_rate_k(asset_hash: &[u8; 8], wire_rate: u32, xreqnum: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(21);
    k.push(P_XREQ_RATE);
    k.extend_from_slice(asset_hash);
    k.extend_from_slice(&wire_rate.to_be_bytes());
    k.extend_from_slice(&xreqnum.to_be_bytes());
    k
}

fn xreq_pending_rate_k(wire_rate: u32, xreqnum: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(13);
    k.push(P_XREQ_PENDING_RATE);
    k.extend_from_slice(&wire_rate.to_be_bytes());
    k.extend_from_slice(&xreqnum.to_be_bytes());
    k
}

fn xmatch_k(xmatchnum: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(P_XMATCH);
    k.extend_from_slice(&xmatchnum.to_be_bytes());
    k
}

fn xmatch_by_reqnum_k(xreqnum: u64, xmatchnum: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(17);
    k.push(P_XMATCH_BY_REQNUM);
    k.extend_from_slice(&xreqnum.to_be_bytes());
    k.extend_from_slice(&xmatchnum.to_be_bytes());
    k
}

fn xmatch_by_objid_k(objid: &[u8; 32], xreqnum: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(41);
    k.push(P_XMATCH_BY_OBJID);
    k.extend_from_slice(objid);
    k.extend_from_slice(&xreqnum.to_be_bytes());
    k
}

fn be_u64(bytes: &[u8]) -> Option<u64> {
    bytes.try_into().ok().map(u64::from_be_bytes)
}

/// one root record per indelible block with tree changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRoot {
    pub timestamp: u64,
    pub next_commitnum: u64,
    pub root: [u8; FIELD_BYTES],
}

/// an output row as served to address-polling wallets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputRow {
    pub domain: u32,
    pub asset_enc: u64,
    pub amount_enc: u64,
    pub commit_iv: [u8; 16],
    pub commitment: [u8; FIELD_BYTES],
    pub commitnum: u64,
}

/// spend state of a serial number
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialStatus {
    Unspent,
    Pending,
    Indelible { hashkey: [u8; 32], tx_commitnum: u64 },
}

/// rate-ordered scan parameters for the exchange book
#[derive(Debug, Clone)]
pub struct XreqScan {
    pub type_min: u8,
    pub type_max: u8,
    pub base_asset: u64,
    pub quote_asset: u64,
    pub foreign_asset: String,
    pub min_amount: u128,
    pub max_amount: u128,
    /// starting rate bucket, inclusive
    pub start_wire_rate: u32,
    /// scan from high rates down instead of low rates up
    pub descending: bool,
    /// rows skipped inside the starting bucket only
    pub offset: u16,
    pub maxret: usize,
    /// open-rate scans: whether pending-matched requests appear at all
    pub include_pending_matched: bool,
}

impl XreqScan {
    fn matches(&self, xreq: &Xreq) -> bool {
        if xreq.xcx_type < self.type_min || xreq.xcx_type > self.type_max {
            return false;
        }
        if xreq.base_asset != self.base_asset || xreq.quote_asset != self.quote_asset {
            return false;
        }
        if xreq.foreign_asset != self.foreign_asset {
            return false;
        }
        if self.min_amount != 0 && xreq.max_amount < self.min_amount {
            return false;
        }
        if self.max_amount != 0 && xreq.min_amount > self.max_amount {
            return false;
        }
        true
    }
}

pub struct Store {
    ks: Keyspace,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!("opening node store at {}", path.display());
        Ok(Self {
            ks: Keyspace::open(path)?,
        })
    }

    pub fn read(&self) -> StoreReader<'_> {
        StoreReader {
            snap: self.ks.begin_read(),
        }
    }

    pub fn write(&self) -> StoreWriter<'_> {
        StoreWriter {
            txn: self.ks.begin_write(),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.ks.flush()
    }
}

pub struct StoreReader<'a> {
    snap: ReadSnapshot<'a>,
}

impl StoreReader<'_> {
    pub fn param(&self, key: u8, subkey: u8) -> Result<Option<Vec<u8>>> {
        self.snap.get(&param_k(key, subkey))
    }

    pub fn param_u64(&self, key: u8) -> Result<Option<u64>> {
        match self.param(key, 0)? {
            Some(raw) if raw.len() == 8 => {
                Ok(Some(u64::from_le_bytes(raw.try_into().unwrap())))
            }
            Some(_) => Err(StoreError::Corrupt("params")),
            None => Ok(None),
        }
    }

    pub fn commit_tree_node(&self, height: u8, offset: u64) -> Result<Option<[u8; FIELD_BYTES]>> {
        match self.snap.get(&tree_k(height, offset))? {
            Some(raw) => Ok(Some(
                raw.try_into().map_err(|_| StoreError::Corrupt("commit_tree"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn commit_root_at_level(&self, level: u64) -> Result<Option<CommitRoot>> {
        match self.snap.get(&root_k(level))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// the root whose tree covers `commitnum`, with its level
    pub fn commit_root_for_commitnum(&self, commitnum: u64) -> Result<Option<(u64, CommitRoot)>> {
        let start = root_by_commitnum_k(commitnum.saturating_add(1));
        let end = prefix_end(&[P_ROOT_BY_COMMITNUM]);
        for row in self.snap.range(start, end) {
            let (_, value) = row?;
            let level = be_u64(&value).ok_or(StoreError::Corrupt("commit_roots_by_commitnum"))?;
            return match self.commit_root_at_level(level)? {
                Some(root) => Ok(Some((level, root))),
                None => Err(StoreError::Corrupt("commit_roots")),
            };
        }
        Ok(None)
    }

    /// outputs for `address` with commitnum >= `commitstart`, oldest first
    pub fn tx_outputs(
        &self,
        address: &[u8; 32],
        commitstart: u64,
        maxret: usize,
    ) -> Result<(Vec<TxOutputRow>, bool)> {
        let start = output_k(address, commitstart);
        let mut end = vec![P_OUTPUT];
        end.extend_from_slice(address);
        let end = prefix_end(&end);

        let mut rows = Vec::new();
        let mut have_more = false;
        for row in self.snap.range(start, end) {
            let (_, value) = row?;
            if rows.len() == maxret {
                have_more = true;
                break;
            }
            rows.push(bincode::deserialize(&value)?);
        }
        Ok((rows, have_more))
    }

    pub fn serial_status(&self, serial: &[u8; 32]) -> Result<SerialStatus> {
        if let Some(raw) = self.snap.get(&serial_k(serial))? {
            let (hashkey, tx_commitnum): ([u8; 32], u64) = bincode::deserialize(&raw)?;
            return Ok(SerialStatus::Indelible {
                hashkey,
                tx_commitnum,
            });
        }
        if self.snap.contains(&serial_pending_k(serial))? {
            return Ok(SerialStatus::Pending);
        }
        Ok(SerialStatus::Unspent)
    }

    pub fn xreq(&self, xreqnum: u64) -> Result<Option<Xreq>> {
        match self.snap.get(&xreq_k(xreqnum))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn load_xreq(&self, xreqnum: u64) -> Result<Xreq> {
        self.xreq(xreqnum)?.ok_or(StoreError::Corrupt("xreqs"))
    }

    /// scan the open-rate index in rate order. `offset` rows are skipped
    /// only while the scan remains inside the starting wire bucket, which
    /// bounds offset paging to one bucket and forces rate-based paging
    /// across buckets.
    pub fn xreqs_select_open_rate(&self, scan: &XreqScan) -> Result<(Vec<Xreq>, bool)> {
        let asset_hash = Xreq::foreign_asset_hash(&scan.foreign_asset);
        let mut table_start = vec![P_XREQ_RATE];
        table_start.extend_from_slice(&asset_hash);
        let table_end = prefix_end(&table_start);

        let (start, end) = if scan.descending {
            // [asset start, bucket end)
            (
                table_start,
                xreq_rate_k(&asset_hash, scan.start_wire_rate, u64::MAX),
            )
        } else {
            (xreq_rate_k(&asset_hash, scan.start_wire_rate, 0), table_end)
        };

        let rows: Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> = if scan.descending {
            Box::new(self.snap.range_rev(start, end))
        } else {
            Box::new(self.snap.range(start, end))
        };

        self.collect_rate_scan(scan, rows, |key| {
            // key = prefix(1) + asset hash(8) + wire rate(4) + xreqnum(8)
            let wire = u32::from_be_bytes(key[9..13].try_into().unwrap());
            let xreqnum = be_u64(&key[13..21]).unwrap();
            (wire, xreqnum)
        })
    }

    /// scan the pending-match-rate index in rate order, same offset rule
    pub fn xreqs_select_pending_match_rate(&self, scan: &XreqScan) -> Result<(Vec<Xreq>, bool)> {
        let table_start = vec![P_XREQ_PENDING_RATE];
        let table_end = prefix_end(&table_start);

        let (start, end) = if scan.descending {
            (
                table_start,
                xreq_pending_rate_k(scan.start_wire_rate, u64::MAX),
            )
        } else {
            (xreq_pending_rate_k(scan.start_wire_rate, 0), table_end)
        };

        let rows: Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> = if scan.descending {
            Box::new(self.snap.range_rev(start, end))
        } else {
            Box::new(self.snap.range(start, end))
        };

        self.collect_rate_scan(scan, rows, |key| {
            // key = prefix(1) + wire rate(4) + xreqnum(8)
            let wire = u32::from_be_bytes(key[1..5].try_into().unwrap());
            let xreqnum = be_u64(&key[5..13]).unwrap();
            (wire, xreqnum)
        })
    }

    fn collect_rate_scan(
        &self,
        scan: &XreqScan,
        rows: impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
        parse_key: impl Fn(&[u8]) -> (u32, u64),
    ) -> Result<(Vec<Xreq>, bool)> {
        let mut found = Vec::new();
        let mut have_more = false;
        let mut skipped = 0u16;
        let mut offset_bucket: Option<u32> = None;

        for row in rows {
            let (key, _) = row?;
            let (wire, xreqnum) = parse_key(&key);

            let xreq = self.load_xreq(xreqnum)?;
            if !scan.matches(&xreq) {
                continue;
            }
            if !scan.include_pending_matched && xreq.pending_match_rate != 0.0 {
                continue;
            }
            // a nonzero offset confines the scan to the first matching
            // rate bucket; paging past a bucket must use rate paging
            if scan.offset > 0 {
                let bucket = *offset_bucket.get_or_insert(wire);
                if wire != bucket {
                    have_more = true;
                    break;
                }
                if skipped < scan.offset {
                    skipped += 1;
                    continue;
                }
            }
            if found.len() == scan.maxret {
                have_more = true;
                break;
            }
            found.push(xreq);
        }
        Ok((found, have_more))
    }

    pub fn xmatch(&self, xmatchnum: u64) -> Result<Option<Xmatch>> {
        match self.snap.get(&xmatch_k(xmatchnum))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// first match of `xreqnum` with match number >= `from_matchnum`
    pub fn xmatch_for_reqnum(&self, xreqnum: u64, from_matchnum: u64) -> Result<Option<Xmatch>> {
        let start = xmatch_by_reqnum_k(xreqnum, from_matchnum);
        let end = xmatch_by_reqnum_k(xreqnum, u64::MAX);
        for row in self.snap.range(start, end) {
            let (key, _) = row?;
            let xmatchnum = be_u64(&key[9..17]).ok_or(StoreError::Corrupt("xmatch_by_reqnum"))?;
            return self.xmatch(xmatchnum)?.map(Some).ok_or(StoreError::Corrupt("xmatches"));
        }
        Ok(None)
    }

    /// highest xreqnum whose request carries `objid`
    pub fn xreqnum_for_objid(&self, objid: &[u8; 32]) -> Result<Option<u64>> {
        let mut start = vec![P_XMATCH_BY_OBJID];
        start.extend_from_slice(objid);
        let end = prefix_end(&start);
        for row in self.snap.range_rev(start, end) {
            let (key, _) = row?;
            let xreqnum = be_u64(&key[33..41]).ok_or(StoreError::Corrupt("xmatch_by_objid"))?;
            return Ok(Some(xreqnum));
        }
        Ok(None)
    }
}

pub struct StoreWriter<'a> {
    txn: WriteTxn<'a>,
}

impl StoreWriter<'_> {
    pub fn param_put(&mut self, key: u8, subkey: u8, value: &[u8]) {
        self.txn.put(param_k(key, subkey), value.to_vec());
    }

    pub fn param_put_u64(&mut self, key: u8, value: u64) {
        self.param_put(key, 0, &value.to_le_bytes());
    }

    pub fn param_get_u64(&self, key: u8) -> Result<Option<u64>> {
        match self.txn.get(&param_k(key, 0))? {
            Some(raw) if raw.len() == 8 => {
                Ok(Some(u64::from_le_bytes(raw.try_into().unwrap())))
            }
            Some(_) => Err(StoreError::Corrupt("params")),
            None => Ok(None),
        }
    }

    pub fn commit_tree_node(&self, height: u8, offset: u64) -> Result<Option<[u8; FIELD_BYTES]>> {
        match self.txn.get(&tree_k(height, offset))? {
            Some(raw) => Ok(Some(
                raw.try_into().map_err(|_| StoreError::Corrupt("commit_tree"))?,
            )),
            None => Ok(None),
        }
    }

    /// insert a tree node; height-0 inserts reject duplicates
    pub fn commit_tree_insert(
        &mut self,
        height: u8,
        offset: u64,
        value: &[u8; FIELD_BYTES],
    ) -> Result<()> {
        let key = tree_k(height, offset);
        if height == 0 && self.txn.contains(&key)? {
            return Err(StoreError::DuplicateCommitment(offset));
        }
        self.txn.put(key, value.to_vec());
        Ok(())
    }

    /// insert a commit root; a level is written exactly once
    pub fn commit_root_insert(&mut self, level: u64, root: &CommitRoot) -> Result<()> {
        let key = root_k(level);
        if self.txn.contains(&key)? {
            return Err(StoreError::DuplicateCommitRoot(level));
        }
        self.txn.put(key, bincode::serialize(root)?);
        self.txn.put(
            root_by_commitnum_k(root.next_commitnum),
            level.to_be_bytes().to_vec(),
        );
        Ok(())
    }

    pub fn tx_output_insert(&mut self, address: &[u8; 32], row: &TxOutputRow) -> Result<()> {
        self.txn
            .put(output_k(address, row.commitnum), bincode::serialize(row)?);
        Ok(())
    }

    pub fn serial_insert_pending(&mut self, serial: &[u8; 32]) {
        self.txn.put(serial_pending_k(serial), Vec::new());
    }

    pub fn serial_remove_pending(&mut self, serial: &[u8; 32]) {
        self.txn.delete(serial_pending_k(serial));
    }

    pub fn serial_insert_indelible(
        &mut self,
        serial: &[u8; 32],
        hashkey: &[u8; 32],
        tx_commitnum: u64,
    ) -> Result<()> {
        let record = bincode::serialize(&(*hashkey, tx_commitnum))?;
        self.txn.put(serial_k(serial), record);
        Ok(())
    }

    pub fn serial_is_indelible(&self, serial: &[u8; 32]) -> Result<bool> {
        self.txn.contains(&serial_k(serial))
    }

    /// insert or replace a request, maintaining both rate indexes
    pub fn xreq_insert(&mut self, xreq: &Xreq) -> Result<()> {
        if let Some(old) = match self.txn.get(&xreq_k(xreq.xreqnum))? {
            Some(raw) => Some(bincode::deserialize::<Xreq>(&raw)?),
            None => None,
        } {
            self.remove_xreq_indexes(&old);
        }
        let asset_hash = Xreq::foreign_asset_hash(&xreq.foreign_asset);
        let wire = shroud_core::unifloat::wire_encode(xreq.open_rate_required) as u32;
        self.txn
            .put(xreq_rate_k(&asset_hash, wire, xreq.xreqnum), Vec::new());
        if xreq.pending_match_rate != 0.0 {
            let pending_wire = shroud_core::unifloat::wire_encode(xreq.pending_match_rate) as u32;
            self.txn
                .put(xreq_pending_rate_k(pending_wire, xreq.xreqnum), Vec::new());
        }
        self.txn.put(xreq_k(xreq.xreqnum), bincode::serialize(xreq)?);
        Ok(())
    }

    fn remove_xreq_indexes(&mut self, xreq: &Xreq) {
        let asset_hash = Xreq::foreign_asset_hash(&xreq.foreign_asset);
        let wire = shroud_core::unifloat::wire_encode(xreq.open_rate_required) as u32;
        self.txn.delete(xreq_rate_k(&asset_hash, wire, xreq.xreqnum));
        if xreq.pending_match_rate != 0.0 {
            let pending_wire = shroud_core::unifloat::wire_encode(xreq.pending_match_rate) as u32;
            self.txn
                .delete(xreq_pending_rate_k(pending_wire, xreq.xreqnum));
        }
    }

    pub fn xreq_remove(&mut self, xreqnum: u64) -> Result<()> {
        if let Some(raw) = self.txn.get(&xreq_k(xreqnum))? {
            let xreq: Xreq = bincode::deserialize(&raw)?;
            self.remove_xreq_indexes(&xreq);
            self.txn.delete(xreq_k(xreqnum));
        }
        Ok(())
    }

    /// insert a match, indexing both sides by request number and object id
    pub fn xmatch_insert(&mut self, xmatch: &Xmatch) -> Result<()> {
        self.txn
            .put(xmatch_k(xmatch.xmatchnum), bincode::serialize(xmatch)?);
        for side in [&xmatch.xbuy, &xmatch.xsell] {
            self.txn
                .put(xmatch_by_reqnum_k(side.xreqnum, xmatch.xmatchnum), Vec::new());
            self.txn
                .put(xmatch_by_objid_k(&side.objid, side.xreqnum), Vec::new());
        }
        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        self.txn.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::unifloat;
    use shroud_core::xreq::xcx_type;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(dir.path()).unwrap()
    }

    fn sell_req(xreqnum: u64, rate: f64) -> Xreq {
        Xreq {
            xreqnum,
            xcx_type: xcx_type::SIMPLE_SELL,
            foreign_asset: "BTC".into(),
            min_amount: 1,
            max_amount: 1000,
            open_amount: 1000,
            open_rate_required: rate,
            ..Default::default()
        }
    }

    fn sell_scan(start_rate: f64) -> XreqScan {
        XreqScan {
            type_min: xcx_type::NAKED_SELL,
            type_max: xcx_type::SIMPLE_SELL,
            base_asset: 0,
            quote_asset: 0,
            foreign_asset: "BTC".into(),
            min_amount: 0,
            max_amount: 0,
            start_wire_rate: unifloat::wire_encode(start_rate) as u32,
            descending: false,
            offset: 0,
            maxret: 20,
            include_pending_matched: false,
        }
    }

    #[test]
    fn serial_status_law() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let s1 = [1u8; 32];
        let s2 = [2u8; 32];

        assert_eq!(store.read().serial_status(&s1).unwrap(), SerialStatus::Unspent);

        let mut w = store.write();
        w.serial_insert_pending(&s1);
        w.commit().unwrap();

        let r = store.read();
        assert_eq!(r.serial_status(&s1).unwrap(), SerialStatus::Pending);
        assert_eq!(r.serial_status(&s2).unwrap(), SerialStatus::Unspent);
        drop(r);

        let mut w = store.write();
        w.serial_insert_indelible(&s1, &[9u8; 32], 42).unwrap();
        w.commit().unwrap();

        // indelible wins regardless of a lingering pending entry
        assert_eq!(
            store.read().serial_status(&s1).unwrap(),
            SerialStatus::Indelible {
                hashkey: [9u8; 32],
                tx_commitnum: 42
            }
        );
    }

    #[test]
    fn commit_roots_insert_once_and_lookup_by_commitnum() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let root0 = CommitRoot {
            timestamp: 0,
            next_commitnum: 0,
            root: [1u8; 32],
        };
        let root5 = CommitRoot {
            timestamp: 100,
            next_commitnum: 5,
            root: [2u8; 32],
        };

        let mut w = store.write();
        w.commit_root_insert(0, &root0).unwrap();
        w.commit_root_insert(3, &root5).unwrap();
        assert!(matches!(
            w.commit_root_insert(3, &root5),
            Err(StoreError::DuplicateCommitRoot(3))
        ));
        w.commit().unwrap();

        let r = store.read();
        assert_eq!(r.commit_root_at_level(3).unwrap(), Some(root5.clone()));
        // commitnums 0..4 are covered by the level-3 root
        assert_eq!(r.commit_root_for_commitnum(0).unwrap(), Some((3, root5.clone())));
        assert_eq!(r.commit_root_for_commitnum(4).unwrap(), Some((3, root5)));
        assert_eq!(r.commit_root_for_commitnum(5).unwrap(), None);
    }

    #[test]
    fn tx_outputs_page_in_commitnum_order() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let addr = [7u8; 32];

        let mut w = store.write();
        for commitnum in [3u64, 1, 2] {
            w.tx_output_insert(
                &addr,
                &TxOutputRow {
                    domain: 1,
                    asset_enc: 0,
                    amount_enc: commitnum,
                    commit_iv: [0; 16],
                    commitment: [commitnum as u8; 32],
                    commitnum,
                },
            )
            .unwrap();
        }
        w.commit().unwrap();

        let r = store.read();
        let (rows, have_more) = r.tx_outputs(&addr, 0, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(have_more);
        assert_eq!(rows[0].commitnum, 1);
        assert_eq!(rows[1].commitnum, 2);

        let (rows, have_more) = r.tx_outputs(&addr, 2, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!have_more);
    }

    #[test]
    fn open_rate_scan_orders_and_buckets() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let mut w = store.write();
        for (num, rate) in [(1u64, 2.0), (2, 1.0), (3, 1.0), (4, 3.0)] {
            w.xreq_insert(&sell_req(num, rate)).unwrap();
        }
        w.commit().unwrap();

        let r = store.read();
        let (found, more) = r.xreqs_select_open_rate(&sell_scan(0.0)).unwrap();
        assert!(!more);
        let nums: Vec<u64> = found.iter().map(|x| x.xreqnum).collect();
        // ascending rate, id order inside a bucket
        assert_eq!(nums, vec![2, 3, 1, 4]);

        // offset applies inside the first matching bucket and confines
        // the scan to it
        let mut scan = sell_scan(0.0);
        scan.offset = 1;
        let (found, more) = r.xreqs_select_open_rate(&scan).unwrap();
        let nums: Vec<u64> = found.iter().map(|x| x.xreqnum).collect();
        assert_eq!(nums, vec![3]);
        assert!(more);

        // starting at a higher bucket skips lower rates entirely
        let (found, _) = r.xreqs_select_open_rate(&sell_scan(2.0)).unwrap();
        let nums: Vec<u64> = found.iter().map(|x| x.xreqnum).collect();
        assert_eq!(nums, vec![1, 4]);
    }

    #[test]
    fn xmatch_indexes() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let mut m = Xmatch {
            xmatchnum: 10,
            ..Default::default()
        };
        m.xbuy.xreqnum = 100;
        m.xbuy.objid = [0xaa; 32];
        m.xsell.xreqnum = 200;
        m.xsell.objid = [0xbb; 32];

        let mut w = store.write();
        w.xmatch_insert(&m).unwrap();
        w.commit().unwrap();

        let r = store.read();
        assert_eq!(r.xmatch(10).unwrap().unwrap().xmatchnum, 10);
        assert_eq!(r.xmatch_for_reqnum(100, 0).unwrap().unwrap().xmatchnum, 10);
        assert_eq!(r.xmatch_for_reqnum(200, 11).unwrap(), None);
        assert_eq!(r.xreqnum_for_objid(&[0xaa; 32]).unwrap(), Some(100));
        assert_eq!(r.xreqnum_for_objid(&[0xcc; 32]).unwrap(), None);
    }
}
