//! wallet store
//!
//! the same snapshot/batch keyspace the node uses, with wallet tables:
//! billets by id plus secondary indexes for unspent scans, address lookups
//! and commitnum lookups; the per-transaction spend records used for
//! conflict detection; and the totals index. totals are signed 128-bit
//! amounts stored big-endian with leading sign-extension bytes trimmed.

use crate::billet::{bill_status, Billet};
use crate::totals::TotalKey;
use crate::{Result, WalletError};
use shroud_store::kv::{prefix_end, Keyspace, ReadSnapshot, WriteTxn};
use shroud_store::StoreError;
use std::path::Path;

const P_BILLET: u8 = b'B';
const P_UNSPENT: u8 = b'U';
const P_BY_COMMITNUM: u8 = b'C';
const P_BY_ADDRESS: u8 = b'A';
const P_SPEND: u8 = b'S';
const P_TOTAL: u8 = b'T';
const P_TX: u8 = b'X';
const P_PARAM: u8 = b'P';

const PARAM_NEXT_BILLET_ID: u8 = 1;

fn billet_k(id: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(P_BILLET);
    k.extend_from_slice(&id.to_be_bytes());
    k
}

fn unspent_k(amount: u128, id: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(25);
    k.push(P_UNSPENT);
    k.extend_from_slice(&amount.to_be_bytes());
    k.extend_from_slice(&id.to_be_bytes());
    k
}

fn by_commitnum_k(commitnum: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(P_BY_COMMITNUM);
    k.extend_from_slice(&commitnum.to_be_bytes());
    k
}

fn by_address_k(address: &[u8; 32], commitment: &[u8; 32]) -> Vec<u8> {
    let mut k = Vec::with_capacity(65);
    k.push(P_BY_ADDRESS);
    k.extend_from_slice(address);
    k.extend_from_slice(commitment);
    k
}

fn spend_k(billet_id: u64, tx_id: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(17);
    k.push(P_SPEND);
    k.extend_from_slice(&billet_id.to_be_bytes());
    k.extend_from_slice(&tx_id.to_be_bytes());
    k
}

fn total_k(key: &TotalKey) -> Vec<u8> {
    let mut k = Vec::with_capacity(30);
    k.push(P_TOTAL);
    k.push(key.total_type);
    k.extend_from_slice(&key.reference.to_be_bytes());
    k.extend_from_slice(&key.asset.to_be_bytes());
    k.extend_from_slice(&key.delaytime.to_be_bytes());
    k.extend_from_slice(&key.blockchain.to_be_bytes());
    k
}

fn parse_total_k(key: &[u8]) -> Option<TotalKey> {
    if key.len() != 30 || key[0] != P_TOTAL {
        return None;
    }
    Some(TotalKey {
        total_type: key[1],
        reference: u64::from_be_bytes(key[2..10].try_into().ok()?),
        asset: u64::from_be_bytes(key[10..18].try_into().ok()?),
        delaytime: u32::from_be_bytes(key[18..22].try_into().ok()?),
        blockchain: u64::from_be_bytes(key[22..30].try_into().ok()?),
    })
}

fn tx_k(tx_id: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(P_TX);
    k.extend_from_slice(&tx_id.to_be_bytes());
    k
}

/// trim redundant sign-extension bytes from a big-endian i128
fn encode_total(v: i128) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    if v >= 0 {
        while start < 15 && bytes[start] == 0 && bytes[start + 1] < 0x80 {
            start += 1;
        }
    } else {
        while start < 15 && bytes[start] == 0xff && bytes[start + 1] >= 0x80 {
            start += 1;
        }
    }
    bytes[start..].to_vec()
}

fn decode_total(raw: &[u8]) -> Result<i128> {
    if raw.is_empty() || raw.len() > 16 {
        return Err(WalletError::Store(StoreError::Corrupt("totals")));
    }
    let fill = if raw[0] >= 0x80 { 0xff } else { 0x00 };
    let mut bytes = [fill; 16];
    bytes[16 - raw.len()..].copy_from_slice(raw);
    Ok(i128::from_be_bytes(bytes))
}

fn is_unspent_status(status: u8) -> bool {
    matches!(
        status,
        bill_status::SENT | bill_status::CLEARED | bill_status::ALLOCATED
    )
}

pub struct WalletDb {
    ks: Keyspace,
}

impl WalletDb {
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!("opening wallet db at {}", path.display());
        Ok(Self {
            ks: Keyspace::open(path)?,
        })
    }

    pub fn read(&self) -> WalletReader<'_> {
        WalletReader {
            snap: self.ks.begin_read(),
        }
    }

    pub fn write(&self) -> WalletWriter<'_> {
        WalletWriter {
            txn: self.ks.begin_write(),
        }
    }
}

pub struct WalletReader<'a> {
    snap: ReadSnapshot<'a>,
}

impl WalletReader<'_> {
    pub fn billet(&self, id: u64) -> Result<Option<Billet>> {
        match self.snap.get(&billet_k(id))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn billet_id_by_output(
        &self,
        address: &[u8; 32],
        commitment: &[u8; 32],
    ) -> Result<Option<u64>> {
        match self.snap.get(&by_address_k(address, commitment))? {
            Some(raw) => Ok(Some(u64::from_be_bytes(
                raw.try_into()
                    .map_err(|_| StoreError::Corrupt("billet address index"))?,
            ))),
            None => Ok(None),
        }
    }

    pub fn billet_id_by_commitnum(&self, commitnum: u64) -> Result<Option<u64>> {
        match self.snap.get(&by_commitnum_k(commitnum))? {
            Some(raw) => Ok(Some(u64::from_be_bytes(
                raw.try_into()
                    .map_err(|_| StoreError::Corrupt("billet commitnum index"))?,
            ))),
            None => Ok(None),
        }
    }

    /// unspent billets ordered by (amount, id), resuming after the given
    /// position
    pub fn unspent_billets_after(
        &self,
        after: Option<(u128, u64)>,
        limit: usize,
    ) -> Result<Vec<Billet>> {
        let start = match after {
            Some((amount, id)) => {
                let mut k = unspent_k(amount, id);
                // resume strictly after the last row
                k.push(0);
                k
            }
            None => vec![P_UNSPENT],
        };
        let end = prefix_end(&[P_UNSPENT]);

        let mut found = Vec::new();
        for row in self.snap.range(start, end) {
            let (key, _) = row?;
            if found.len() == limit {
                break;
            }
            let id = u64::from_be_bytes(
                key[17..25]
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("unspent index"))?,
            );
            let billet = self
                .billet(id)?
                .ok_or(StoreError::Corrupt("unspent index"))?;
            found.push(billet);
        }
        Ok(found)
    }

    pub fn total(&self, key: &TotalKey) -> Result<i128> {
        match self.snap.get(&total_k(key))? {
            Some(raw) => decode_total(&raw),
            None => Ok(0),
        }
    }

    /// total rows of one (type, reference, asset, delaytime) across a
    /// blockchain range
    pub fn totals_range(
        &self,
        total_type: u8,
        reference: u64,
        asset: u64,
        delaytime: u32,
        min_blockchain: u64,
        max_blockchain: u64,
    ) -> Result<Vec<(TotalKey, i128)>> {
        let start = total_k(&TotalKey {
            total_type,
            reference,
            asset,
            delaytime,
            blockchain: min_blockchain,
        });
        let end = {
            let mut k = total_k(&TotalKey {
                total_type,
                reference,
                asset,
                delaytime,
                blockchain: max_blockchain,
            });
            k.push(0);
            k
        };

        let mut rows = Vec::new();
        for row in self.snap.range(start, end) {
            let (key, value) = row?;
            let key = parse_total_k(&key).ok_or(StoreError::Corrupt("totals"))?;
            rows.push((key, decode_total(&value)?));
        }
        Ok(rows)
    }

    pub fn tx_is_conflicted(&self, tx_id: u64) -> Result<bool> {
        Ok(self
            .snap
            .get(&tx_k(tx_id))?
            .map(|raw| raw.first() == Some(&1))
            .unwrap_or(false))
    }
}

pub struct WalletWriter<'a> {
    txn: WriteTxn<'a>,
}

impl WalletWriter<'_> {
    pub fn billet(&self, id: u64) -> Result<Option<Billet>> {
        match self.txn.get(&billet_k(id))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// claim the next billet id
    pub fn next_billet_id(&mut self) -> Result<u64> {
        let key = vec![P_PARAM, PARAM_NEXT_BILLET_ID];
        let next = match self.txn.get(&key)? {
            Some(raw) if raw.len() == 8 => u64::from_le_bytes(raw.try_into().unwrap()),
            Some(_) => return Err(WalletError::Store(StoreError::Corrupt("params"))),
            None => 1,
        };
        self.txn.put(key, (next + 1).to_le_bytes().to_vec());
        Ok(next)
    }

    /// insert or replace a billet, maintaining every secondary index
    pub fn billet_insert(&mut self, billet: &Billet) -> Result<()> {
        if let Some(old) = self.billet(billet.id)? {
            if is_unspent_status(old.status) {
                self.txn.delete(unspent_k(old.amount, old.id));
            }
        }

        if is_unspent_status(billet.status) {
            self.txn.put(unspent_k(billet.amount, billet.id), Vec::new());
        }
        if billet.commitnum != 0 || billet.status >= bill_status::SENT {
            self.txn.put(
                by_commitnum_k(billet.commitnum),
                billet.id.to_be_bytes().to_vec(),
            );
        }
        self.txn.put(
            by_address_k(&billet.address, &billet.commitment),
            billet.id.to_be_bytes().to_vec(),
        );
        self.txn
            .put(billet_k(billet.id), bincode::serialize(billet)?);
        Ok(())
    }

    /// record that `tx_id` spent `billet_id` with the given hashkey
    pub fn billet_spend_insert(
        &mut self,
        billet_id: u64,
        tx_id: u64,
        hashkey: &[u8; 32],
        tx_commitnum: u64,
    ) -> Result<()> {
        let record = bincode::serialize(&(*hashkey, tx_commitnum))?;
        self.txn.put(spend_k(billet_id, tx_id), record);
        Ok(())
    }

    /// every transaction that recorded a spend of `billet_id`
    pub fn billet_spends(&self, billet_id: u64) -> Result<Vec<(u64, [u8; 32], u64)>> {
        let start = spend_k(billet_id, 0);
        let end = spend_k(billet_id, u64::MAX);
        let mut rows = Vec::new();
        for (key, value) in self.txn.range(start, end)? {
            let tx_id = u64::from_be_bytes(
                key[9..17]
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("billet spends"))?,
            );
            let (hashkey, tx_commitnum): ([u8; 32], u64) = bincode::deserialize(&value)?;
            rows.push((tx_id, hashkey, tx_commitnum));
        }
        Ok(rows)
    }

    pub fn total(&self, key: &TotalKey) -> Result<i128> {
        match self.txn.get(&total_k(key))? {
            Some(raw) => decode_total(&raw),
            None => Ok(0),
        }
    }

    pub fn total_put(&mut self, key: &TotalKey, value: i128) {
        self.txn.put(total_k(key), encode_total(value));
    }

    /// every total row, for administrative resets
    pub fn totals_all(&self) -> Result<Vec<(TotalKey, i128)>> {
        let start = vec![P_TOTAL];
        let end = prefix_end(&start);
        let mut rows = Vec::new();
        for (key, value) in self.txn.range(start, end)? {
            let key = parse_total_k(&key).ok_or(StoreError::Corrupt("totals"))?;
            rows.push((key, decode_total(&value)?));
        }
        Ok(rows)
    }

    /// every billet, for administrative resets
    pub fn billets_all(&self) -> Result<Vec<Billet>> {
        let start = vec![P_BILLET];
        let end = prefix_end(&start);
        let mut rows = Vec::new();
        for (_, value) in self.txn.range(start, end)? {
            rows.push(bincode::deserialize(&value)?);
        }
        Ok(rows)
    }

    pub fn tx_set_conflicted(&mut self, tx_id: u64) {
        self.txn.put(tx_k(tx_id), vec![1]);
    }

    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }
}
