//! commitment tree engine
//!
//! an append-only merkle tree over every created output. leaves arrive one
//! at a time as transactions validate; once per indelible block the tree is
//! extended from the old frontier to the new one and a root is persisted.
//! missing right siblings at the frontier are stood in for by a null value
//! derived from the finalizing block's hash.

use crate::chain::ChainState;
use crate::{NodeError, Result};
use shroud_core::field::FieldElement;
use shroud_core::merkle::{hash_leaf, hash_node, MERKLE_DEPTH};
use shroud_store::{param_key, CommitRoot, Store, StoreWriter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct CommitmentTree {
    next_commitnum: AtomicU64,
    /// first commitnum not yet incorporated into the persisted tree; only
    /// the block finalizer takes this lock
    next_tree_update_commitnum: Mutex<u64>,
}

impl CommitmentTree {
    /// restore counters from the persisted frontier
    pub fn init(store: &Store) -> Result<Self> {
        let row_end = store.read().param_u64(param_key::COMMIT_COMMITNUM_HI)?;
        let next = match row_end {
            Some(hi) => hi + 1,
            None => 0,
        };
        Ok(Self {
            next_commitnum: AtomicU64::new(next),
            next_tree_update_commitnum: Mutex::new(next),
        })
    }

    /// current next commitment number, optionally claiming it
    pub fn next_commitnum(&self, increment: bool) -> u64 {
        if increment {
            self.next_commitnum.fetch_add(1, Ordering::AcqRel)
        } else {
            self.next_commitnum.load(Ordering::Acquire)
        }
    }

    /// insert a new leaf; duplicate commitnums are rejected
    pub fn add_commitment(
        &self,
        w: &mut StoreWriter<'_>,
        commitnum: u64,
        commitment: &FieldElement,
    ) -> Result<()> {
        w.commit_tree_insert(0, commitnum, &commitment.to_bytes())?;
        Ok(())
    }

    /// extend the tree to the current frontier and persist this block's
    /// root. called once per indelible block, inside the block's write
    /// transaction so tree rows and root land together.
    pub fn update_commit_tree(
        &self,
        w: &mut StoreWriter<'_>,
        block_level: u64,
        block_hash: &[u8; 32],
        timestamp: u64,
        blockchain: u64,
    ) -> Result<()> {
        let mut frontier = self
            .next_tree_update_commitnum
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let next = self.next_commitnum.load(Ordering::Acquire);
        let tree_changed = *frontier != next;

        if block_level == 0 || tree_changed {
            w.param_put_u64(param_key::COMMIT_BLOCKLEVEL, block_level);
        }

        // merkle root value when the tree is empty
        let mut root = FieldElement::from_u64(blockchain);

        if tree_changed {
            let mut row_start = *frontier & !1;
            *frontier = next;
            let mut row_end = next - 1;

            // the null sibling is the block hash carried into the field
            let nullhash = FieldElement::from_bytes(block_hash).mul(&FieldElement::from_u64(1));

            w.param_put_u64(param_key::COMMIT_COMMITNUM_HI, row_end);
            w.param_put(param_key::COMMIT_NULL_INPUT, 0, &nullhash.to_bytes());

            for height in 0..MERKLE_DEPTH as u8 {
                let mut offset = row_start;
                while offset <= row_end {
                    let left = self.read_node(w, height, offset)?;

                    let right = if offset >= row_end {
                        nullhash.clone()
                    } else {
                        self.read_node(w, height, offset + 1)?
                    };

                    root = hash_node(&left, &right, (height as usize) < MERKLE_DEPTH - 1);
                    w.commit_tree_insert(height + 1, offset / 2, &root.to_bytes())?;

                    offset += 2;
                }
                row_start = (row_start / 2) & !1;
                row_end /= 2;
            }
        }

        if block_level == 0 || tree_changed {
            w.commit_root_insert(
                block_level,
                &CommitRoot {
                    timestamp: if block_level > 0 { timestamp } else { 0 },
                    next_commitnum: next,
                    root: root.to_bytes(),
                },
            )?;
        }

        Ok(())
    }

    fn read_node(&self, w: &StoreWriter<'_>, height: u8, offset: u64) -> Result<FieldElement> {
        let raw = w
            .commit_tree_node(height, offset)?
            .ok_or(NodeError::Corrupt("commit_tree row missing"))?;
        let value = FieldElement::from_bytes(&raw);
        if height == 0 {
            Ok(hash_leaf(&value, offset))
        } else {
            Ok(value)
        }
    }

    /// run the block-finalization transaction: extend the tree, persist the
    /// root, then publish the new indelible block. any failure aborts the
    /// whole batch and trips the fatal-error path.
    pub fn finalize_block(
        &self,
        store: &Store,
        chain: &ChainState,
        block_level: u64,
        block_hash: &[u8; 32],
        timestamp: u64,
        blockchain: u64,
    ) -> Result<()> {
        let mut w = store.write();
        let result = self
            .update_commit_tree(&mut w, block_level, block_hash, timestamp, blockchain)
            .and_then(|_| w.commit().map_err(Into::into));
        match result {
            Ok(()) => {
                chain.set_indelible(block_level, timestamp);
                Ok(())
            }
            Err(e) => {
                chain.set_fatal_error(&format!(
                    "error updating commit tree at level {block_level}: {e}"
                ));
                Err(e)
            }
        }
    }
}

/// one merkle path read under a snapshot; every entry is the sibling hash at
/// one height, leaf level first
pub struct MerklePath {
    pub commitnum: u64,
    pub path: Vec<FieldElement>,
}

/// read the sibling path for `commitnum` from persisted tree rows.
/// `row_end` is the highest leaf in the tree and `nullhash` the persisted
/// null sibling; both must come from the same snapshot as the reads.
pub fn read_merkle_path(
    reader: &shroud_store::store::StoreReader<'_>,
    commitnum: u64,
    row_end: u64,
    nullhash: &FieldElement,
) -> Result<MerklePath> {
    let mut path = Vec::with_capacity(MERKLE_DEPTH);
    let mut offset = commitnum;
    let mut end = row_end;

    for height in 0..MERKLE_DEPTH as u8 {
        let sibling = offset ^ 1;
        if sibling > end {
            path.push(nullhash.clone());
        } else {
            let raw = reader
                .commit_tree_node(height, sibling)?
                .ok_or(NodeError::Corrupt("commit_tree row missing"))?;
            let value = FieldElement::from_bytes(&raw);
            path.push(if height == 0 {
                hash_leaf(&value, sibling)
            } else {
                value
            });
        }
        offset /= 2;
        end /= 2;
    }

    Ok(MerklePath { commitnum, path })
}
