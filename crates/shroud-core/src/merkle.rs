//! commit-tree hashing
//!
//! the tree is a dense append-only merkle tree of fixed depth over all
//! created commitments. leaves hash the commitment together with its offset
//! so identical commitments at different positions stay distinct; interior
//! nodes carry a nonroot marker so the root hash cannot collide with an
//! interior hash.

use crate::field::FieldElement;
use crate::{LEAF_DOMAIN, NODE_DOMAIN};

/// height of the commit tree; height 0 holds leaves, `MERKLE_DEPTH` the root
pub const MERKLE_DEPTH: usize = 40;

/// hash a commitment into its height-0 tree value
pub fn hash_leaf(commitment: &FieldElement, offset: u64) -> FieldElement {
    let mut hasher = blake3::Hasher::new();
    hasher.update(LEAF_DOMAIN);
    hasher.update(&commitment.to_bytes());
    hasher.update(&offset.to_le_bytes());
    FieldElement::from_bytes(hasher.finalize().as_bytes())
}

/// hash two children into their parent value
pub fn hash_node(left: &FieldElement, right: &FieldElement, nonroot: bool) -> FieldElement {
    let mut hasher = blake3::Hasher::new();
    hasher.update(NODE_DOMAIN);
    hasher.update(&left.to_bytes());
    hasher.update(&right.to_bytes());
    hasher.update(&[nonroot as u8]);
    FieldElement::from_bytes(hasher.finalize().as_bytes())
}

/// reduce a merkle path bottom-up to the root it implies. `path` holds the
/// sibling at each height starting from the leaf level; the bits of
/// `commitnum` pick which side each sibling sits on.
pub fn reduce_path(
    commitnum: u64,
    commitment: &FieldElement,
    path: &[FieldElement],
) -> FieldElement {
    let mut hash = hash_leaf(commitment, commitnum);
    let mut offset = commitnum;
    for (height, sibling) in path.iter().enumerate() {
        let nonroot = height < path.len() - 1;
        hash = if offset & 1 == 0 {
            hash_node(&hash, sibling, nonroot)
        } else {
            hash_node(sibling, &hash, nonroot)
        };
        offset /= 2;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_position_matters() {
        let c = FieldElement::from_u64(12345);
        assert_ne!(hash_leaf(&c, 0), hash_leaf(&c, 1));
    }

    #[test]
    fn node_order_and_level_matter() {
        let a = FieldElement::from_u64(1);
        let b = FieldElement::from_u64(2);
        assert_ne!(hash_node(&a, &b, true), hash_node(&b, &a, true));
        assert_ne!(hash_node(&a, &b, true), hash_node(&a, &b, false));
    }
}
