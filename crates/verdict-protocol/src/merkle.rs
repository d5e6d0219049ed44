//! Merkle root over receipt hashes.
//!
//! Pairwise keccak of concatenated nodes; an odd level duplicates its final
//! node; the empty set maps to the reserved sentinel `0x0`; a single leaf is
//! its own root.

use sha3::{Digest, Keccak256};

use verdict_core::constants::ZERO_HASH_SENTINEL;
use verdict_core::VerdictError;

/// Compute the Merkle root of `leaves` (each a `0x`-prefixed hex digest), in
/// the order given.
pub fn merkle_root(leaves: &[String]) -> Result<String, VerdictError> {
    if leaves.is_empty() {
        return Ok(ZERO_HASH_SENTINEL.to_string());
    }

    let mut level: Vec<Vec<u8>> = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        let stripped = leaf.strip_prefix("0x").unwrap_or(leaf);
        let bytes = hex::decode(stripped)
            .map_err(|e| VerdictError::Validation(format!("invalid merkle leaf {leaf}: {e}")))?;
        level.push(bytes);
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            let mut hasher = Keccak256::new();
            hasher.update(left);
            hasher.update(right);
            next.push(hasher.finalize().to_vec());
        }
        level = next;
    }

    Ok(format!("0x{}", hex::encode(&level[0])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::keccak_hex;

    fn leaf(n: u8) -> String {
        keccak_hex(&[n])
    }

    #[test]
    fn empty_input_yields_sentinel() {
        assert_eq!(merkle_root(&[]).unwrap(), "0x0");
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let l = leaf(1);
        assert_eq!(merkle_root(&[l.clone()]).unwrap(), l);
    }

    #[test]
    fn deterministic_and_order_sensitive() {
        let a = [leaf(1), leaf(2), leaf(3)];
        let b = [leaf(2), leaf(1), leaf(3)];
        assert_eq!(merkle_root(&a).unwrap(), merkle_root(&a).unwrap());
        assert_ne!(merkle_root(&a).unwrap(), merkle_root(&b).unwrap());
    }

    #[test]
    fn odd_level_duplicates_last_leaf() {
        // [a, b, c] pads to [a, b, c, c]; without the duplication rule the
        // third leaf would be promoted unhashed and yield a different root.
        let leaves = [leaf(1), leaf(2), leaf(3)];
        let root = merkle_root(&leaves).unwrap();

        let ab = {
            let mut data = hex::decode(&leaf(1)[2..]).unwrap();
            data.extend(hex::decode(&leaf(2)[2..]).unwrap());
            keccak_hex(&data)
        };
        let cc = {
            let mut data = hex::decode(&leaf(3)[2..]).unwrap();
            data.extend(hex::decode(&leaf(3)[2..]).unwrap());
            keccak_hex(&data)
        };
        let expected = {
            let mut data = hex::decode(&ab[2..]).unwrap();
            data.extend(hex::decode(&cc[2..]).unwrap());
            keccak_hex(&data)
        };
        assert_eq!(root, expected);

        // Promotion-without-duplication would be keccak(ab || c).
        let promoted = {
            let mut data = hex::decode(&ab[2..]).unwrap();
            data.extend(hex::decode(&leaf(3)[2..]).unwrap());
            keccak_hex(&data)
        };
        assert_ne!(root, promoted);
    }

    #[test]
    fn rejects_non_hex_leaf() {
        assert!(merkle_root(&["0xzz".to_string()]).is_err());
    }
}
