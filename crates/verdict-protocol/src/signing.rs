//! EIP-191 "personal message" signatures over protocol digests.
//!
//! The signed message is the 32 raw bytes of a document hash, prefixed with
//! `"\x19Ethereum Signed Message:\n32"` and keccak'd. Signatures are 65-byte
//! `r || s || v` hex with `v ∈ {27, 28}`. Recovery yields the signer's
//! address; comparisons are checksum-aware through [`Address`].

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use verdict_core::constants::DID_PREFIX;
use verdict_core::{Address, Digest32, VerdictError};

const EIP191_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

fn signing_key_from_hex(private_key: &str) -> Result<SigningKey, VerdictError> {
    let stripped = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = Zeroizing::new(
        hex::decode(stripped)
            .map_err(|e| VerdictError::Validation(format!("invalid private key hex: {e}")))?,
    );
    SigningKey::from_slice(&bytes)
        .map_err(|e| VerdictError::Validation(format!("invalid private key: {e}")))
}

fn eip191_prehash(digest_hex: &str) -> Result<[u8; 32], VerdictError> {
    let digest = Digest32::from_hex(digest_hex)?;
    let mut hasher = Keccak256::new();
    hasher.update(EIP191_PREFIX);
    hasher.update(digest.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}

fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let digest = Keccak256::digest(&encoded.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    Address::from_bytes(addr)
}

/// Derive the address controlled by a raw private key.
pub fn address_from_private_key(private_key: &str) -> Result<Address, VerdictError> {
    let key = signing_key_from_hex(private_key)?;
    Ok(address_from_verifying_key(key.verifying_key()))
}

/// Sign `digest_hex` (a `0x…` 32-byte document hash) with the EIP-191
/// personal-message prefix. Returns 65-byte `0x…` hex.
pub fn sign_hash_eip191(private_key: &str, digest_hex: &str) -> Result<String, VerdictError> {
    let key = signing_key_from_hex(private_key)?;
    let prehash = eip191_prehash(digest_hex)?;
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&prehash)
        .map_err(|e| VerdictError::SignatureMismatch(format!("signing failed: {e}")))?;

    let mut out = Vec::with_capacity(65);
    out.extend_from_slice(&signature.to_bytes());
    out.push(27 + recovery_id.to_byte());
    Ok(format!("0x{}", hex::encode(out)))
}

/// Recover the signer address of an EIP-191 signature over `digest_hex`.
pub fn recover_signer_eip191(digest_hex: &str, signature: &str) -> Result<Address, VerdictError> {
    let stripped = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes = hex::decode(stripped)
        .map_err(|e| VerdictError::Validation(format!("invalid signature hex: {e}")))?;
    if bytes.len() != 65 {
        return Err(VerdictError::Validation(format!(
            "signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }

    let v = bytes[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| VerdictError::Validation(format!("invalid recovery id {v}")))?;
    let sig = Signature::from_slice(&bytes[..64])
        .map_err(|e| VerdictError::Validation(format!("malformed signature: {e}")))?;

    let prehash = eip191_prehash(digest_hex)?;
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| VerdictError::SignatureMismatch(format!("recovery failed: {e}")))?;
    Ok(address_from_verifying_key(&key))
}

/// True iff the signature over `digest_hex` recovers to `expected`.
pub fn verify_signature_eip191(digest_hex: &str, signature: &str, expected: Address) -> bool {
    recover_signer_eip191(digest_hex, signature)
        .map(|recovered| recovered == expected)
        .unwrap_or(false)
}

/// Address embedded in a `did:8004:0x…` actor identifier. Bare addresses
/// are rejected; receipts must carry the full DID.
pub fn did_to_address(actor_id: &str) -> Result<Address, VerdictError> {
    match actor_id.strip_prefix(DID_PREFIX) {
        Some(tail) => Address::from_hex(tail),
        None => Err(VerdictError::Validation(format!(
            "invalid did: expected {DID_PREFIX}0x…, got {actor_id}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_key() -> String {
        let mut bytes = [0u8; 32];
        loop {
            rand::thread_rng().fill_bytes(&mut bytes);
            let hexed = format!("0x{}", hex::encode(bytes));
            if signing_key_from_hex(&hexed).is_ok() {
                return hexed;
            }
        }
    }

    #[test]
    fn sign_then_recover_round_trips() {
        for _ in 0..8 {
            let key = random_key();
            let expected = address_from_private_key(&key).unwrap();

            let mut digest = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut digest);
            let digest_hex = Digest32::from_bytes(digest).to_hex();

            let sig = sign_hash_eip191(&key, &digest_hex).unwrap();
            assert_eq!(sig.len(), 2 + 130);
            assert!(verify_signature_eip191(&digest_hex, &sig, expected));

            let recovered = recover_signer_eip191(&digest_hex, &sig).unwrap();
            assert_eq!(recovered, expected);
        }
    }

    #[test]
    fn wrong_signer_fails_verification() {
        let key_a = random_key();
        let key_b = random_key();
        let other = address_from_private_key(&key_b).unwrap();

        let digest_hex = Digest32::from_bytes([7u8; 32]).to_hex();
        let sig = sign_hash_eip191(&key_a, &digest_hex).unwrap();
        assert!(!verify_signature_eip191(&digest_hex, &sig, other));
    }

    #[test]
    fn tampered_digest_fails_verification() {
        let key = random_key();
        let signer = address_from_private_key(&key).unwrap();

        let digest_hex = Digest32::from_bytes([1u8; 32]).to_hex();
        let tampered = Digest32::from_bytes([2u8; 32]).to_hex();
        let sig = sign_hash_eip191(&key, &digest_hex).unwrap();
        assert!(!verify_signature_eip191(&tampered, &sig, signer));
    }

    #[test]
    fn rejects_short_signature() {
        let digest_hex = Digest32::from_bytes([0u8; 32]).to_hex();
        assert!(recover_signer_eip191(&digest_hex, "0x1234").is_err());
    }

    #[test]
    fn did_to_address_strips_prefix() {
        let addr = did_to_address("did:8004:0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(addr.to_checksum(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn did_to_address_rejects_bare_address() {
        assert!(did_to_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").is_err());
    }
}
