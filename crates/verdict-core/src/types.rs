use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

use crate::constants::DID_PREFIX;
use crate::error::VerdictError;

/// Millisecond Unix timestamp, as carried in receipts.
pub type TimestampMs = i64;

/// Monotonic receipt position within one agreement, starting at 0.
pub type Sequence = u64;

// ── Address ──────────────────────────────────────────────────────────────────

/// 20-byte Ethereum-style account address.
///
/// Equality is on the raw bytes, so two hex spellings of the same address
/// (lowercase vs EIP-55 checksum) always compare equal. Display renders the
/// EIP-55 checksummed form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Parse a `0x`-prefixed 40-hex-char address in any letter case.
    pub fn from_hex(s: &str) -> Result<Self, VerdictError> {
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| VerdictError::Validation(format!("address missing 0x prefix: {s}")))?;
        if stripped.len() != 40 {
            return Err(VerdictError::Validation(format!(
                "address must be 40 hex chars, got {}",
                stripped.len()
            )));
        }
        let bytes = hex::decode(stripped)
            .map_err(|e| VerdictError::Validation(format!("invalid address hex: {e}")))?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// EIP-55 checksummed representation (`0x` + mixed-case hex).
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = Keccak256::digest(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            let nibble = (digest[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = VerdictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ── Did ──────────────────────────────────────────────────────────────────────

/// Decentralized identifier of the form `did:8004:0x<40-hex>`.
///
/// The tail is the actor's address; all comparisons go through [`Address`]
/// so they are checksum-aware.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Did(Address);

impl Did {
    pub fn from_address(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> Address {
        self.0
    }

    /// Parse `did:8004:0x…`; also accepts a bare address (watchers see raw
    /// addresses in chain events and normalize them here).
    pub fn parse(s: &str) -> Result<Self, VerdictError> {
        if let Some(tail) = s.strip_prefix(DID_PREFIX) {
            return Ok(Self(Address::from_hex(tail)?));
        }
        if s.starts_with("0x") {
            return Ok(Self(Address::from_hex(s)?));
        }
        Err(VerdictError::Validation(format!(
            "invalid did: expected {DID_PREFIX}0x…, got {s}"
        )))
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DID_PREFIX}{}", self.0.to_checksum())
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({self})")
    }
}

// ── Digest32 ─────────────────────────────────────────────────────────────────

/// 32-byte keccak digest. Wire form is `0x` + 64 lowercase hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest32(pub [u8; 32]);

impl Digest32 {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, VerdictError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        if stripped.len() != 64 {
            return Err(VerdictError::Validation(format!(
                "digest must be 64 hex chars, got {}",
                stripped.len()
            )));
        }
        let bytes = hex::decode(stripped)
            .map_err(|e| VerdictError::Validation(format!("invalid digest hex: {e}")))?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest32({}…)", &self.to_hex()[..18])
    }
}
