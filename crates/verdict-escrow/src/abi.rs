//! Minimal ABI encoding/decoding for the fixed escrow surface.
//!
//! Supported types: `uint256`, `address`, `bytes32`, `bool`, and dynamic
//! `string`. Dynamic arguments use the standard head/tail layout (offset in
//! the head, length-prefixed padded bytes in the tail).

use sha3::{Digest, Keccak256};

use verdict_core::{Address, VerdictError};

/// Argument value for a contract call.
#[derive(Debug, Clone)]
pub enum Token {
    Uint(u128),
    Address(Address),
    Bytes32([u8; 32]),
    Str(String),
}

/// 4-byte function selector of a canonical signature like
/// `fileDispute(uint256,uint256,bytes32)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Keccak topic of a canonical event signature.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// Encode `selector || args` for a contract call.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut head: Vec<[u8; 32]> = Vec::with_capacity(args.len());
    let mut tail: Vec<u8> = Vec::new();
    let head_len = args.len() * 32;

    for token in args {
        match token {
            Token::Uint(v) => head.push(uint_word(*v)),
            Token::Address(a) => head.push(address_word(a)),
            Token::Bytes32(b) => head.push(*b),
            Token::Str(s) => {
                head.push(uint_word((head_len + tail.len()) as u128));
                let bytes = s.as_bytes();
                tail.extend_from_slice(&uint_word(bytes.len() as u128));
                tail.extend_from_slice(bytes);
                let pad = (32 - bytes.len() % 32) % 32;
                tail.extend(std::iter::repeat(0u8).take(pad));
            }
        }
    }

    let mut out = Vec::with_capacity(4 + head_len + tail.len());
    out.extend_from_slice(&selector(signature));
    for word in head {
        out.extend_from_slice(&word);
    }
    out.extend_from_slice(&tail);
    out
}

/// Split ABI return data into 32-byte words.
pub fn decode_words(data: &[u8]) -> Vec<[u8; 32]> {
    data.chunks(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word[..chunk.len()].copy_from_slice(chunk);
            word
        })
        .collect()
}

pub fn word_to_u128(word: &[u8; 32]) -> u128 {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&word[16..]);
    u128::from_be_bytes(bytes)
}

pub fn word_to_u64(word: &[u8; 32]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..]);
    u64::from_be_bytes(bytes)
}

pub fn word_to_address(word: &[u8; 32]) -> Address {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Address::from_bytes(bytes)
}

pub fn word_to_bool(word: &[u8; 32]) -> bool {
    word[31] != 0
}

pub fn word_to_hex(word: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(word))
}

/// Decode a dynamic string at the offset stored in word `index`.
pub fn dynamic_string_at(data: &[u8], words: &[[u8; 32]], index: usize) -> Result<String, VerdictError> {
    let offset = word_to_u128(&words[index]) as usize;
    if offset + 32 > data.len() {
        return Err(VerdictError::Rpc("abi string offset out of range".into()));
    }
    let mut len_word = [0u8; 32];
    len_word.copy_from_slice(&data[offset..offset + 32]);
    let len = word_to_u128(&len_word) as usize;
    let start = offset + 32;
    if start + len > data.len() {
        return Err(VerdictError::Rpc("abi string length out of range".into()));
    }
    String::from_utf8(data[start..start + len].to_vec())
        .map_err(|e| VerdictError::Rpc(format!("abi string not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_known_vector() {
        // transfer(address,uint256) — the classic ERC-20 selector.
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
    }

    #[test]
    fn static_call_layout() {
        let data = encode_call(
            "submitRuling(uint256,address)",
            &[
                Token::Uint(7),
                Token::Address(Address::from_hex("0x0000000000000000000000000000000000000009").unwrap()),
            ],
        );
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(data[4 + 31], 7);
        assert_eq!(data[4 + 63], 9);
    }

    #[test]
    fn dynamic_string_layout_round_trips() {
        let data = encode_call(
            "postBond(string,uint256)",
            &[Token::Str("agreement-123".into()), Token::Uint(42)],
        );
        // head: offset word + uint word; tail: len word + padded bytes
        let body = &data[4..];
        let words = decode_words(body);
        assert_eq!(word_to_u128(&words[0]), 64);
        assert_eq!(word_to_u128(&words[1]), 42);
        let s = dynamic_string_at(body, &words, 0).unwrap();
        assert_eq!(s, "agreement-123");
    }

    #[test]
    fn word_decoders() {
        let w = uint_word(0xdead);
        assert_eq!(word_to_u128(&w), 0xdead);
        assert_eq!(word_to_u64(&w), 0xdead);
        assert!(!word_to_bool(&uint_word(0)));
        assert!(word_to_bool(&uint_word(1)));
    }
}
