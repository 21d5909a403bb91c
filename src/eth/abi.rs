//! Minimal ABI plumbing for the one contract surface the relayer consumes.
//!
//! The drop contract exposes `mintTo(address)` and emits
//! `Minted(address indexed, uint256 indexed)`. Selectors and event topics
//! are derived with keccak-256 at construction time rather than hardcoded.

use anyhow::{Result, anyhow};
use sha3::{Digest, Keccak256};

pub const WORD_BYTES: usize = 32;
pub const SELECTOR_BYTES: usize = 4;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// First four bytes of the keccak-256 hash of a canonical function signature.
pub fn selector(signature: &str) -> [u8; SELECTOR_BYTES] {
    assert!(!signature.is_empty(), "Function signature must be provided");
    assert!(
        !signature.contains(' '),
        "Function signature must be canonical (no spaces)"
    );
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; SELECTOR_BYTES];
    out.copy_from_slice(&hash[..SELECTOR_BYTES]);
    out
}

/// Topic 0 of an event: the full keccak-256 hash of the canonical signature.
pub fn event_topic(signature: &str) -> [u8; WORD_BYTES] {
    assert!(!signature.is_empty(), "Event signature must be provided");
    keccak256(signature.as_bytes())
}

/// Left-pads a 20-byte address into a 32-byte ABI word.
pub fn address_word(address: &[u8; 20]) -> [u8; WORD_BYTES] {
    let mut word = [0u8; WORD_BYTES];
    word[12..].copy_from_slice(address);
    word
}

/// Call data for a single-address-argument function: selector + padded word.
pub fn encode_address_call(selector: [u8; SELECTOR_BYTES], address: &[u8; 20]) -> Vec<u8> {
    let mut data = Vec::with_capacity(SELECTOR_BYTES + WORD_BYTES);
    data.extend_from_slice(&selector);
    data.extend_from_slice(&address_word(address));
    data
}

/// Call data for a single-word-argument function: selector + 32-byte word.
pub fn encode_word_call(selector: [u8; SELECTOR_BYTES], word: &[u8; WORD_BYTES]) -> Vec<u8> {
    let mut data = Vec::with_capacity(SELECTOR_BYTES + WORD_BYTES);
    data.extend_from_slice(&selector);
    data.extend_from_slice(word);
    data
}

/// Extracts the trailing 20 bytes of a 32-byte return word as an address.
pub fn decode_address_word(word: &[u8]) -> Result<[u8; 20]> {
    if word.len() < WORD_BYTES {
        return Err(anyhow!(
            "ABI word must be {WORD_BYTES} bytes, got {}",
            word.len()
        ));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&word[WORD_BYTES - 20..WORD_BYTES]);
    Ok(out)
}

/// Renders a big-endian `uint256` word as a decimal string.
///
/// Token ids in this drop are tiny, so anything above `u128::MAX` is treated
/// as corrupt rather than widened.
pub fn decode_uint_word(word: &[u8]) -> Result<String> {
    if word.len() != WORD_BYTES {
        return Err(anyhow!(
            "ABI word must be {WORD_BYTES} bytes, got {}",
            word.len()
        ));
    }
    if word[..16].iter().any(|b| *b != 0) {
        return Err(anyhow!("uint256 value exceeds u128 bounds"));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low).to_string())
}

/// Strips an optional `0x`/`0X` prefix.
pub fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Decodes a `0x`-prefixed hex blob as returned by JSON-RPC.
pub fn decode_hex_blob(value: &str) -> Result<Vec<u8>> {
    let stripped = strip_hex_prefix(value.trim());
    hex::decode(stripped).map_err(|err| anyhow!("Invalid hex payload: {err}"))
}

/// Parses a JSON-RPC quantity (`0x`-prefixed, no leading zeros) into u128.
pub fn parse_quantity(value: &str) -> Result<u128> {
    let stripped = strip_hex_prefix(value.trim());
    if stripped.is_empty() {
        return Err(anyhow!("Empty quantity"));
    }
    u128::from_str_radix(stripped, 16).map_err(|err| anyhow!("Invalid quantity {value}: {err}"))
}

/// Formats an integer as a minimal JSON-RPC quantity.
pub fn to_quantity(value: u128) -> String {
    format!("0x{value:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_empty_input_matches_known_digest() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn selector_matches_erc20_transfer() {
        assert_eq!(
            hex::encode(selector("transfer(address,uint256)")),
            "a9059cbb"
        );
    }

    #[test]
    fn event_topic_matches_erc20_transfer_event() {
        assert_eq!(
            hex::encode(event_topic("Transfer(address,address,uint256)")),
            "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn address_call_layout() {
        let addr = [0x11u8; 20];
        let data = encode_address_call([0xaa, 0xbb, 0xcc, 0xdd], &addr);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..], &addr);
    }

    #[test]
    fn uint_word_decodes_decimal() {
        let mut word = [0u8; 32];
        word[31] = 7;
        assert_eq!(decode_uint_word(&word).unwrap(), "7");
        word[30] = 1;
        assert_eq!(decode_uint_word(&word).unwrap(), "263");
    }

    #[test]
    fn uint_word_rejects_oversized_values() {
        let mut word = [0u8; 32];
        word[0] = 1;
        assert!(decode_uint_word(&word).is_err());
    }

    #[test]
    fn quantity_round_trip() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert_eq!(to_quantity(436), "0x1b4");
        assert!(parse_quantity("0x").is_err());
    }
}
