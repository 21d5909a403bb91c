//! Ethereum address parsing and EIP-55 checksum rendering.

use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Serialize, Serializer};

use super::abi::{keccak256, strip_hex_prefix};

pub const ADDRESS_BYTES: usize = 20;

/// A 20-byte Ethereum address.
///
/// Parsing accepts any letter case; display always renders the EIP-55
/// checksummed form, which is what every response body carries.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_BYTES]);

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }

    /// Parses a literal hex address, with or without a `0x` prefix.
    pub fn parse(value: &str) -> Result<Self> {
        let stripped = strip_hex_prefix(value.trim());
        if stripped.len() != ADDRESS_BYTES * 2 {
            return Err(anyhow!(
                "Address must be {} hex chars, got {}",
                ADDRESS_BYTES * 2,
                stripped.len()
            ));
        }
        let decoded = hex::decode(stripped).map_err(|err| anyhow!("Invalid address hex: {err}"))?;
        let mut bytes = [0u8; ADDRESS_BYTES];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }

    /// Lowercased `0x...` form, used as the store key for mint counts.
    pub fn to_lowercase_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// EIP-55 mixed-case checksum encoding.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(2 + ADDRESS_BYTES * 2);
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}
