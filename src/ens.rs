//! Recipient identity resolution.
//!
//! A recipient string is either an ENS name (`*.eth`) resolved through the
//! mainnet registry indirection, or a literal hex address. Resolution
//! failures are an expected, user-correctable condition (typo, unregistered
//! name): they are logged and reported as `None`, never propagated as
//! errors.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, warn};

use crate::eth::EthClient;
use crate::eth::abi::{self, SELECTOR_BYTES, WORD_BYTES, keccak256};
use crate::eth::address::Address;

/// The ENS registry singleton on Ethereum mainnet.
pub const ENS_REGISTRY_ADDRESS: &str = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e";

const ENS_SUFFIX: &str = ".eth";

/// EIP-137 namehash: normalize, split into labels, fold right-to-left over a
/// zero seed with `keccak256(seed || keccak256(label))`.
pub fn namehash(name: &str) -> [u8; WORD_BYTES] {
    let cleaned = name.trim().to_lowercase();
    let cleaned = cleaned.strip_suffix('.').unwrap_or(cleaned.as_str());

    let mut node = [0u8; WORD_BYTES];
    if cleaned.is_empty() {
        return node;
    }

    for label in cleaned.split('.').filter(|l| !l.is_empty()).rev() {
        let label_hash = keccak256(label.as_bytes());
        let mut packed = [0u8; WORD_BYTES * 2];
        packed[..WORD_BYTES].copy_from_slice(&node);
        packed[WORD_BYTES..].copy_from_slice(&label_hash);
        node = keccak256(&packed);
    }
    node
}

/// Maps a raw recipient string to a canonical address.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    /// `None` for anything unresolvable: unregistered names, zero-address
    /// resolvers, malformed literals, RPC failures.
    async fn resolve(&self, raw: &str) -> Option<Address>;
}

/// Production resolver: ENS over mainnet JSON-RPC for `*.eth` input,
/// literal-address validation otherwise. Successful name resolutions are
/// cached with a TTL; failures are not cached so a freshly registered name
/// becomes visible immediately.
pub struct EnsResolver {
    eth: EthClient,
    registry: Address,
    resolver_selector: [u8; SELECTOR_BYTES],
    addr_selector: [u8; SELECTOR_BYTES],
    cache: Cache<String, Address>,
}

impl EnsResolver {
    pub fn new(
        eth: EthClient,
        registry: Address,
        cache_capacity: u64,
        cache_ttl: Duration,
    ) -> Self {
        assert!(cache_capacity >= 16, "Resolve cache capacity too small");
        let cache = Cache::builder()
            .max_capacity(cache_capacity)
            .time_to_live(cache_ttl)
            .build();
        Self {
            eth,
            registry,
            resolver_selector: abi::selector("resolver(bytes32)"),
            addr_selector: abi::selector("addr(bytes32)"),
            cache,
        }
    }

    async fn resolve_name(&self, name: &str) -> Result<Option<Address>> {
        let node = namehash(name);

        let resolver_word = self
            .eth
            .call(
                self.registry,
                &abi::encode_word_call(self.resolver_selector, &node),
            )
            .await
            .context("ENS registry lookup failed")?;
        let resolver = Address::from_bytes(abi::decode_address_word(&resolver_word)?);
        if resolver.is_zero() {
            debug!(name, "ENS name has no resolver");
            return Ok(None);
        }

        let addr_word = self
            .eth
            .call(resolver, &abi::encode_word_call(self.addr_selector, &node))
            .await
            .context("ENS resolver addr() failed")?;
        let resolved = Address::from_bytes(abi::decode_address_word(&addr_word)?);
        if resolved.is_zero() {
            debug!(name, "ENS resolver returned the zero address");
            return Ok(None);
        }
        Ok(Some(resolved))
    }
}

#[async_trait]
impl RecipientResolver for EnsResolver {
    async fn resolve(&self, raw: &str) -> Option<Address> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.to_lowercase().ends_with(ENS_SUFFIX) {
            let key = trimmed.to_lowercase();
            if let Some(cached) = self.cache.get(&key).await {
                return Some(cached);
            }
            return match self.resolve_name(&key).await {
                Ok(Some(address)) => {
                    self.cache.insert(key, address).await;
                    Some(address)
                }
                Ok(None) => None,
                Err(err) => {
                    warn!("ENS resolve failed for {key}: {err:#}");
                    None
                }
            };
        }

        Address::parse(trimmed).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Vectors from EIP-137.
    #[test]
    fn namehash_empty_is_zero() {
        assert_eq!(namehash(""), [0u8; 32]);
        assert_eq!(namehash("   "), [0u8; 32]);
    }

    #[test]
    fn namehash_eth_tld() {
        assert_eq!(
            hex::encode(namehash("eth")),
            "93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae"
        );
    }

    #[test]
    fn namehash_foo_eth() {
        assert_eq!(
            hex::encode(namehash("foo.eth")),
            "de9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f"
        );
    }

    #[test]
    fn namehash_normalizes_case_and_trailing_dot() {
        assert_eq!(namehash("FOO.ETH"), namehash("foo.eth"));
        assert_eq!(namehash("foo.eth."), namehash("foo.eth"));
        assert_eq!(namehash(" foo.eth "), namehash("foo.eth"));
    }
}
