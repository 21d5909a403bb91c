//! Legacy (pre-EIP-1559) transaction assembly: RLP encoding and EIP-155
//! secp256k1 signing with the relayer's key.

use anyhow::{Context, Result, anyhow};
use k256::ecdsa::SigningKey;

use super::abi::{keccak256, strip_hex_prefix};
use super::address::Address;

/// Holds the relayer signing key and its derived address.
pub struct TxSigner {
    key: SigningKey,
    address: Address,
}

impl TxSigner {
    /// Builds a signer from a hex-encoded 32-byte private key, with or
    /// without a `0x` prefix (the key arrives via environment variable).
    pub fn from_hex_key(value: &str) -> Result<Self> {
        let stripped = strip_hex_prefix(value.trim());
        let bytes = hex::decode(stripped).context("Relayer key is not valid hex")?;
        if bytes.len() != 32 {
            return Err(anyhow!(
                "Relayer key must be 32 bytes, got {}",
                bytes.len()
            ));
        }
        let key = SigningKey::from_slice(&bytes).context("Relayer key is not a valid scalar")?;
        let address = derive_address(&key);
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a transaction and returns the raw RLP bytes ready for
    /// `eth_sendRawTransaction`.
    pub fn sign(&self, tx: &LegacyTx) -> Result<Vec<u8>> {
        let sighash = keccak256(&tx.signing_payload());
        let (signature, recovery) = self
            .key
            .sign_prehash_recoverable(&sighash)
            .context("Failed to sign transaction")?;

        let bytes: [u8; 64] = signature.to_bytes().into();
        let (r, s) = bytes.split_at(32);
        // EIP-155 replay protection folds the chain id into v.
        let v = 35 + u128::from(tx.chain_id) * 2 + u128::from(recovery.to_byte());
        Ok(tx.envelope(v, r, s))
    }
}

fn derive_address(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let encoded = point.as_bytes();
    assert_eq!(encoded.len(), 65, "Uncompressed point must be 65 bytes");
    let hash = keccak256(&encoded[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address::from_bytes(out)
}

/// An unsigned legacy transaction.
pub struct LegacyTx {
    pub nonce: u128,
    pub gas_price: u128,
    pub gas_limit: u128,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTx {
    /// RLP payload hashed for the EIP-155 signature:
    /// `(nonce, gasPrice, gas, to, value, data, chainId, 0, 0)`.
    fn signing_payload(&self) -> Vec<u8> {
        let mut items = self.base_items();
        items.push(rlp_uint(u128::from(self.chain_id)));
        items.push(rlp_uint(0));
        items.push(rlp_uint(0));
        rlp_list(&items)
    }

    /// The signed wire form: `(nonce, gasPrice, gas, to, value, data, v, r, s)`.
    fn envelope(&self, v: u128, r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut items = self.base_items();
        items.push(rlp_uint(v));
        items.push(rlp_bytes(trim_leading_zeros(r)));
        items.push(rlp_bytes(trim_leading_zeros(s)));
        rlp_list(&items)
    }

    fn base_items(&self) -> Vec<Vec<u8>> {
        vec![
            rlp_uint(self.nonce),
            rlp_uint(self.gas_price),
            rlp_uint(self.gas_limit),
            rlp_bytes(self.to.as_bytes()),
            rlp_uint(self.value),
            rlp_bytes(&self.data),
        ]
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// RLP string encoding.
fn rlp_bytes(payload: &[u8]) -> Vec<u8> {
    if payload.len() == 1 && payload[0] < 0x80 {
        return payload.to_vec();
    }
    let mut out = rlp_length(payload.len(), 0x80);
    out.extend_from_slice(payload);
    out
}

/// RLP integer encoding: big-endian with no leading zeros, zero is empty.
fn rlp_uint(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    rlp_bytes(trim_leading_zeros(&bytes))
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut out = rlp_length(payload_len, 0xc0);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn rlp_length(len: usize, offset: u8) -> Vec<u8> {
    assert!(len < 1 << 24, "RLP payload exceeds defensive bound");
    if len <= 55 {
        return vec![offset + len as u8];
    }
    let len_bytes = (len as u64).to_be_bytes();
    let trimmed = trim_leading_zeros(&len_bytes);
    let mut out = vec![offset + 55 + trimmed.len() as u8];
    out.extend_from_slice(trimmed);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // RLP vectors from the Ethereum wiki.
    #[test]
    fn rlp_string_vectors() {
        assert_eq!(hex::encode(rlp_bytes(b"dog")), "83646f67");
        assert_eq!(hex::encode(rlp_bytes(b"")), "80");
        assert_eq!(hex::encode(rlp_bytes(&[0x0f])), "0f");
        assert_eq!(hex::encode(rlp_bytes(&[0x80])), "8180");
    }

    #[test]
    fn rlp_uint_vectors() {
        assert_eq!(hex::encode(rlp_uint(0)), "80");
        assert_eq!(hex::encode(rlp_uint(15)), "0f");
        assert_eq!(hex::encode(rlp_uint(1024)), "820400");
    }

    #[test]
    fn rlp_list_vector() {
        let encoded = rlp_list(&[rlp_bytes(b"cat"), rlp_bytes(b"dog")]);
        assert_eq!(hex::encode(encoded), "c88363617483646f67");
    }

    #[test]
    fn rlp_long_string_prefix() {
        let payload = vec![0x61u8; 56];
        let encoded = rlp_bytes(&payload);
        assert_eq!(encoded[0], 0xb8);
        assert_eq!(encoded[1], 56);
        assert_eq!(encoded.len(), 58);
    }

    #[test]
    fn signer_derives_known_address() {
        // The address of private key 0x...01 is a fixed point of secp256k1.
        let mut key = [0u8; 32];
        key[31] = 1;
        let signer = TxSigner::from_hex_key(&hex::encode(key)).unwrap();
        assert_eq!(
            signer.address().to_checksum(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn signer_accepts_prefixed_key() {
        let mut key = [0u8; 32];
        key[31] = 1;
        let prefixed = format!("0x{}", hex::encode(key));
        assert!(TxSigner::from_hex_key(&prefixed).is_ok());
    }

    #[test]
    fn signer_rejects_bad_keys() {
        assert!(TxSigner::from_hex_key("").is_err());
        assert!(TxSigner::from_hex_key("0xdead").is_err());
        // Zero is not a valid secp256k1 scalar.
        assert!(TxSigner::from_hex_key(&hex::encode([0u8; 32])).is_err());
    }

    #[test]
    fn envelope_parity_with_signing_payload() {
        let tx = LegacyTx {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Address::from_bytes([0x35; 20]),
            value: 1_000_000_000_000_000_000,
            data: Vec::new(),
            chain_id: 1,
        };
        let unsigned = tx.signing_payload();
        // Known EIP-155 example: the unsigned payload for this transaction.
        assert_eq!(
            hex::encode(unsigned),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
    }
}
