//! Offline legacy-transaction signing (EIP-155).
//!
//! Used for secondary backends with no local account management: the
//! transaction is signed with a locally-held pre-funded key and submitted
//! through `eth_sendRawTransaction`.

use k256::ecdsa::{RecoveryId, SigningKey};
use rlp::RlpStream;
use sha3::{Digest, Keccak256};

use ethmux_common::hex::{decode_hex, encode_hex};
use ethmux_common::{EthmuxError, Result};

/// An unsigned legacy transaction, field-for-field what goes into the RLP
/// signing payload.
#[derive(Debug, Clone)]
pub struct LegacyTransaction {
    pub nonce: u128,
    pub gas_price: u128,
    pub gas: u128,
    /// `None` for contract creation
    pub to: Option<[u8; 20]>,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTransaction {
    fn rlp_unsigned(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.rlp_body(&mut stream);
        // EIP-155: the chain id takes the signature's place pre-signing
        stream.append(&self.chain_id);
        stream.append_empty_data();
        stream.append_empty_data();
        stream.out().to_vec()
    }

    fn rlp_signed(&self, v: u64, r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.rlp_body(&mut stream);
        stream.append(&v);
        stream.append(&trim_leading_zeros(r).to_vec());
        stream.append(&trim_leading_zeros(s).to_vec());
        stream.out().to_vec()
    }

    fn rlp_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas);
        match &self.to {
            Some(to) => stream.append(&to.to_vec()),
            None => stream.append_empty_data(),
        };
        stream.append(&self.value);
        stream.append(&self.data);
    }
}

/// Signs a legacy transaction, returning the `0x`-prefixed raw payload for
/// `eth_sendRawTransaction`.
pub fn sign_legacy_transaction(tx: &LegacyTransaction, key: &SigningKey) -> Result<String> {
    let digest = keccak256(&tx.rlp_unsigned());
    let (signature, recovery) = key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| EthmuxError::Signing(e.to_string()))?;
    // Ethereum requires the low-s form; flip the recovery bit if we
    // normalized
    let (signature, recovery) = match signature.normalize_s() {
        Some(normalized) => {
            let flipped = RecoveryId::from_byte(recovery.to_byte() ^ 1)
                .ok_or_else(|| EthmuxError::Signing("invalid recovery id".into()))?;
            (normalized, flipped)
        }
        None => (signature, recovery),
    };
    let v = tx.chain_id * 2 + 35 + u64::from(recovery.to_byte());
    let r = signature.r().to_bytes();
    let s = signature.s().to_bytes();
    let raw = tx.rlp_signed(v, r.as_ref(), s.as_ref());
    Ok(encode_hex(&raw))
}

/// Derives the Ethereum address controlled by a private key.
pub fn derive_address(key: &SigningKey) -> String {
    let public = key.verifying_key().to_encoded_point(false);
    // skip the 0x04 uncompressed-point tag
    let hash = keccak256(&public.as_bytes()[1..]);
    encode_hex(&hash[12..])
}

/// Parses a `0x`-prefixed 32-byte private key.
pub fn parse_private_key(raw: &str) -> Result<SigningKey> {
    let bytes = decode_hex(raw)
        .ok_or_else(|| EthmuxError::Signing(format!("undecodable private key {raw:?}")))?;
    SigningKey::from_slice(&bytes).map_err(|e| EthmuxError::Signing(e.to_string()))
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
