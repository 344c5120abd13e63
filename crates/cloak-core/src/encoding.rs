//! Checksummed binary and base58-check encodings.
//!
//! Every serialized key ends with a 4-byte checksum: the first four bytes of
//! `SHA-256(SHA-256(prefix))`. The textual form wraps a payload as
//! `version || payload || checksum(version || payload)` in the Bitcoin base58
//! alphabet. Coins, serial numbers, and derivators travel as base58-check
//! strings in JSON, so this module also provides the serde adapters for them.

use sha2::{Digest, Sha256};

use crate::constants::CHECKSUM_SIZE;
use crate::error::KeyError;

/// First [`CHECKSUM_SIZE`] bytes of the double SHA-256 of `data`.
pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&second[..CHECKSUM_SIZE]);
    out
}

/// Append the checksum of `bytes` to `bytes`.
pub fn append_checksum(mut bytes: Vec<u8>) -> Vec<u8> {
    let sum = checksum(&bytes);
    bytes.extend_from_slice(&sum);
    bytes
}

/// Verify the trailing checksum and return the checked prefix.
pub fn verify_checksum(bytes: &[u8]) -> Result<&[u8], KeyError> {
    if bytes.len() < CHECKSUM_SIZE + 1 {
        return Err(KeyError::TruncatedData {
            field: "checksum",
            offset: 0,
            needed: CHECKSUM_SIZE + 1,
            available: bytes.len(),
        });
    }
    let (body, sum) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    if checksum(body) != sum {
        return Err(KeyError::Checksum);
    }
    Ok(body)
}

/// Encode `payload` as base58-check text with the given version byte.
pub fn check_encode(payload: &[u8], version: u8) -> String {
    let mut buf = Vec::with_capacity(1 + payload.len() + CHECKSUM_SIZE);
    buf.push(version);
    buf.extend_from_slice(payload);
    bs58::encode(append_checksum(buf)).into_string()
}

/// Decode base58-check text into `(version, payload)`.
pub fn check_decode(s: &str) -> Result<(u8, Vec<u8>), KeyError> {
    let raw = bs58::decode(s)
        .into_vec()
        .map_err(|e| KeyError::Base58Decode(e.to_string()))?;
    if raw.len() < 1 + CHECKSUM_SIZE {
        return Err(KeyError::Base58Decode(format!(
            "decoded {} bytes, need at least {}",
            raw.len(),
            1 + CHECKSUM_SIZE
        )));
    }
    let body = verify_checksum(&raw)
        .map_err(|_| KeyError::Base58Decode("checksum mismatch".into()))?;
    Ok((body[0], body[1..].to_vec()))
}

/// Decode base58-check text, requiring a specific version byte.
pub fn check_decode_version(s: &str, version: u8) -> Result<Vec<u8>, KeyError> {
    let (got, payload) = check_decode(s)?;
    if got != version {
        return Err(KeyError::Base58Decode(format!(
            "version byte {got:#04x}, expected {version:#04x}"
        )));
    }
    Ok(payload)
}

/// Serde adapter for byte blobs carried as base58-check strings.
pub mod b58 {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::constants::ENCODE_VERSION;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::check_encode(bytes, ENCODE_VERSION))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        super::check_decode_version(&s, ENCODE_VERSION).map_err(serde::de::Error::custom)
    }
}
