//! Core value types: identifiers, coins, payment instructions.
//!
//! All monetary values are in nano-coins. 32-byte identifiers that the ledger
//! prints as hex (transaction ids, block hashes, token ids) serialize as hex
//! strings; per-coin secrets and points serialize as base58-check strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{ENCODE_VERSION, KEY_SIZE};
use crate::encoding::{b58, check_decode_version, check_encode};
use crate::error::KeyError;

/// A 32-byte hash value, used for transaction ids and block hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

/// Transaction identifier assigned by the ledger.
pub type TxId = Hash256;

/// Block header hash.
pub type BlockHash = Hash256;

impl Hash256 {
    /// The zero hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a token. The native coin has a fixed, well-known id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub Hash256);

impl TokenId {
    /// Id of the native coin: 31 zero bytes followed by `0x04`.
    pub const NATIVE: Self = {
        let mut bytes = [0u8; 32];
        bytes[31] = 4;
        Self(Hash256(bytes))
    };

    pub fn is_native(&self) -> bool {
        *self == Self::NATIVE
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::NATIVE
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TokenId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

macro_rules! b58_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; KEY_SIZE]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }

            /// Base58-check text form.
            pub fn encode(&self) -> String {
                check_encode(&self.0, ENCODE_VERSION)
            }

            /// Parse the base58-check text form.
            pub fn decode(s: &str) -> Result<Self, KeyError> {
                let bytes = check_decode_version(s, ENCODE_VERSION)?;
                let arr: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
                    KeyError::Base58Decode(format!("expected {KEY_SIZE} bytes, got {}", bytes.len()))
                })?;
                Ok(Self(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.encode())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.encode())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::decode(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

b58_key!(
    /// A coin's serial number (key image). Its presence on the ledger marks
    /// the coin spent.
    SerialNumber
);

b58_key!(
    /// Per-coin random value combined with the spending key to derive the
    /// serial number.
    Derivator
);

/// The four serializable key variants, identified by their leading tag byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    SpendingKey,
    PaymentAddress,
    ViewingKey,
    OneTimeAddressKey,
}

impl KeyType {
    pub const ALL: [KeyType; 4] = [
        KeyType::SpendingKey,
        KeyType::PaymentAddress,
        KeyType::ViewingKey,
        KeyType::OneTimeAddressKey,
    ];

    /// Leading tag byte of the serialized layout.
    pub fn tag(&self) -> u8 {
        match self {
            KeyType::SpendingKey => 0x00,
            KeyType::PaymentAddress => 0x01,
            KeyType::ViewingKey => 0x02,
            KeyType::OneTimeAddressKey => 0x03,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, KeyError> {
        match tag {
            0x00 => Ok(KeyType::SpendingKey),
            0x01 => Ok(KeyType::PaymentAddress),
            0x02 => Ok(KeyType::ViewingKey),
            0x03 => Ok(KeyType::OneTimeAddressKey),
            other => Err(KeyError::UnknownKeyType(other)),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyType::SpendingKey => "spending key",
            KeyType::PaymentAddress => "payment address",
            KeyType::ViewingKey => "viewing key",
            KeyType::OneTimeAddressKey => "one-time-address key",
        })
    }
}

/// A decrypted output coin owned by the wallet.
///
/// The serial number is not transmitted by the ledger; the wallet derives it
/// from its spending key and the coin's derivator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Coin {
    pub version: u8,
    #[serde(with = "b58")]
    pub public_key: Vec<u8>,
    #[serde(rename = "CoinCommitment", with = "b58")]
    pub commitment: Vec<u8>,
    #[serde(rename = "SNDerivator")]
    pub derivator: Derivator,
    #[serde(rename = "KeyImage", default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<SerialNumber>,
    #[serde(with = "b58")]
    pub randomness: Vec<u8>,
    #[serde(with = "amount_string")]
    pub value: u64,
    #[serde(default, with = "b58")]
    pub info: Vec<u8>,
}

impl Coin {
    /// Total value of a set of coins, saturating at `u64::MAX`.
    pub fn total_value(coins: &[Coin]) -> u64 {
        coins.iter().fold(0u64, |acc, c| acc.saturating_add(c.value))
    }
}

/// One recipient of a transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PaymentInfo {
    /// Base58-check serialized payment address of the recipient.
    pub payment_address: String,
    #[serde(with = "amount_string")]
    pub amount: u64,
    #[serde(default)]
    pub message: String,
}

impl PaymentInfo {
    pub fn new(payment_address: impl Into<String>, amount: u64) -> Self {
        Self {
            payment_address: payment_address.into(),
            amount,
            message: String::new(),
        }
    }
}

/// Amounts travel as decimal strings so they survive JSON number precision.
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Amount {
            Text(String),
            Number(u64),
        }
        match Amount::deserialize(deserializer)? {
            Amount::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Amount::Number(n) => Ok(n),
        }
    }
}

/// Shard that owns an account, chosen by the last byte of its public key.
pub fn shard_id(public_identity: &[u8], shard_count: u8) -> u8 {
    match (public_identity.last(), shard_count) {
        (Some(last), n) if n > 0 => last % n,
        _ => 0,
    }
}
