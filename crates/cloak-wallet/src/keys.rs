//! Hierarchical key derivation and fixed-layout key serialization.
//!
//! A [`KeyWallet`] node carries BIP32-style metadata (depth, child index,
//! chain code) plus exactly one view of an account's keys. Derivation uses
//! BLAKE3 in keyed mode in place of HMAC-SHA512:
//!
//! - master: `derive_key("cloak-wallet master key v1", seed)` → 64 bytes
//! - child: `keyed_hash(chain_code, index_be || parent_spending_key)` → 64 bytes
//!
//! The first 32 bytes seed the spending key; the last 32 bytes become the
//! node's chain code.
//!
//! # Serialized layouts
//!
//! | Variant | Layout |
//! |---|---|
//! | Spending key | `0x00 · depth · index(4) · chain_code(32) · len · key · checksum(4)` |
//! | Payment address | `0x01 · len · spend_pub · len · transmit_pub · [len · ota_pub] · checksum(4)` |
//! | Viewing key | `0x02 · len · spend_pub · len · receiving_key · checksum(4)` |
//! | One-time-address key | `0x03 · len · spend_pub · len · ota_secret · checksum(4)` |

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use cloak_core::constants::{CHAIN_CODE_SIZE, CHECKSUM_SIZE, CHILD_INDEX_SIZE, ENCODE_VERSION};
use cloak_core::crypto::{DerivedKeys, spending_key_from_seed};
use cloak_core::encoding::{append_checksum, check_decode_version, check_encode, verify_checksum};
use cloak_core::error::KeyError;
use cloak_core::traits::KeyPrimitives;
use cloak_core::types::{KeyType, shard_id};

/// BLAKE3 KDF context for master key derivation.
const MASTER_CONTEXT: &str = "cloak-wallet master key v1";

/// Secret key bytes, zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Handle with care.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// The one view of an account a [`KeyWallet`] node carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    Spending(SecretBytes),
    PaymentAddress {
        spend_public: Vec<u8>,
        transmit_public: Vec<u8>,
        ota_public: Option<Vec<u8>>,
    },
    Viewing {
        spend_public: Vec<u8>,
        receiving_key: SecretBytes,
    },
    OneTimeAddress {
        spend_public: Vec<u8>,
        ota_secret: SecretBytes,
    },
}

impl KeyMaterial {
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyMaterial::Spending(_) => KeyType::SpendingKey,
            KeyMaterial::PaymentAddress { .. } => KeyType::PaymentAddress,
            KeyMaterial::Viewing { .. } => KeyType::ViewingKey,
            KeyMaterial::OneTimeAddress { .. } => KeyType::OneTimeAddressKey,
        }
    }
}

/// A node of the key hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWallet {
    pub depth: u8,
    pub child_index: u32,
    pub chain_code: [u8; CHAIN_CODE_SIZE],
    pub material: KeyMaterial,
}

impl KeyWallet {
    /// Derive the root spending-key node from a seed.
    pub fn derive_master(seed: &[u8]) -> Result<Self, KeyError> {
        if seed.is_empty() {
            return Err(KeyError::Derivation("empty seed".into()));
        }
        let mut hasher = blake3::Hasher::new_derive_key(MASTER_CONTEXT);
        hasher.update(seed);
        Self::from_intermediary(hasher, 0, 0)
    }

    /// Derive the child node at `index`. Only spending-key nodes have children.
    pub fn derive_child(&self, index: u32) -> Result<Self, KeyError> {
        let KeyMaterial::Spending(sk) = &self.material else {
            return Err(KeyError::ViewUnavailable {
                wanted: KeyType::SpendingKey,
                have: self.key_type(),
            });
        };
        let depth = self
            .depth
            .checked_add(1)
            .ok_or_else(|| KeyError::Derivation("maximum derivation depth reached".into()))?;
        let mut hasher = blake3::Hasher::new_keyed(&self.chain_code);
        hasher.update(&index.to_be_bytes());
        hasher.update(sk.as_bytes());
        Self::from_intermediary(hasher, depth, index)
    }

    fn from_intermediary(
        hasher: blake3::Hasher,
        depth: u8,
        child_index: u32,
    ) -> Result<Self, KeyError> {
        let mut out = [0u8; 64];
        hasher.finalize_xof().fill(&mut out);
        let mut key_seed = [0u8; 32];
        key_seed.copy_from_slice(&out[..32]);
        let mut chain_code = [0u8; CHAIN_CODE_SIZE];
        chain_code.copy_from_slice(&out[32..]);
        out.zeroize();

        let sk = spending_key_from_seed(&key_seed);
        key_seed.zeroize();
        Ok(Self {
            depth,
            child_index,
            chain_code,
            material: KeyMaterial::Spending(SecretBytes::new(sk?.to_vec())),
        })
    }

    /// Wrap a raw spending key as a depth-0 node.
    pub fn from_spending_key(spending_key: &[u8]) -> Self {
        Self {
            depth: 0,
            child_index: 0,
            chain_code: [0u8; CHAIN_CODE_SIZE],
            material: KeyMaterial::Spending(SecretBytes::new(spending_key.to_vec())),
        }
    }

    fn view(material: KeyMaterial) -> Self {
        Self {
            depth: 0,
            child_index: 0,
            chain_code: [0u8; CHAIN_CODE_SIZE],
            material,
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.material.key_type()
    }

    /// The spend public key carried by a public view.
    ///
    /// A spending-key node stores only the secret, so this is `None` there;
    /// use [`KeyWallet::derive_public_identity`] to compute it.
    pub fn public_identity(&self) -> Option<&[u8]> {
        match &self.material {
            KeyMaterial::Spending(_) => None,
            KeyMaterial::PaymentAddress { spend_public, .. }
            | KeyMaterial::Viewing { spend_public, .. }
            | KeyMaterial::OneTimeAddress { spend_public, .. } => Some(spend_public),
        }
    }

    /// The spend public key of any node, derived from the secret for a
    /// spending-key node.
    pub fn derive_public_identity(
        &self,
        primitives: &dyn KeyPrimitives,
    ) -> Result<Vec<u8>, KeyError> {
        match &self.material {
            KeyMaterial::Spending(sk) => {
                Ok(primitives.derive_key_set(sk.as_bytes())?.spend_public.to_vec())
            }
            KeyMaterial::PaymentAddress { spend_public, .. }
            | KeyMaterial::Viewing { spend_public, .. }
            | KeyMaterial::OneTimeAddress { spend_public, .. } => Ok(spend_public.clone()),
        }
    }

    /// Shard routing for this account. Zero when no public key is present.
    pub fn shard_id(&self, shard_count: u8) -> u8 {
        self.public_identity()
            .map(|pk| shard_id(pk, shard_count))
            .unwrap_or(0)
    }

    /// Serialize in the layout of `key_type`, which must match the carried view.
    pub fn serialize(&self, key_type: KeyType) -> Result<Vec<u8>, KeyError> {
        if key_type != self.key_type() {
            return Err(KeyError::ViewUnavailable {
                wanted: key_type,
                have: self.key_type(),
            });
        }
        let mut buf = vec![key_type.tag()];
        match &self.material {
            KeyMaterial::Spending(sk) => {
                buf.push(self.depth);
                buf.extend_from_slice(&self.child_index.to_be_bytes());
                buf.extend_from_slice(&self.chain_code);
                push_field(&mut buf, "spending key", sk.as_bytes())?;
            }
            KeyMaterial::PaymentAddress { spend_public, transmit_public, ota_public } => {
                push_field(&mut buf, "spend public key", spend_public)?;
                push_field(&mut buf, "transmission key", transmit_public)?;
                if let Some(ota) = ota_public {
                    push_field(&mut buf, "one-time-address public key", ota)?;
                }
            }
            KeyMaterial::Viewing { spend_public, receiving_key } => {
                push_field(&mut buf, "spend public key", spend_public)?;
                push_field(&mut buf, "receiving key", receiving_key.as_bytes())?;
            }
            KeyMaterial::OneTimeAddress { spend_public, ota_secret } => {
                push_field(&mut buf, "spend public key", spend_public)?;
                push_field(&mut buf, "one-time-address secret", ota_secret.as_bytes())?;
            }
        }
        Ok(append_checksum(buf))
    }

    /// Parse a serialized key. The checksum is verified before any field is read.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() < 1 + CHECKSUM_SIZE {
            return Err(KeyError::TruncatedData {
                field: "key",
                offset: 0,
                needed: 1 + CHECKSUM_SIZE,
                available: bytes.len(),
            });
        }
        let body = verify_checksum(bytes)?;
        let mut r = Reader::new(body);
        let key_type = KeyType::from_tag(r.byte("type tag")?)?;
        let key = match key_type {
            KeyType::SpendingKey => {
                let depth = r.byte("depth")?;
                let mut index = [0u8; CHILD_INDEX_SIZE];
                index.copy_from_slice(r.take("child index", CHILD_INDEX_SIZE)?);
                let child_index = u32::from_be_bytes(index);
                let mut chain_code = [0u8; CHAIN_CODE_SIZE];
                chain_code.copy_from_slice(r.take("chain code", CHAIN_CODE_SIZE)?);
                let sk = r.field("spending key")?;
                Self {
                    depth,
                    child_index,
                    chain_code,
                    material: KeyMaterial::Spending(SecretBytes::new(sk)),
                }
            }
            KeyType::PaymentAddress => {
                let spend_public = r.field("spend public key")?;
                let transmit_public = r.field("transmission key")?;
                let ota_public = if r.remaining() > 0 {
                    Some(r.field("one-time-address public key")?)
                } else {
                    None
                };
                Self::view(KeyMaterial::PaymentAddress { spend_public, transmit_public, ota_public })
            }
            KeyType::ViewingKey => {
                let spend_public = r.field("spend public key")?;
                let receiving_key = SecretBytes::new(r.field("receiving key")?);
                Self::view(KeyMaterial::Viewing { spend_public, receiving_key })
            }
            KeyType::OneTimeAddressKey => {
                let spend_public = r.field("spend public key")?;
                let ota_secret = SecretBytes::new(r.field("one-time-address secret")?);
                Self::view(KeyMaterial::OneTimeAddress { spend_public, ota_secret })
            }
        };
        if r.remaining() > 0 {
            return Err(KeyError::TrailingBytes(r.remaining()));
        }
        Ok(key)
    }

    /// Human-facing base58-check string of the serialized key.
    pub fn base58_check_serialize(&self, key_type: KeyType) -> Result<String, KeyError> {
        Ok(check_encode(&self.serialize(key_type)?, ENCODE_VERSION))
    }

    pub fn base58_check_deserialize(s: &str) -> Result<Self, KeyError> {
        let bytes = check_decode_version(s, ENCODE_VERSION)?;
        Self::deserialize(&bytes)
    }
}

fn push_field(buf: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<(), KeyError> {
    let len = u8::try_from(bytes.len()).map_err(|_| KeyError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    buf.push(len);
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked cursor over a checksummed key body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], KeyError> {
        if self.remaining() < n {
            return Err(KeyError::TruncatedData {
                field,
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn byte(&mut self, field: &'static str) -> Result<u8, KeyError> {
        Ok(self.take(field, 1)?[0])
    }

    /// A length-prefixed field.
    fn field(&mut self, field: &'static str) -> Result<Vec<u8>, KeyError> {
        let len = self.byte(field)? as usize;
        Ok(self.take(field, len)?.to_vec())
    }
}

/// All four views of one account, derived from a single spending key.
#[derive(Clone)]
pub struct KeySet {
    depth: u8,
    child_index: u32,
    chain_code: [u8; CHAIN_CODE_SIZE],
    spending_key: SecretBytes,
    derived: DerivedKeys,
}

impl KeySet {
    /// Expand a spending-key node into the full account key set.
    pub fn from_key_wallet(
        wallet: &KeyWallet,
        primitives: &dyn KeyPrimitives,
    ) -> Result<Self, KeyError> {
        let KeyMaterial::Spending(sk) = &wallet.material else {
            return Err(KeyError::ViewUnavailable {
                wanted: KeyType::SpendingKey,
                have: wallet.key_type(),
            });
        };
        let derived = primitives.derive_key_set(sk.as_bytes())?;
        Ok(Self {
            depth: wallet.depth,
            child_index: wallet.child_index,
            chain_code: wallet.chain_code,
            spending_key: sk.clone(),
            derived,
        })
    }

    /// Import from a base58-check spending key string.
    pub fn import(encoded: &str, primitives: &dyn KeyPrimitives) -> Result<Self, KeyError> {
        Self::from_key_wallet(&KeyWallet::base58_check_deserialize(encoded)?, primitives)
    }

    /// The single-view node for `key_type`.
    pub fn key_wallet(&self, key_type: KeyType) -> KeyWallet {
        let d = &self.derived;
        let material = match key_type {
            KeyType::SpendingKey => KeyMaterial::Spending(self.spending_key.clone()),
            KeyType::PaymentAddress => KeyMaterial::PaymentAddress {
                spend_public: d.spend_public.to_vec(),
                transmit_public: d.transmit_public.to_vec(),
                ota_public: Some(d.ota_public.to_vec()),
            },
            KeyType::ViewingKey => KeyMaterial::Viewing {
                spend_public: d.spend_public.to_vec(),
                receiving_key: SecretBytes::new(d.receiving_key.to_vec()),
            },
            KeyType::OneTimeAddressKey => KeyMaterial::OneTimeAddress {
                spend_public: d.spend_public.to_vec(),
                ota_secret: SecretBytes::new(d.ota_secret.to_vec()),
            },
        };
        let mut node = KeyWallet::view(material);
        if key_type == KeyType::SpendingKey {
            node.depth = self.depth;
            node.child_index = self.child_index;
            node.chain_code = self.chain_code;
        }
        node
    }

    /// Base58-check text of one view.
    pub fn encoded(&self, key_type: KeyType) -> Result<String, KeyError> {
        self.key_wallet(key_type).base58_check_serialize(key_type)
    }

    pub fn payment_address(&self) -> Result<String, KeyError> {
        self.encoded(KeyType::PaymentAddress)
    }

    pub fn spending_key(&self) -> &[u8] {
        self.spending_key.as_bytes()
    }

    pub fn derived(&self) -> &DerivedKeys {
        &self.derived
    }

    pub fn public_identity(&self) -> &[u8] {
        &self.derived.spend_public
    }

    pub fn shard_id(&self, shard_count: u8) -> u8 {
        shard_id(&self.derived.spend_public, shard_count)
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("depth", &self.depth)
            .field("child_index", &self.child_index)
            .field("public_identity", &hex::encode(self.derived.spend_public))
            .finish_non_exhaustive()
    }
}
