//! Curve25519 key primitives for the Cloak wallet.
//!
//! A spending key is a canonical, non-zero Ed25519 scalar. All
//! other views of an account are derived from it:
//!
//! - spend public key `sk·G`
//! - receiving (viewing) secret `H_recv(sk)`, with transmission public key `H_recv(sk)·G`
//! - one-time-address secret `H_ota(sk)`, with public key `H_ota(sk)·G`
//!
//! A coin's serial number is `(sk + d)^-1·G`, where `d` is the coin's
//! derivator reduced to a scalar. `H_*` are BLAKE3 key-derivation XOFs
//! widened to 64 bytes and reduced modulo the group order.

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::KEY_SIZE;
use crate::error::KeyError;
use crate::traits::KeyPrimitives;
use crate::types::{Derivator, SerialNumber};

const SPENDING_KEY_CONTEXT: &str = "cloak-wallet spending key v1";
const RECEIVING_KEY_CONTEXT: &str = "cloak-wallet receiving key v1";
const OTA_KEY_CONTEXT: &str = "cloak-wallet one-time-address key v1";

/// Hash arbitrary input to a uniformly distributed scalar.
pub fn hash_to_scalar(context: &str, input: &[u8]) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(input);
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

/// Reduce a 32-byte key-material seed to spending-key bytes.
///
/// Fails only when the reduction lands on zero, which is not a usable key.
pub fn spending_key_from_seed(seed: &[u8; KEY_SIZE]) -> Result<[u8; KEY_SIZE], KeyError> {
    let scalar = hash_to_scalar(SPENDING_KEY_CONTEXT, seed);
    if scalar == Scalar::ZERO {
        return Err(KeyError::Derivation("seed reduces to the zero scalar".into()));
    }
    Ok(scalar.to_bytes())
}

/// Parse spending-key bytes into a canonical non-zero scalar.
pub fn parse_spending_key(bytes: &[u8]) -> Result<Scalar, KeyError> {
    let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
        KeyError::Derivation(format!("spending key is {} bytes, expected {KEY_SIZE}", bytes.len()))
    })?;
    let scalar = Option::<Scalar>::from(Scalar::from_canonical_bytes(arr))
        .ok_or_else(|| KeyError::Derivation("spending key is not a canonical scalar".into()))?;
    if scalar == Scalar::ZERO {
        return Err(KeyError::Derivation("spending key is zero".into()));
    }
    Ok(scalar)
}

fn public_of(secret: &Scalar) -> [u8; KEY_SIZE] {
    EdwardsPoint::mul_base(secret).compress().to_bytes()
}

/// Every view of an account derived from one spending key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    pub spend_public: [u8; KEY_SIZE],
    pub transmit_public: [u8; KEY_SIZE],
    /// Private receiving scalar. This is what a viewing key carries.
    pub receiving_key: [u8; KEY_SIZE],
    pub ota_public: [u8; KEY_SIZE],
    pub ota_secret: [u8; KEY_SIZE],
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("spend_public", &hex::encode(self.spend_public))
            .field("transmit_public", &hex::encode(self.transmit_public))
            .field("receiving_key", &"[REDACTED]")
            .field("ota_public", &hex::encode(self.ota_public))
            .field("ota_secret", &"[REDACTED]")
            .finish()
    }
}

/// Default [`KeyPrimitives`] backed by `curve25519-dalek`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Curve25519Primitives;

impl KeyPrimitives for Curve25519Primitives {
    fn derive_key_set(&self, spending_key: &[u8]) -> Result<DerivedKeys, KeyError> {
        let sk = parse_spending_key(spending_key)?;
        let receiving = hash_to_scalar(RECEIVING_KEY_CONTEXT, sk.as_bytes());
        let ota = hash_to_scalar(OTA_KEY_CONTEXT, sk.as_bytes());
        Ok(DerivedKeys {
            spend_public: public_of(&sk),
            transmit_public: public_of(&receiving),
            receiving_key: receiving.to_bytes(),
            ota_public: public_of(&ota),
            ota_secret: ota.to_bytes(),
        })
    }

    fn derive_serial_numbers(
        &self,
        spending_key: &[u8],
        derivators: &[Derivator],
    ) -> Result<Vec<SerialNumber>, KeyError> {
        let sk = parse_spending_key(spending_key)?;
        derivators
            .iter()
            .map(|d| {
                let sum = sk + Scalar::from_bytes_mod_order(d.0);
                if sum == Scalar::ZERO {
                    return Err(KeyError::Derivation(format!(
                        "derivator {d} cancels the spending key"
                    )));
                }
                Ok(SerialNumber(public_of(&sum.invert())))
            })
            .collect()
    }
}
