//! BIP-39 mnemonic backup and account restoration.

use bip39::{Language, Mnemonic};
use zeroize::Zeroize;

use crate::error::WalletError;
use crate::keys::KeyWallet;

/// Generate a fresh 24-word English mnemonic from the OS RNG.
pub fn generate_mnemonic() -> Result<String, WalletError> {
    use rand::RngCore;
    let mut entropy = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let m = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()));
    entropy.zeroize();
    Ok(m?.to_string())
}

/// Parse a phrase, normalizing whitespace and case.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, WalletError> {
    let normalized = phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    Mnemonic::parse_in(Language::English, &normalized)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}

/// Restore the master key node from a mnemonic phrase.
///
/// The phrase is stretched to a 64-byte BIP-39 seed with an empty passphrase.
pub fn mnemonic_to_master(phrase: &str) -> Result<KeyWallet, WalletError> {
    let m = parse_mnemonic(phrase)?;
    let mut seed = m.to_seed("");
    let master = KeyWallet::derive_master(&seed);
    seed.zeroize();
    Ok(master?)
}

/// Restore the account node at `index` below the master.
pub fn mnemonic_to_account(phrase: &str, index: u32) -> Result<KeyWallet, WalletError> {
    Ok(mnemonic_to_master(phrase)?.derive_child(index)?)
}
