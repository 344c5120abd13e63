//! # cloak-core
//! Foundation types, codecs, and collaborator traits for the Cloak wallet.

pub mod constants;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod traits;
pub mod types;
