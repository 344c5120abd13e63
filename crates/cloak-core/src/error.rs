//! Error types shared across the Cloak crates.
use thiserror::Error;

use crate::types::KeyType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("checksum mismatch")] Checksum,
    #[error("truncated data: {field} needs {needed} bytes at offset {offset}, {available} available")] TruncatedData { field: &'static str, offset: usize, needed: usize, available: usize },
    #[error("base58 decode: {0}")] Base58Decode(String),
    #[error("key derivation: {0}")] Derivation(String),
    #[error("unknown key type tag: {0:#04x}")] UnknownKeyType(u8),
    #[error("{0} trailing bytes after key fields")] TrailingBytes(usize),
    #[error("field {field} is {len} bytes, longer than a one-byte length prefix allows")] FieldTooLong { field: &'static str, len: usize },
    #[error("{wanted} is not available from a {have} key")] ViewUnavailable { wanted: KeyType, have: KeyType },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("transport: {0}")] Transport(String),
    #[error("rpc error {code}: {message}")] Rpc { code: i64, message: String },
    #[error("malformed response: {0}")] MalformedResponse(String),
    #[error("not found: {0}")] NotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("backend failure: {0}")] Backend(String),
    #[error("backend returned an empty transaction")] Empty,
}
