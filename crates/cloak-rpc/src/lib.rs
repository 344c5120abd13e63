//! # cloak-rpc: chain node client.
//!
//! [`RpcChainNode`] implements [`cloak_core::traits::ChainNode`] on top of a
//! `jsonrpsee` HTTP client, mapping each wallet query to the node's RPC
//! method of the same meaning.

pub mod client;
mod wire;

pub use client::{DEFAULT_REQUEST_TIMEOUT, RpcChainNode};
