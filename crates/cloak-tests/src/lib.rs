//! End-to-end test suite for the Cloak wallet.
//!
//! Drives the full transaction pipeline against an in-memory chain node and
//! a pass-through proof backend, so every test runs without a network.

pub mod helpers;
