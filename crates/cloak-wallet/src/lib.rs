//! # cloak-wallet: account keys, coin selection, and transaction flow.
//!
//! Everything a privacy-coin wallet does on the client side, short of the
//! proof system itself: hierarchical keys and their serialized forms, input
//! selection, spend tracking across concurrent sends, transaction assembly
//! and broadcast, and confirmation polling.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`keys`]: KeyWallet, KeySet, key serialization
//! - [`mnemonic`]: BIP-39 phrases to master and account keys
//! - [`coin_selection`]: knapsack / greedy input selection
//! - [`ledger`]: serial-number caches and pending spends
//! - [`builder`]: proof-backend request assembly
//! - [`metadata`]: staking, liquidity, trade, and burn payloads
//! - [`history`]: outgoing transaction log
//! - [`waiter`]: budgeted polling for confirmations, height, and balance
//! - [`orchestrator`]: the `Transactor` pipeline
//! - [`config`]: `WalletConfig` loading
//! - [`logging`]: tracing subscriber setup

pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod error;
pub mod history;
pub mod keys;
pub mod ledger;
pub mod logging;
pub mod metadata;
pub mod mnemonic;
pub mod orchestrator;
pub mod waiter;

// Re-exports for convenient access
pub use builder::{ProofRequest, TokenInit, TokenParams, decode_transaction};
pub use coin_selection::{CoinSelection, CoinSelector, SelectionTarget};
pub use config::WalletConfig;
pub use error::WalletError;
pub use history::{Receiver, TxHistory, TxHistoryEntry, TxKind, TxStatus};
pub use keys::{KeyMaterial, KeySet, KeyWallet, SecretBytes};
pub use ledger::{LedgerCache, PendingSpend, ReservedCoin, SpendLedger};
pub use logging::init_logging;
pub use metadata::{Metadata, StakingRole};
pub use mnemonic::{generate_mnemonic, mnemonic_to_account, mnemonic_to_master, parse_mnemonic};
pub use orchestrator::{BuildState, Transactor, TradeRequest, TxResult};
pub use waiter::{ConfirmationWaiter, PollBudget, TxConfirmation, TxWaitState, wait_for_change};
