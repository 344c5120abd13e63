//! Protocol constants. All monetary values are in nano-coins (1 coin = 10^9).

/// Smallest-unit multiplier for one whole native coin.
pub const COIN: u64 = 1_000_000_000;

/// Size of every Curve25519 key, scalar, and point encoding.
pub const KEY_SIZE: usize = 32;

/// BIP32-style chain code length.
pub const CHAIN_CODE_SIZE: usize = 32;

/// Child index length (big-endian).
pub const CHILD_INDEX_SIZE: usize = 4;

/// Length of the truncated double-SHA-256 checksum.
pub const CHECKSUM_SIZE: usize = 4;

/// Version byte prepended to every base58-check string.
pub const ENCODE_VERSION: u8 = 0x00;

/// Number of shards the ledger is partitioned into.
pub const DEFAULT_SHARD_COUNT: u8 = 8;

/// Protocol cap on inputs consumed by a single transaction.
pub const MAX_INPUT_PER_TX: usize = 30;

/// Decoy coins requested per ring by default.
pub const DEFAULT_RING_SIZE: usize = 20;

/// Surplus (in nano-coins) above which coin selection switches from the
/// exact knapsack search to the greedy smallest-first pass.
pub const GREEDY_SURPLUS_THRESHOLD: u64 = 1_000;

/// Largest surplus the exact knapsack search will ever size its table for.
pub const MAX_SURPLUS_THRESHOLD: u64 = 1_000_000;

/// Inputs consolidated by one defragmentation round.
pub const MAX_DEFRAGMENT_INPUTS: usize = 30;

/// Upper bound on defragmentation rounds.
pub const MAX_DEFRAGMENT_ROUNDS: u32 = 100;

/// Confirmations awaited between defragmentation rounds.
pub const DEFRAGMENT_CONFIRMATIONS: u64 = 2;

/// Upper bound on paged output-coin requests for one scan.
pub const MAX_OUTPUT_PAGES: u32 = 3_000;

/// Amount locked by a shard validator stake.
pub const SHARD_STAKING_AMOUNT: u64 = 1_750 * COIN;

/// Coin version produced by current transactions.
pub const COIN_VERSION_CURRENT: u8 = 2;

/// Legacy coin version that must be converted before spending privately.
pub const COIN_VERSION_LEGACY: u8 = 1;

/// Metadata type codes understood by the ledger.
pub mod meta {
    pub const BURNING_REQUEST: u32 = 240;
    pub const WITHDRAW_REWARD_REQUEST: u32 = 44;
    pub const SHARD_STAKING: u32 = 63;
    pub const BEACON_STAKING: u32 = 64;
    pub const STOP_AUTO_STAKING: u32 = 127;
    pub const PDE_WITHDRAWAL_REQUEST: u32 = 93;
    pub const PDE_CONTRIBUTION_REQUEST: u32 = 204;
    pub const PDE_CROSS_POOL_TRADE_REQUEST: u32 = 205;
}
