//! Typed metadata payloads attached to non-transfer transactions.
//!
//! Each payload serializes as a flat JSON object with a numeric `Type`
//! field, the shape the ledger expects.

use serde::{Deserialize, Serialize};

use cloak_core::constants::meta;
use cloak_core::types::{TokenId, amount_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingRole {
    Shard,
    Beacon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StakingMeta {
    #[serde(rename = "Type")]
    pub meta_type: u32,
    pub funder_payment_address: String,
    pub reward_receiver_payment_address: String,
    #[serde(with = "amount_string")]
    pub staking_amount_shard: u64,
    pub committee_public_key: String,
    pub auto_re_staking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopAutoStakingMeta {
    #[serde(rename = "Type")]
    pub meta_type: u32,
    pub committee_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WithdrawRewardMeta {
    #[serde(rename = "Type")]
    pub meta_type: u32,
    pub payment_address: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BurningMeta {
    #[serde(rename = "Type")]
    pub meta_type: u32,
    pub burner_address: String,
    pub burning_amount: u64,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    /// External-chain address, without any `0x` prefix.
    pub remote_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContributionMeta {
    #[serde(rename = "Type")]
    pub meta_type: u32,
    #[serde(rename = "PDEContributionPairID")]
    pub pair_id: String,
    pub contributor_address_str: String,
    pub contributed_amount: u64,
    #[serde(rename = "TokenIDStr")]
    pub token_id: TokenId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WithdrawalMeta {
    #[serde(rename = "Type")]
    pub meta_type: u32,
    pub withdrawer_address_str: String,
    #[serde(rename = "WithdrawalToken1IDStr")]
    pub token1: TokenId,
    #[serde(rename = "WithdrawalToken2IDStr")]
    pub token2: TokenId,
    #[serde(with = "amount_string")]
    pub withdrawal_share_amt: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TradeMeta {
    #[serde(rename = "Type")]
    pub meta_type: u32,
    #[serde(rename = "TokenIDToBuyStr")]
    pub token_to_buy: TokenId,
    #[serde(rename = "TokenIDToSellStr")]
    pub token_to_sell: TokenId,
    pub sell_amount: u64,
    pub min_acceptable_amount: u64,
    pub trading_fee: u64,
    pub trader_address_str: String,
    pub tx_random_str: String,
    pub sub_trader_address_str: String,
    pub sub_tx_random_str: String,
}

/// Any metadata payload the wallet can attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metadata {
    Staking(StakingMeta),
    StopAutoStaking(StopAutoStakingMeta),
    WithdrawReward(WithdrawRewardMeta),
    Burning(BurningMeta),
    Contribution(ContributionMeta),
    Withdrawal(WithdrawalMeta),
    Trade(TradeMeta),
}

impl Metadata {
    pub fn staking(
        role: StakingRole,
        funder: String,
        reward_receiver: String,
        amount: u64,
        committee_public_key: String,
        auto_re_staking: bool,
    ) -> Self {
        Metadata::Staking(StakingMeta {
            meta_type: match role {
                StakingRole::Shard => meta::SHARD_STAKING,
                StakingRole::Beacon => meta::BEACON_STAKING,
            },
            funder_payment_address: funder,
            reward_receiver_payment_address: reward_receiver,
            staking_amount_shard: amount,
            committee_public_key,
            auto_re_staking,
        })
    }

    pub fn stop_auto_staking(committee_public_key: String) -> Self {
        Metadata::StopAutoStaking(StopAutoStakingMeta {
            meta_type: meta::STOP_AUTO_STAKING,
            committee_public_key,
        })
    }

    pub fn withdraw_reward(payment_address: String, token_id: TokenId) -> Self {
        Metadata::WithdrawReward(WithdrawRewardMeta {
            meta_type: meta::WITHDRAW_REWARD_REQUEST,
            payment_address,
            token_id,
        })
    }

    pub fn burning(burner: String, amount: u64, token_id: TokenId, remote_address: &str) -> Self {
        Metadata::Burning(BurningMeta {
            meta_type: meta::BURNING_REQUEST,
            burner_address: burner,
            burning_amount: amount,
            token_id,
            remote_address: remote_address
                .strip_prefix("0x")
                .unwrap_or(remote_address)
                .to_string(),
        })
    }

    pub fn contribution(pair_id: String, contributor: String, amount: u64, token_id: TokenId) -> Self {
        Metadata::Contribution(ContributionMeta {
            meta_type: meta::PDE_CONTRIBUTION_REQUEST,
            pair_id,
            contributor_address_str: contributor,
            contributed_amount: amount,
            token_id,
        })
    }

    pub fn withdrawal(withdrawer: String, token1: TokenId, token2: TokenId, share: u64) -> Self {
        Metadata::Withdrawal(WithdrawalMeta {
            meta_type: meta::PDE_WITHDRAWAL_REQUEST,
            withdrawer_address_str: withdrawer,
            token1,
            token2,
            withdrawal_share_amt: share,
        })
    }

    /// Numeric `Type` code of the payload.
    pub fn type_code(&self) -> u32 {
        match self {
            Metadata::Staking(m) => m.meta_type,
            Metadata::StopAutoStaking(m) => m.meta_type,
            Metadata::WithdrawReward(m) => m.meta_type,
            Metadata::Burning(m) => m.meta_type,
            Metadata::Contribution(m) => m.meta_type,
            Metadata::Withdrawal(m) => m.meta_type,
            Metadata::Trade(m) => m.meta_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staking_json_shape() {
        let m = Metadata::staking(
            StakingRole::Shard,
            "funder".into(),
            "receiver".into(),
            1_750_000_000_000,
            "committee".into(),
            true,
        );
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["Type"], 63);
        assert_eq!(json["StakingAmountShard"], "1750000000000");
        assert_eq!(json["AutoReStaking"], true);
        assert_eq!(m.type_code(), meta::SHARD_STAKING);
    }

    #[test]
    fn burning_strips_hex_prefix() {
        let m = Metadata::burning("me".into(), 5, TokenId::NATIVE, "0xabcdef");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["RemoteAddress"], "abcdef");
        assert_eq!(json["Type"], 240);
        assert_eq!(json["TokenID"], TokenId::NATIVE.to_string());
    }

    #[test]
    fn withdrawal_field_names() {
        let m = Metadata::withdrawal("me".into(), TokenId::NATIVE, TokenId::NATIVE, 9);
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("WithdrawalToken1IDStr").is_some());
        assert_eq!(json["WithdrawalShareAmt"], "9");
    }

    #[test]
    fn contribution_field_names() {
        let m = Metadata::contribution("pair".into(), "me".into(), 3, TokenId::NATIVE);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["PDEContributionPairID"], "pair");
        assert_eq!(json["ContributedAmount"], 3);
        assert_eq!(json["Type"], 204);
    }
}
