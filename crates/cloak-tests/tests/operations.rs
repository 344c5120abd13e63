//! Shape of each transaction kind as handed to the proof backend and node.

use cloak_core::constants::{COIN_VERSION_CURRENT, COIN_VERSION_LEGACY, SHARD_STAKING_AMOUNT, meta};
use cloak_core::types::{PaymentInfo, TokenId};
use cloak_tests::helpers::*;
use cloak_wallet::{StakingRole, TradeRequest, TxKind, TxStatus, WalletConfig, WalletError};

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mint_then_send_token() {
    let h = Harness::new(60);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[100]);
    let me = h.address();

    let minted = h
        .transactor
        .mint_token("Cloak Gold", "CLG", vec![PaymentInfo::new(me, 1_000)], 10, "genesis")
        .await
        .unwrap();
    assert_eq!(minted.kind, TxKind::TokenMint);
    assert_eq!(minted.token_id, Some(MINTED_TOKEN));
    assert!(minted.token_inputs.is_empty());

    let req = h.prover.last_request();
    assert!(req["PaymentInfo"].as_array().unwrap().is_empty());
    assert_eq!(req["TokenParams"]["TokenName"], "Cloak Gold");
    assert_eq!(req["TokenParams"]["TokenSymbol"], "CLG");
    assert_eq!(req["TokenParams"]["Amount"], "1000");
    assert!(req["TokenParams"]["TokenID"].is_null());
    assert!(req["TokenParams"]["InputCoins"].as_array().unwrap().is_empty());
    assert!(req["TokenID"].is_null());

    let entry = h.transactor.history_entry(&minted.tx_id).unwrap();
    assert_eq!(entry.token_id, MINTED_TOKEN);
    assert_eq!(entry.amount, 1_000);
    assert_eq!(h.transactor.balance(&MINTED_TOKEN).await.unwrap(), 1_000);

    let sent = h
        .transactor
        .send_token(MINTED_TOKEN, pay_stranger(300), Vec::new(), 10, "")
        .await
        .unwrap();
    assert_eq!(sent.kind, TxKind::TokenTransfer);
    assert_eq!(sent.token_amount, 300);
    assert_eq!(sent.token_inputs.len(), 1);

    let req = h.prover.last_request();
    assert_eq!(req["TokenParams"]["TokenID"], serde_json::json!(MINTED_TOKEN));
    assert_eq!(req["TokenID"], serde_json::json!(MINTED_TOKEN));
    assert_eq!(req["TokenParams"]["PaymentInfo"][0]["Amount"], "300");
    assert!(!req["TokenParams"]["CoinCache"].is_null());
    assert!(req["TokenParams"].get("TokenName").is_none());

    assert_eq!(h.node.broadcasts(), vec![true, true]);
    assert_eq!(h.transactor.balance(&MINTED_TOKEN).await.unwrap(), 700);
    assert_eq!(h.native_balance().await, 80);
    assert_eq!(h.transactor.history_for_token(&MINTED_TOKEN).len(), 2);
}

#[tokio::test]
async fn token_send_checks_arguments() {
    let h = Harness::new(61);
    let err = h
        .transactor
        .send_token(TokenId::NATIVE, pay_stranger(1), Vec::new(), 1, "")
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidRequest(_)));

    let err = h
        .transactor
        .send_token(token(1), Vec::new(), Vec::new(), 1, "")
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidRequest(_)));

    let err = h
        .transactor
        .mint_token("X", "X", Vec::new(), 1, "")
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidRequest(_)));
}

#[tokio::test]
async fn token_send_needs_native_fee() {
    let h = Harness::new(62);
    h.node.fund(token(1), COIN_VERSION_CURRENT, &[500]);

    let err = h
        .transactor
        .send_token(token(1), pay_stranger(100), Vec::new(), 10, "")
        .await
        .unwrap_err();
    assert_eq!(err, WalletError::InsufficientFunds { have: 0, need: 10 });
}

#[tokio::test]
async fn oversized_token_leg_fails_before_any_ring_fetch() {
    let h = Harness::new(59);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[100]);
    h.node.fund(token(1), COIN_VERSION_CURRENT, &[1; 35]);

    let err = h
        .transactor
        .send_token(token(1), pay_stranger(34), Vec::new(), 10, "")
        .await
        .unwrap_err();
    assert_eq!(err, WalletError::TxSizeExceeded { needed: 34, max: 30 });
    assert_eq!(h.node.calls("get_random_ring_members"), 0);
    assert_eq!(h.node.calls("get_node_time"), 0);
    assert!(h.prover.calls().is_empty());
    assert!(h.transactor.pending_spends().is_empty());
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn convert_spends_every_legacy_coin() {
    let h = Harness::new(63);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_LEGACY, &[5, 6]);

    let result = h.transactor.convert(1, "").await.unwrap();
    assert_eq!(result.kind, TxKind::Conversion);
    assert_eq!(result.inputs.len(), 2);

    let calls = h.prover.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].conversion);
    assert!(calls[0].request["CoinCache"].is_null());
    assert_eq!(h.node.calls("get_random_ring_members"), 0);
    assert_eq!(h.node.broadcasts(), vec![false]);

    assert_eq!(h.native_balance().await, 10);
    let legacy = h
        .transactor
        .unspent_coins(&TokenId::NATIVE, Some(COIN_VERSION_LEGACY))
        .await
        .unwrap();
    assert!(legacy.is_empty());
}

#[tokio::test]
async fn convert_without_legacy_coins_is_not_found() {
    let h = Harness::new(64);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[100]);

    let err = h.transactor.convert(1, "").await.unwrap_err();
    assert!(matches!(err, WalletError::NotFound(_)));
    assert!(h.prover.calls().is_empty());
}

#[tokio::test]
async fn convert_token_pays_fee_in_current_native() {
    let h = Harness::new(65);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[20]);
    h.node.fund(token(1), COIN_VERSION_LEGACY, &[3, 4]);

    let result = h.transactor.convert_token(token(1), 2, "").await.unwrap();
    assert_eq!(result.inputs.len(), 1);
    assert_eq!(result.token_inputs.len(), 2);
    assert!(h.prover.calls()[0].conversion);
    assert_eq!(h.node.broadcasts(), vec![true]);

    assert_eq!(h.transactor.balance(&token(1)).await.unwrap(), 7);
    assert_eq!(h.native_balance().await, 18);
}

// ---------------------------------------------------------------------------
// Staking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stake_pays_the_burning_address() {
    let h = Harness::new(66);
    h.node
        .fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[SHARD_STAKING_AMOUNT, 50]);
    let me = h.address();

    let result = h
        .transactor
        .stake(StakingRole::Shard, "committee-key", &me, true, 10)
        .await
        .unwrap();
    assert_eq!(result.kind, TxKind::Stake);
    assert_eq!(result.amount, SHARD_STAKING_AMOUNT);

    let req = h.prover.last_request();
    assert_eq!(req["PaymentInfo"][0]["PaymentAddress"], BURNING_ADDRESS);
    assert_eq!(req["PaymentInfo"][0]["Amount"], SHARD_STAKING_AMOUNT.to_string());
    assert_eq!(req["Metadata"]["Type"], meta::SHARD_STAKING);
    assert_eq!(req["Metadata"]["CommitteePublicKey"], "committee-key");
    assert_eq!(req["Metadata"]["FunderPaymentAddress"], me.as_str());
    assert_eq!(req["Metadata"]["AutoReStaking"], true);

    let entry = h.transactor.history_entry(&result.tx_id).unwrap();
    assert_eq!(entry.metadata.unwrap()["Type"], meta::SHARD_STAKING);
}

#[tokio::test]
async fn unstake_sends_zero_to_burning_address() {
    let h = Harness::new(67);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[50]);

    let result = h.transactor.unstake("committee-key", 5).await.unwrap();
    assert_eq!(result.kind, TxKind::Unstake);
    let req = h.prover.last_request();
    assert_eq!(req["PaymentInfo"][0]["PaymentAddress"], BURNING_ADDRESS);
    assert_eq!(req["PaymentInfo"][0]["Amount"], "0");
    assert_eq!(req["Metadata"]["Type"], meta::STOP_AUTO_STAKING);
}

#[tokio::test]
async fn withdraw_reward_has_no_payments() {
    let h = Harness::new(68);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[50]);

    h.transactor.withdraw_reward(TokenId::NATIVE, 5).await.unwrap();
    let req = h.prover.last_request();
    assert!(req["PaymentInfo"].as_array().unwrap().is_empty());
    assert_eq!(req["Metadata"]["Type"], meta::WITHDRAW_REWARD_REQUEST);
    assert_eq!(req["Metadata"]["PaymentAddress"], h.address().as_str());
}

// ---------------------------------------------------------------------------
// Liquidity and trading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn contribute_native_pays_burning_address() {
    let h = Harness::new(69);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[100]);

    h.transactor
        .contribute_liquidity("pair-1", TokenId::NATIVE, 60, 5, "")
        .await
        .unwrap();
    let req = h.prover.last_request();
    assert_eq!(req["PaymentInfo"][0]["PaymentAddress"], BURNING_ADDRESS);
    assert_eq!(req["PaymentInfo"][0]["Amount"], "60");
    assert!(req["TokenParams"].is_null());
    assert_eq!(req["Metadata"]["Type"], meta::PDE_CONTRIBUTION_REQUEST);
    assert_eq!(req["Metadata"]["PDEContributionPairID"], "pair-1");
    assert_eq!(h.node.broadcasts(), vec![false]);
}

#[tokio::test]
async fn contribute_token_uses_token_payment() {
    let h = Harness::new(70);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[50]);
    h.node.fund(token(3), COIN_VERSION_CURRENT, &[80]);

    h.transactor
        .contribute_liquidity("pair-1", token(3), 60, 5, "")
        .await
        .unwrap();
    let req = h.prover.last_request();
    assert!(req["PaymentInfo"].as_array().unwrap().is_empty());
    assert_eq!(req["TokenParams"]["PaymentInfo"][0]["PaymentAddress"], BURNING_ADDRESS);
    assert_eq!(req["TokenParams"]["PaymentInfo"][0]["Amount"], "60");
    assert_eq!(req["Metadata"]["TokenIDStr"], serde_json::json!(token(3)));
    assert_eq!(h.node.broadcasts(), vec![true]);
    assert_eq!(h.transactor.balance(&token(3)).await.unwrap(), 20);
}

#[tokio::test]
async fn withdraw_liquidity_has_no_payments() {
    let h = Harness::new(71);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[50]);

    h.transactor
        .withdraw_liquidity(TokenId::NATIVE, token(3), 500, 5, "")
        .await
        .unwrap();
    let req = h.prover.last_request();
    assert!(req["PaymentInfo"].as_array().unwrap().is_empty());
    assert_eq!(req["Metadata"]["Type"], meta::PDE_WITHDRAWAL_REQUEST);
    assert_eq!(req["Metadata"]["WithdrawalShareAmt"], "500");
}

#[tokio::test]
async fn trade_selling_native_adds_trading_fee() {
    let h = Harness::new(72);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[1_000]);

    let request = TradeRequest {
        token_to_sell: TokenId::NATIVE,
        token_to_buy: token(4),
        sell_amount: 500,
        min_acceptable_amount: 10,
        trading_fee: 20,
    };
    let result = h.transactor.trade(request, 5, "").await.unwrap();
    assert_eq!(result.kind, TxKind::Trade);

    let req = h.prover.last_request();
    assert_eq!(req["PaymentInfo"][0]["PaymentAddress"], BURNING_ADDRESS);
    assert_eq!(req["PaymentInfo"][0]["Amount"], "520");
    assert!(req["TokenParams"].is_null());
    let m = &req["Metadata"];
    assert_eq!(m["Type"], meta::PDE_CROSS_POOL_TRADE_REQUEST);
    assert_eq!(m["SellAmount"], 500);
    assert_eq!(m["TradingFee"], 20);
    assert_ne!(m["TraderAddressStr"], m["SubTraderAddressStr"]);
    assert_eq!(h.node.broadcasts(), vec![false]);
    assert_eq!(h.native_balance().await, 475);
}

#[tokio::test]
async fn trade_selling_token_splits_payments() {
    let h = Harness::new(73);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[100]);
    h.node.fund(token(4), COIN_VERSION_CURRENT, &[700]);

    let request = TradeRequest {
        token_to_sell: token(4),
        token_to_buy: TokenId::NATIVE,
        sell_amount: 500,
        min_acceptable_amount: 1,
        trading_fee: 20,
    };
    h.transactor.trade(request, 5, "").await.unwrap();

    let req = h.prover.last_request();
    assert_eq!(req["PaymentInfo"][0]["Amount"], "20");
    assert_eq!(req["TokenParams"]["PaymentInfo"][0]["Amount"], "500");
    assert_eq!(req["TokenParams"]["TokenID"], serde_json::json!(token(4)));
    assert_eq!(h.node.broadcasts(), vec![true]);
    assert_eq!(h.transactor.balance(&token(4)).await.unwrap(), 200);
    assert_eq!(h.native_balance().await, 75);
}

#[tokio::test]
async fn trade_same_token_rejected() {
    let h = Harness::new(74);
    let request = TradeRequest {
        token_to_sell: token(4),
        token_to_buy: token(4),
        sell_amount: 1,
        min_acceptable_amount: 1,
        trading_fee: 0,
    };
    let err = h.transactor.trade(request, 1, "").await.unwrap_err();
    assert!(matches!(err, WalletError::InvalidRequest(_)));
}

// ---------------------------------------------------------------------------
// Burning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn burn_sends_tokens_to_burning_address() {
    let h = Harness::new(75);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[50]);
    h.node.fund(token(2), COIN_VERSION_CURRENT, &[100]);

    let result = h
        .transactor
        .burn(token(2), 60, "0xabc123", 5, "")
        .await
        .unwrap();
    assert_eq!(result.kind, TxKind::Burn);
    assert_eq!(result.token_id, Some(token(2)));

    let req = h.prover.last_request();
    assert_eq!(req["TokenParams"]["PaymentInfo"][0]["PaymentAddress"], BURNING_ADDRESS);
    assert_eq!(req["TokenParams"]["PaymentInfo"][0]["Amount"], "60");
    assert_eq!(req["Metadata"]["Type"], meta::BURNING_REQUEST);
    assert_eq!(req["Metadata"]["RemoteAddress"], "abc123");
    assert_eq!(req["Metadata"]["BurningAmount"], 60);

    let entry = h.transactor.history_entry(&result.tx_id).unwrap();
    assert_eq!(entry.kind, TxKind::Burn);
    assert_eq!(entry.token_id, token(2));
    assert_eq!(entry.amount, 60);
    assert_eq!(h.transactor.balance(&token(2)).await.unwrap(), 40);
}

#[tokio::test]
async fn native_burn_rejected() {
    let h = Harness::new(76);
    let err = h
        .transactor
        .burn(TokenId::NATIVE, 1, "abc", 1, "")
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidRequest(_)));
    assert_eq!(h.node.calls("get_burning_address"), 0);
}

// ---------------------------------------------------------------------------
// Defragmentation
// ---------------------------------------------------------------------------

fn defrag_config() -> WalletConfig {
    WalletConfig {
        defragment_max_inputs: 3,
        ..test_config()
    }
}

#[tokio::test]
async fn defragment_merges_down_to_one_coin() {
    let h = Harness::with_config(77, defrag_config());
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[10; 7]);

    let sent = h.transactor.defragment(1, None).await.unwrap();
    // 7 coins -> 5 -> 3 -> 1, one fee per round.
    assert_eq!(sent.len(), 3);
    let coins = h
        .transactor
        .unspent_coins(&TokenId::NATIVE, Some(COIN_VERSION_CURRENT))
        .await
        .unwrap();
    assert_eq!(coins.len(), 1);
    assert_eq!(coins[0].value, 67);

    for tx_id in &sent {
        let entry = h.transactor.history_entry(tx_id).unwrap();
        assert_eq!(entry.kind, TxKind::Defragment);
        assert_eq!(entry.status, TxStatus::Confirmed);
        assert_eq!(entry.info, "defragment");
    }
    for call in h.prover.calls() {
        assert!(call.request["PaymentInfo"].as_array().unwrap().is_empty());
        assert_eq!(call.request["InputCoins"].as_array().unwrap().len(), 3);
        assert_eq!(call.request["Info"], "ZGVmcmFnbWVudA==");
    }
    assert!(h.transactor.pending_spends().is_empty());
}

#[tokio::test]
async fn defragment_single_coin_is_a_no_op() {
    let h = Harness::with_config(78, defrag_config());
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[10]);

    let sent = h.transactor.defragment(1, None).await.unwrap();
    assert!(sent.is_empty());
    assert_eq!(h.node.calls("broadcast_transaction"), 0);
}

#[tokio::test]
async fn defragment_respects_round_limit() {
    let config = WalletConfig {
        defragment_max_rounds: 1,
        ..defrag_config()
    };
    let h = Harness::with_config(79, config);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[10; 7]);

    let sent = h.transactor.defragment(1, None).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(h.native_balance().await, 69);
}

#[tokio::test]
async fn defragment_needs_two_inputs_per_round() {
    let h = Harness::new(80);
    let err = h.transactor.defragment(1, Some(1)).await.unwrap_err();
    assert!(matches!(err, WalletError::InvalidRequest(_)));
}
