//! Property tests over the full send pipeline.
//!
//! Value is conserved across a send: the balance drops by exactly the
//! payment plus fee, and the chosen inputs always cover both.

use proptest::prelude::*;

use cloak_core::constants::COIN_VERSION_CURRENT;
use cloak_core::types::TokenId;
use cloak_tests::helpers::*;
use cloak_wallet::WalletError;

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(f)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn send_conserves_value(
        values in prop::collection::vec(1u64..5_000, 1..25),
        share in 0.0f64..1.0,
        fee in 0u64..50,
    ) {
        let total: u64 = values.iter().sum();
        prop_assume!(total > fee);
        let amount = ((total - fee) as f64 * share) as u64;
        prop_assume!(amount > 0);

        block_on(async {
            let h = Harness::new(100);
            h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &values);

            let result = h
                .transactor
                .send_native(pay_stranger(amount), fee as i64, "")
                .await
                .unwrap();
            let input_total: u64 = result.inputs.iter().map(|c| c.value).sum();
            assert!(input_total >= amount + fee);
            assert!(result.inputs.len() <= h.transactor.config().max_input_per_tx);
            assert_eq!(h.native_balance().await, total - amount - fee);
        });
    }

    #[test]
    fn overspend_is_refused_without_side_effects(
        values in prop::collection::vec(1u64..1_000, 0..10),
        extra in 1u64..1_000,
    ) {
        let total: u64 = values.iter().sum();

        block_on(async {
            let h = Harness::new(101);
            h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &values);

            let err = h
                .transactor
                .send_native(pay_stranger(total + extra), 0, "")
                .await
                .unwrap_err();
            assert_eq!(err, WalletError::InsufficientFunds { have: total, need: total + extra });
            assert!(h.transactor.pending_spends().is_empty());
            assert_eq!(h.node.calls("broadcast_transaction"), 0);
        });
    }
}
