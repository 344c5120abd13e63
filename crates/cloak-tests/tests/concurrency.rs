//! Concurrent sends on one account never spend the same coin twice.

use std::collections::HashSet;

use cloak_core::constants::COIN_VERSION_CURRENT;
use cloak_core::types::TokenId;
use cloak_tests::helpers::*;
use cloak_wallet::WalletError;

#[tokio::test]
async fn concurrent_sends_use_disjoint_coins() {
    let h = Harness::new(40);
    // Nothing is mined, so only the local reservations keep coins apart.
    h.node.set_auto_mine(false);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[10, 10, 10, 10]);

    let (a, b) = tokio::join!(
        h.transactor.send_native(pay_stranger(15), 0, "a"),
        h.transactor.send_native(pay_stranger(15), 0, "b"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.tx_id, b.tx_id);

    let serials_a: HashSet<_> = a.inputs.iter().filter_map(|c| c.serial_number).collect();
    let serials_b: HashSet<_> = b.inputs.iter().filter_map(|c| c.serial_number).collect();
    assert_eq!(serials_a.len(), 2);
    assert_eq!(serials_b.len(), 2);
    assert!(serials_a.is_disjoint(&serials_b));
    assert_eq!(h.transactor.pending_spends().len(), 2);

    // Every coin is reserved now.
    let err = h.transactor.send_native(pay_stranger(15), 0, "c").await.unwrap_err();
    assert_eq!(err, WalletError::InsufficientFunds { have: 0, need: 15 });
}

#[tokio::test]
async fn resolved_sends_free_the_account_again() {
    let h = Harness::new(41);
    h.node.set_auto_mine(false);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[10, 10, 10, 10]);

    let (a, b) = tokio::join!(
        h.transactor.send_native(pay_stranger(15), 0, ""),
        h.transactor.send_native(pay_stranger(15), 0, ""),
    );
    a.unwrap();
    b.unwrap();

    h.node.mine_all();
    assert_eq!(h.transactor.refresh_history().await.unwrap(), 2);
    assert!(h.transactor.pending_spends().is_empty());
    // Each send left 5 change.
    assert_eq!(h.native_balance().await, 10);
    h.transactor.send_native(pay_stranger(10), 0, "").await.unwrap();
}

#[tokio::test]
async fn balance_reads_during_sends_never_count_reserved_coins() {
    let h = Harness::new(42);
    h.node.set_auto_mine(false);
    h.node.fund(TokenId::NATIVE, COIN_VERSION_CURRENT, &[25, 25, 25, 25]);

    let (sent, balance) = tokio::join!(
        h.transactor.send_native(pay_stranger(20), 1, ""),
        h.transactor.balance(&TokenId::NATIVE),
    );
    sent.unwrap();
    let balance = balance.unwrap();
    // Either before or after the reservation, never in between.
    assert!(balance == 100 || balance == 75, "unexpected balance {balance}");
    assert_eq!(h.native_balance().await, 75);
}
