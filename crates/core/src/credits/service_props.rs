//! Property-based tests for the credit service.
//!
//! - Balance model: every accepted operation matches a simple model, and
//!   rejected debits leave balances untouched
//! - Summary consistency: summaries equal the sum of posted entries
//! - Idempotence: replayed references post once
//! - Expiration: a far-future sweep drains every account to exactly zero
//! - Proration: session amounts are rounded to two decimals

use std::sync::Arc;

use chrono::{Months, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use skillswap_shared::config::{CreditsConfig, LedgerConfig, SweeperConfig};
use skillswap_shared::types::{AccountId, TransferId};

use super::entry::EntryKind;
use super::error::CreditError;
use super::memory::InMemoryLedgerStore;
use super::policy::CreditPolicy;
use super::service::CreditService;
use super::store::LedgerStore;
use super::types::TransferRequest;

const ACCOUNTS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Purchase { account: usize, cents: i64 },
    Spend { account: usize, cents: i64 },
    Transfer { from: usize, to: usize, cents: i64 },
}

/// Strategy to generate credit amounts in cents (0.01 to 50.00).
fn cents() -> impl Strategy<Value = i64> {
    1i64..5_000i64
}

/// Strategy to generate one ledger operation.
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..ACCOUNTS, cents()).prop_map(|(account, cents)| Op::Purchase { account, cents }),
        (0..ACCOUNTS, cents()).prop_map(|(account, cents)| Op::Spend { account, cents }),
        (0..ACCOUNTS, 0..ACCOUNTS, cents())
            .prop_map(|(from, to, cents)| Op::Transfer { from, to, cents }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn setup() -> (CreditService, Arc<InMemoryLedgerStore>, Vec<AccountId>) {
    let store = Arc::new(InMemoryLedgerStore::new());
    let service = CreditService::new(store.clone(), &LedgerConfig::default(), CreditsConfig::default());
    let mut accounts = Vec::with_capacity(ACCOUNTS);
    for _ in 0..ACCOUNTS {
        let account = AccountId::new();
        service.open_account(account).await.unwrap();
        accounts.push(account);
    }
    (service, store, accounts)
}

/// Applies `ops` to the service and to a plain model, checking each step.
async fn run_model(
    service: &CreditService,
    accounts: &[AccountId],
    ops: &[Op],
) -> Result<Vec<Decimal>, TestCaseError> {
    let mut model = vec![Decimal::ZERO; ACCOUNTS];
    for (step, op) in ops.iter().enumerate() {
        match *op {
            Op::Purchase { account, cents } => {
                let amount = Decimal::new(cents, 2);
                service
                    .purchase(accounts[account], amount, &format!("pay-{step}"))
                    .await
                    .unwrap();
                model[account] += amount;
            }
            Op::Spend { account, cents } => {
                let amount = Decimal::new(cents, 2);
                let result = service
                    .debit(accounts[account], amount, EntryKind::SpentLearning, "spend", None)
                    .await;
                if model[account] >= amount {
                    prop_assert!(result.is_ok());
                    model[account] -= amount;
                } else {
                    let is_insufficient = matches!(result, Err(CreditError::InsufficientFunds { .. }));
                    prop_assert!(is_insufficient);
                }
            }
            Op::Transfer { from, to, cents } => {
                let amount = Decimal::new(cents, 2);
                let request = TransferRequest {
                    from: accounts[from],
                    to: accounts[to],
                    amount,
                    description: String::new(),
                    idempotency_key: Some(TransferId::new()),
                };
                let result = service.transfer(&request).await;
                if from == to {
                    let is_same = matches!(result, Err(CreditError::SameAccount(_)));
                    prop_assert!(is_same);
                } else if model[from] >= amount {
                    prop_assert!(result.is_ok());
                    model[from] -= amount;
                    model[to] += amount;
                } else {
                    let is_insufficient = matches!(result, Err(CreditError::InsufficientFunds { .. }));
                    prop_assert!(is_insufficient);
                }
            }
        }
    }
    Ok(model)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // =========================================================================
    // Balance model and summary consistency
    // =========================================================================

    /// *For any* operation sequence, balances follow the model, never go
    /// negative, and summaries match the entry log.
    #[test]
    fn prop_balances_follow_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = runtime();
        rt.block_on(async {
            let (service, store, accounts) = setup().await;
            let model = run_model(&service, &accounts, &ops).await?;

            for (index, account) in accounts.iter().enumerate() {
                let view = service.get_balance(*account).await.unwrap();
                prop_assert_eq!(view.current_balance, model[index]);
                prop_assert!(view.available_balance >= Decimal::ZERO);
                prop_assert_eq!(store.sum_posted(*account).await.unwrap(), view.current_balance);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    // =========================================================================
    // Idempotence
    // =========================================================================

    /// *For any* list of purchases each submitted twice, only the first
    /// submission of each payment reference posts.
    #[test]
    fn prop_replayed_purchases_post_once(amounts in prop::collection::vec(cents(), 1..15)) {
        let rt = runtime();
        rt.block_on(async {
            let (service, _, accounts) = setup().await;
            let account = accounts[0];
            let mut expected = Decimal::ZERO;

            for (i, cents) in amounts.iter().enumerate() {
                let amount = Decimal::new(*cents, 2);
                let reference = format!("receipt-{i}");
                let first = service.purchase(account, amount, &reference).await.unwrap();
                let replay = service.purchase(account, amount, &reference).await.unwrap();
                prop_assert_eq!(first.id, replay.id);
                expected += amount;
            }

            prop_assert_eq!(service.get_balance(account).await.unwrap().current_balance, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }

    // =========================================================================
    // Expiration
    // =========================================================================

    /// *For any* operation sequence, a sweep past every expiry leaves each
    /// account at exactly zero with a consistent summary.
    #[test]
    fn prop_far_future_sweep_drains_to_zero(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let rt = runtime();
        rt.block_on(async {
            let (service, store, accounts) = setup().await;
            run_model(&service, &accounts, &ops).await?;

            let report = service
                .sweeper(&SweeperConfig::default())
                .run_once(Utc::now() + Months::new(13))
                .await
                .unwrap()
                .unwrap();
            prop_assert!(report.failures.is_empty());

            for account in &accounts {
                let view = service.get_balance(*account).await.unwrap();
                prop_assert_eq!(view.current_balance, Decimal::ZERO);
                prop_assert_eq!(store.sum_posted(*account).await.unwrap(), Decimal::ZERO);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    // =========================================================================
    // Proration
    // =========================================================================

    /// *For any* positive duration, teaching credits have at most two
    /// decimals and lie within half a cent of the exact prorated value.
    #[test]
    fn prop_teaching_credits_rounded(minutes in 1i64..10_000i64) {
        let policy = CreditPolicy::new(CreditsConfig::default());
        let credits = policy.teaching_credits(minutes);
        let exact = policy.config().teaching_rate_per_hour * Decimal::from(minutes) / Decimal::from(60);

        prop_assert!(credits.normalize().scale() <= 2);
        prop_assert!((credits - exact).abs() <= Decimal::new(5, 3));
        prop_assert!(credits > Decimal::ZERO);
    }

    /// *For any* two durations, a longer session never costs less.
    #[test]
    fn prop_learning_cost_monotonic(a in 1i64..5_000i64, b in 1i64..5_000i64) {
        let policy = CreditPolicy::new(CreditsConfig::default());
        let (short, long) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(policy.learning_cost(short) <= policy.learning_cost(long));
    }
}
