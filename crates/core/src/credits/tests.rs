//! Scenario tests for the credit service over the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Months, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skillswap_shared::config::{CreditsConfig, LedgerConfig, SweeperConfig};
use skillswap_shared::types::{AccountId, PageRequest, SessionId, SortDirection, TransferId};

use super::entry::{EntryKind, EntryReference, EntryStatus, NewEntry, ReferenceType};
use super::error::CreditError;
use super::memory::InMemoryLedgerStore;
use super::orchestrator::TransferOrchestrator;
use super::service::CreditService;
use super::store::LedgerStore;
use super::types::{EntryFilter, HistoryQuery, HistorySortField, TransferRequest};

fn setup() -> (CreditService, Arc<InMemoryLedgerStore>) {
    let store = Arc::new(InMemoryLedgerStore::new());
    let service = CreditService::new(store.clone(), &LedgerConfig::default(), CreditsConfig::default());
    (service, store)
}

async fn account_with(service: &CreditService, amount: Decimal) -> AccountId {
    let account = AccountId::new();
    service.open_account(account).await.unwrap();
    if amount > Decimal::ZERO {
        service
            .purchase(account, amount, &format!("seed-{account}"))
            .await
            .unwrap();
    }
    account
}

async fn balance(service: &CreditService, account: AccountId) -> Decimal {
    service.get_balance(account).await.unwrap().current_balance
}

fn transfer(from: AccountId, to: AccountId, amount: Decimal) -> TransferRequest {
    TransferRequest {
        from,
        to,
        amount,
        description: "thanks".into(),
        idempotency_key: None,
    }
}

// ========== Bonuses & Session Billing ==========

#[tokio::test]
async fn test_registration_bonus_granted_once() {
    let (service, _) = setup();
    let account = account_with(&service, Decimal::ZERO).await;

    let first = service.grant_registration_bonus(account).await.unwrap();
    let replay = service.grant_registration_bonus(account).await.unwrap();

    assert_eq!(first.id, replay.id);
    assert_eq!(first.amount, dec!(10.00));
    assert!(first.expires_at.is_some());
    assert_eq!(balance(&service, account).await, dec!(10.00));
}

#[tokio::test]
async fn test_teaching_session_earns_prorated_credits() {
    let (service, _) = setup();
    let teacher = account_with(&service, Decimal::ZERO).await;
    let session = SessionId::new();

    let entry = service
        .record_teaching_earnings(teacher, session, 90)
        .await
        .unwrap();
    service
        .record_teaching_earnings(teacher, session, 90)
        .await
        .unwrap();

    assert_eq!(entry.amount, dec!(15.00));
    assert_eq!(entry.kind, EntryKind::EarnedTeaching);
    assert_eq!(balance(&service, teacher).await, dec!(15.00));

    let stats = service.get_statistics(teacher).await.unwrap();
    assert_eq!(stats.lifetime_earnings, dec!(15.00));
    assert_eq!(stats.total_earned, dec!(15.00));
}

#[tokio::test]
async fn test_learning_charge_rejected_when_short() {
    let (service, _) = setup();
    let learner = account_with(&service, dec!(5)).await;

    let err = service
        .charge_learning_session(learner, SessionId::new(), 90)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CreditError::InsufficientFunds { available, requested, .. }
            if available == dec!(5) && requested == dec!(12.00)
    ));
    assert_eq!(balance(&service, learner).await, dec!(5));
    let history = service
        .get_history(learner, &HistoryQuery::default())
        .await
        .unwrap();
    assert_eq!(history.meta.total, 1);
}

#[tokio::test]
async fn test_zero_duration_session_is_invalid() {
    let (service, _) = setup();
    let teacher = account_with(&service, Decimal::ZERO).await;
    let err = service
        .record_teaching_earnings(teacher, SessionId::new(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, CreditError::InvalidAmount { .. }));
}

#[tokio::test]
async fn test_completion_bonus_for_both_participants() {
    let (service, _) = setup();
    let teacher = account_with(&service, Decimal::ZERO).await;
    let learner = account_with(&service, Decimal::ZERO).await;
    let session = SessionId::new();

    service.grant_completion_bonus(teacher, session).await.unwrap();
    service.grant_completion_bonus(learner, session).await.unwrap();
    service.grant_completion_bonus(learner, session).await.unwrap();

    assert_eq!(balance(&service, teacher).await, dec!(2.00));
    assert_eq!(balance(&service, learner).await, dec!(2.00));
}

#[tokio::test]
async fn test_penalty_never_overdraws() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(1)).await;

    let err = service
        .apply_cancellation_penalty(account, SessionId::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CreditError::InsufficientFunds { .. }));
    assert_eq!(balance(&service, account).await, dec!(1));
}

#[tokio::test]
async fn test_referral_to_self_rejected() {
    let (service, _) = setup();
    let account = account_with(&service, Decimal::ZERO).await;
    assert!(matches!(
        service.grant_referral_bonus(account, account).await,
        Err(CreditError::SameAccount(_))
    ));
}

// ========== Transfers ==========

#[tokio::test]
async fn test_transfer_moves_credits_atomically() {
    let (service, _) = setup();
    let alice = account_with(&service, dec!(10)).await;
    let bob = account_with(&service, Decimal::ZERO).await;

    let receipt = service.transfer(&transfer(alice, bob, dec!(5))).await.unwrap();

    assert_eq!(receipt.debit.amount, dec!(-5));
    assert_eq!(receipt.debit.kind, EntryKind::TransferOut);
    assert_eq!(receipt.credit.amount, dec!(5));
    assert_eq!(receipt.credit.kind, EntryKind::TransferIn);
    assert_eq!(receipt.debit.reference, receipt.credit.reference);
    assert!(receipt.credit.expires_at.is_some());
    assert_eq!(balance(&service, alice).await, dec!(5));
    assert_eq!(balance(&service, bob).await, dec!(5));
}

#[tokio::test]
async fn test_transfer_replay_with_idempotency_key() {
    let (service, _) = setup();
    let alice = account_with(&service, dec!(10)).await;
    let bob = account_with(&service, Decimal::ZERO).await;
    let request = TransferRequest {
        idempotency_key: Some(TransferId::new()),
        ..transfer(alice, bob, dec!(4))
    };

    let first = service.transfer(&request).await.unwrap();
    let replay = service.transfer(&request).await.unwrap();

    assert_eq!(first, replay);
    assert_eq!(balance(&service, alice).await, dec!(6));
    assert_eq!(balance(&service, bob).await, dec!(4));
}

#[tokio::test]
async fn test_reused_transfer_key_for_other_accounts_is_rejected() {
    let (service, _) = setup();
    let alice = account_with(&service, dec!(10)).await;
    let bob = account_with(&service, Decimal::ZERO).await;
    let carol = account_with(&service, dec!(10)).await;
    let key = Some(TransferId::new());

    service
        .transfer(&TransferRequest {
            idempotency_key: key,
            ..transfer(alice, bob, dec!(4))
        })
        .await
        .unwrap();

    let reused = service
        .transfer(&TransferRequest {
            idempotency_key: key,
            ..transfer(carol, bob, dec!(4))
        })
        .await;
    assert!(matches!(reused, Err(CreditError::DuplicateReference { .. })));

    let other_amount = service
        .transfer(&TransferRequest {
            idempotency_key: key,
            ..transfer(alice, bob, dec!(3))
        })
        .await;
    assert!(matches!(other_amount, Err(CreditError::DuplicateReference { .. })));

    assert_eq!(balance(&service, alice).await, dec!(6));
    assert_eq!(balance(&service, bob).await, dec!(4));
    assert_eq!(balance(&service, carol).await, dec!(10));
}

#[tokio::test]
async fn test_transfer_rejections_leave_balances_untouched() {
    let (service, _) = setup();
    let alice = account_with(&service, dec!(10)).await;
    let bob = account_with(&service, Decimal::ZERO).await;

    assert!(matches!(
        service.transfer(&transfer(alice, alice, dec!(1))).await,
        Err(CreditError::SameAccount(_))
    ));
    assert!(matches!(
        service.transfer(&transfer(alice, bob, dec!(0))).await,
        Err(CreditError::InvalidAmount { .. })
    ));
    assert!(matches!(
        service.transfer(&transfer(alice, bob, dec!(1.001))).await,
        Err(CreditError::InvalidAmount { .. })
    ));
    assert!(matches!(
        service.transfer(&transfer(alice, bob, dec!(10.01))).await,
        Err(CreditError::InsufficientFunds { .. })
    ));
    assert!(matches!(
        service.transfer(&transfer(alice, AccountId::new(), dec!(1))).await,
        Err(CreditError::AccountNotFound(_))
    ));

    assert_eq!(balance(&service, alice).await, dec!(10));
    assert_eq!(balance(&service, bob).await, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_never_overdraw() {
    let (service, _) = setup();
    let alice = account_with(&service, dec!(10)).await;
    let bob = account_with(&service, Decimal::ZERO).await;

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.transfer(&transfer(alice, bob, dec!(1))).await })
        })
        .collect();

    let mut succeeded = 0;
    for task in futures::future::join_all(tasks).await {
        match task.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(matches!(err, CreditError::InsufficientFunds { .. })),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(balance(&service, alice).await, Decimal::ZERO);
    assert_eq!(balance(&service, bob).await, dec!(10));
    assert!(service.reconcile(alice).await.unwrap().is_consistent());
    assert!(service.reconcile(bob).await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposing_transfers_do_not_deadlock() {
    let (service, _) = setup();
    let alice = account_with(&service, dec!(50)).await;
    let bob = account_with(&service, dec!(50)).await;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let service = service.clone();
            let (from, to) = if i % 2 == 0 { (alice, bob) } else { (bob, alice) };
            tokio::spawn(async move { service.transfer(&transfer(from, to, dec!(1))).await })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        task.unwrap().unwrap();
    }

    assert_eq!(balance(&service, alice).await, dec!(50));
    assert_eq!(balance(&service, bob).await, dec!(50));
}

// ========== Purchases & Adjustments ==========

#[tokio::test]
async fn test_purchase_requires_reference_and_is_idempotent() {
    let (service, _) = setup();
    let account = account_with(&service, Decimal::ZERO).await;

    assert!(matches!(
        service.purchase(account, dec!(20), "  ").await,
        Err(CreditError::InvalidReference(_))
    ));

    let before = Utc::now();
    let first = service.purchase(account, dec!(20), "pay_123").await.unwrap();
    let after = Utc::now();
    assert_eq!(first.kind, EntryKind::Purchase);
    assert_eq!(first.status, EntryStatus::Completed);
    let expires_at = first.expires_at.unwrap();
    assert!(expires_at >= before.checked_add_months(Months::new(12)).unwrap());
    assert!(expires_at <= after.checked_add_months(Months::new(12)).unwrap());

    let replay = service.purchase(account, dec!(20), "pay_123").await.unwrap();
    assert_eq!(first.id, replay.id);
    assert_eq!(balance(&service, account).await, dec!(20));
}

#[tokio::test]
async fn test_admin_adjustment_either_sign() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(5)).await;

    service.adjust(account, dec!(3), "T-1", "goodwill").await.unwrap();
    service.adjust(account, dec!(-2), "T-2", "correction").await.unwrap();
    assert_eq!(balance(&service, account).await, dec!(6));

    assert!(matches!(
        service.adjust(account, dec!(-7), "T-3", "too much").await,
        Err(CreditError::InsufficientFunds { .. })
    ));
    assert!(matches!(
        service.adjust(account, dec!(1), "", "no ticket").await,
        Err(CreditError::InvalidReference(_))
    ));
    assert!(matches!(
        service.adjust(account, dec!(0), "T-4", "nothing").await,
        Err(CreditError::InvalidAmount { .. })
    ));
}

#[tokio::test]
async fn test_refund_once_per_reference() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(20)).await;
    let charge = service
        .charge_learning_session(account, SessionId::new(), 60)
        .await
        .unwrap();
    let reference = EntryReference::new(charge.id.to_string(), ReferenceType::Refund);

    service
        .refund(account, dec!(8), reference.clone(), "teacher no-show")
        .await
        .unwrap();
    service
        .refund(account, dec!(8), reference, "teacher no-show")
        .await
        .unwrap();

    assert_eq!(balance(&service, account).await, dec!(20));
}

// ========== Queries ==========

#[tokio::test]
async fn test_unknown_account_queries() {
    let (service, _) = setup();
    let ghost = AccountId::new();
    assert!(matches!(
        service.get_balance(ghost).await,
        Err(CreditError::AccountNotFound(_))
    ));
    assert!(matches!(
        service.get_history(ghost, &HistoryQuery::default()).await,
        Err(CreditError::AccountNotFound(_))
    ));
}

#[tokio::test]
async fn test_open_account_is_idempotent() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(7)).await;
    let summary = service.open_account(account).await.unwrap();
    assert_eq!(summary.current_balance, dec!(7));
}

#[tokio::test]
async fn test_history_filter_sort_and_page() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(30)).await;
    for minutes in [30, 60, 90] {
        service
            .charge_learning_session(account, SessionId::new(), minutes)
            .await
            .unwrap();
    }

    let query = HistoryQuery {
        page: PageRequest::new(1, 2),
        sort_by: HistorySortField::Amount,
        direction: SortDirection::Asc,
        filter: EntryFilter {
            kind: Some(EntryKind::SpentLearning),
            ..EntryFilter::default()
        },
    };
    let page = service.get_history(account, &query).await.unwrap();

    assert_eq!(page.meta.total, 3);
    assert_eq!(page.meta.total_pages, 2);
    let amounts: Vec<Decimal> = page.data.iter().map(|e| e.amount).collect();
    assert_eq!(amounts, vec![dec!(-12.00), dec!(-8.00)]);
}

#[tokio::test]
async fn test_history_sorts_by_kind_name() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(30)).await;
    service.grant_registration_bonus(account).await.unwrap();
    service
        .charge_learning_session(account, SessionId::new(), 60)
        .await
        .unwrap();

    let query = HistoryQuery {
        sort_by: HistorySortField::Kind,
        direction: SortDirection::Asc,
        ..HistoryQuery::default()
    };
    let page = service.get_history(account, &query).await.unwrap();
    let kinds: Vec<&str> = page.data.iter().map(|e| e.kind.as_str()).collect();
    let mut sorted = kinds.clone();
    sorted.sort_unstable();
    assert_eq!(kinds, sorted);
    assert_eq!(kinds.first(), Some(&"bonus_registration"));
}

#[tokio::test]
async fn test_statistics_report_expiring_soon() {
    let (service, store) = setup();
    let account = account_with(&service, dec!(10)).await;
    let now = Utc::now();
    let orchestrator = TransferOrchestrator::new(store.clone(), &LedgerConfig::default());
    orchestrator
        .credit(
            NewEntry::credit(account, dec!(3), EntryKind::BonusReferral, "soon", now)
                .expiring_at(Some(now + Duration::days(10))),
        )
        .await
        .unwrap();

    let stats = service.get_statistics(account).await.unwrap();
    assert_eq!(stats.current_balance, dec!(13));
    assert_eq!(stats.expiring_soon, dec!(3));
    assert_eq!(stats.expiring_soon_count, 1);
    assert_eq!(stats.total_spent, Decimal::ZERO);
}

#[tokio::test]
async fn test_has_sufficient_credits() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(8)).await;
    assert!(service.has_sufficient_credits(account, dec!(8)).await.unwrap());
    assert!(!service.has_sufficient_credits(account, dec!(8.01)).await.unwrap());
    assert!(service.has_sufficient_credits(account, dec!(-1)).await.is_err());
}

// ========== Reservations ==========

#[tokio::test]
async fn test_reservation_lifecycle() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(10)).await;

    service.reserve(account, dec!(6), "session-42").await.unwrap();
    let view = service.get_balance(account).await.unwrap();
    assert_eq!(view.reserved_amount, dec!(6));
    assert_eq!(view.available_balance, dec!(4));

    assert!(matches!(
        service
            .debit(account, dec!(5), EntryKind::Penalty, "late", None)
            .await,
        Err(CreditError::InsufficientFunds { .. })
    ));
    assert!(matches!(
        service.reserve(account, dec!(1), "session-42").await,
        Err(CreditError::ReservationExists { .. })
    ));

    let captured = service
        .capture_reservation(account, "session-42", EntryKind::SpentLearning, None)
        .await
        .unwrap();
    assert_eq!(captured.amount, dec!(-6));

    let view = service.get_balance(account).await.unwrap();
    assert_eq!(view.current_balance, dec!(4));
    assert_eq!(view.reserved_amount, Decimal::ZERO);
    assert!(service.reservations(account).await.unwrap().is_empty());

    assert!(matches!(
        service.release_reservation(account, "session-42").await,
        Err(CreditError::ReservationNotFound { .. })
    ));
}

#[tokio::test]
async fn test_reserve_more_than_available_fails() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(3)).await;
    assert!(matches!(
        service.reserve(account, dec!(4), "hold").await,
        Err(CreditError::InsufficientFunds { .. })
    ));
    service.reserve(account, dec!(3), "hold").await.unwrap();
    let released = service.release_reservation(account, "hold").await.unwrap();
    assert_eq!(released.amount, dec!(3));
    assert_eq!(service.get_balance(account).await.unwrap().available_balance, dec!(3));
}

// ========== Expiration ==========

#[tokio::test]
async fn test_sweep_expires_lapsed_credits() {
    let (service, store) = setup();
    let account = account_with(&service, dec!(20)).await;
    let sweeper = service.sweeper(&SweeperConfig::default());
    let later = Utc::now() + Months::new(13);

    let report = sweeper.run_once(later).await.unwrap().unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.credits_negated, dec!(20));
    assert!(report.failures.is_empty());
    assert_eq!(balance(&service, account).await, Decimal::ZERO);

    let history = service
        .get_history(account, &HistoryQuery::default())
        .await
        .unwrap();
    let expiration = history
        .data
        .iter()
        .find(|e| e.kind == EntryKind::Expiration)
        .unwrap();
    assert_eq!(expiration.amount, dec!(-20));
    let original = history
        .data
        .iter()
        .find(|e| e.kind == EntryKind::Purchase)
        .unwrap();
    assert_eq!(original.status, EntryStatus::Expired);
    assert_eq!(
        expiration.reference,
        Some(EntryReference::new(original.id.to_string(), ReferenceType::CreditExpiration))
    );

    assert_eq!(store.sum_posted(account).await.unwrap(), Decimal::ZERO);

    let again = sweeper.run_once(later).await.unwrap().unwrap();
    assert_eq!(again.examined, 0);
}

#[tokio::test]
async fn test_sweep_negates_only_what_remains() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(20)).await;
    service
        .charge_learning_session(account, SessionId::new(), 90)
        .await
        .unwrap();

    let report = service
        .sweeper(&SweeperConfig::default())
        .run_once(Utc::now() + Months::new(13))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.credits_negated, dec!(8));
    assert_eq!(balance(&service, account).await, Decimal::ZERO);
    let stats = service.get_statistics(account).await.unwrap();
    assert_eq!(stats.total_spent, dec!(12.00));
}

#[tokio::test]
async fn test_sweep_ignores_unexpired_credits() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(20)).await;
    let report = service
        .sweeper(&SweeperConfig::default())
        .run_once(Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(balance(&service, account).await, dec!(20));
}

#[tokio::test]
async fn test_sweep_negates_held_credits_and_cancels_hold() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(10)).await;
    service.reserve(account, dec!(10), "booking-1").await.unwrap();

    let report = service
        .sweeper(&SweeperConfig::default())
        .run_once(Utc::now() + Months::new(13))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(report.credits_negated, dec!(10));
    assert_eq!(report.reservations_released, 1);
    let view = service.get_balance(account).await.unwrap();
    assert_eq!(view.current_balance, Decimal::ZERO);
    assert_eq!(view.reserved_amount, Decimal::ZERO);
    assert!(matches!(
        service.release_reservation(account, "booking-1").await,
        Err(CreditError::ReservationNotFound { .. })
    ));
    assert_eq!(balance(&service, account).await, Decimal::ZERO);
    assert!(service.reconcile(account).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_sweep_cancels_only_holds_the_balance_cannot_cover() {
    let (service, _) = setup();
    let account = account_with(&service, dec!(10)).await;
    // adjustments do not expire
    service.adjust(account, dec!(5), "T-9", "goodwill").await.unwrap();
    service.reserve(account, dec!(3), "older").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    service.reserve(account, dec!(4), "newer").await.unwrap();

    let report = service
        .sweeper(&SweeperConfig::default())
        .run_once(Utc::now() + Months::new(13))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.credits_negated, dec!(10));
    assert_eq!(report.reservations_released, 1);
    let view = service.get_balance(account).await.unwrap();
    assert_eq!(view.current_balance, dec!(5));
    assert_eq!(view.reserved_amount, dec!(3));
    assert_eq!(view.available_balance, dec!(2));
    let held = service.reservations(account).await.unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].purpose, "older");
}
