//! Credit policy: which event earns or costs how much, and when it lapses.
//!
//! The policy only drafts entries; committing them is the orchestrator's job.

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use skillswap_shared::config::CreditsConfig;
use skillswap_shared::types::{AccountId, SessionId, round_credits};

use super::entry::{EntryKind, EntryReference, NewEntry, ReferenceType};

const MINUTES_PER_HOUR: i64 = 60;

/// Maps domain events to entry drafts using configured rates.
#[derive(Debug, Clone)]
pub struct CreditPolicy {
    config: CreditsConfig,
}

impl CreditPolicy {
    /// Creates a policy from configured rates.
    #[must_use]
    pub fn new(config: CreditsConfig) -> Self {
        Self { config }
    }

    /// The configured rates.
    #[must_use]
    pub fn config(&self) -> &CreditsConfig {
        &self.config
    }

    /// Expiration time of credits created at `now`.
    ///
    /// Calendar months are added with end-of-month clamping: with a one-month
    /// lifetime, a credit created on 31 January expires on the last day of
    /// February.
    #[must_use]
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_add_months(Months::new(self.config.expiration_months))
    }

    /// Credits earned for `duration_minutes` of teaching; zero for non-positive durations.
    #[must_use]
    pub fn teaching_credits(&self, duration_minutes: i64) -> Decimal {
        prorate(self.config.teaching_rate_per_hour, duration_minutes)
    }

    /// Credits charged for `duration_minutes` of learning; zero for non-positive durations.
    #[must_use]
    pub fn learning_cost(&self, duration_minutes: i64) -> Decimal {
        prorate(self.config.learning_cost_per_hour, duration_minutes)
    }

    /// Welcome bonus, once per account.
    #[must_use]
    pub fn registration_bonus(&self, account_id: AccountId, now: DateTime<Utc>) -> NewEntry {
        NewEntry::credit(
            account_id,
            self.config.registration_bonus,
            EntryKind::BonusRegistration,
            "Welcome bonus for joining SkillSwap",
            now,
        )
        .with_reference(EntryReference::new(
            account_id.to_string(),
            ReferenceType::UserRegistration,
        ))
        .expiring_at(self.expiry_from(now))
    }

    /// Referral bonus for `referrer`, once per referred account.
    #[must_use]
    pub fn referral_bonus(
        &self,
        referrer: AccountId,
        referred: AccountId,
        now: DateTime<Utc>,
    ) -> NewEntry {
        NewEntry::credit(
            referrer,
            self.config.referral_bonus,
            EntryKind::BonusReferral,
            format!("Referral bonus for inviting {referred}"),
            now,
        )
        .with_reference(EntryReference::new(
            referred.to_string(),
            ReferenceType::UserReferral,
        ))
        .expiring_at(self.expiry_from(now))
    }

    /// Teaching earnings for a session.
    #[must_use]
    pub fn teaching_earnings(
        &self,
        teacher: AccountId,
        session_id: SessionId,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> NewEntry {
        NewEntry::credit(
            teacher,
            self.teaching_credits(duration_minutes),
            EntryKind::EarnedTeaching,
            format!("Earned from teaching session ({duration_minutes} minutes)"),
            now,
        )
        .with_reference(EntryReference::new(
            session_id.to_string(),
            ReferenceType::VideoSession,
        ))
        .expiring_at(self.expiry_from(now))
    }

    /// Learning charge for a session.
    #[must_use]
    pub fn learning_charge(
        &self,
        learner: AccountId,
        session_id: SessionId,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> NewEntry {
        NewEntry::debit(
            learner,
            self.learning_cost(duration_minutes),
            EntryKind::SpentLearning,
            format!("Spent on learning session ({duration_minutes} minutes)"),
            now,
        )
        .with_reference(EntryReference::new(
            session_id.to_string(),
            ReferenceType::VideoSession,
        ))
    }

    /// Completion bonus for one participant of a session.
    ///
    /// Both participants may receive it, so the reference combines session
    /// and account.
    #[must_use]
    pub fn completion_bonus(
        &self,
        account_id: AccountId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> NewEntry {
        NewEntry::credit(
            account_id,
            self.config.session_completion_bonus,
            EntryKind::BonusCompletion,
            "Bonus for completing a session",
            now,
        )
        .with_reference(EntryReference::new(
            format!("{session_id}:{account_id}"),
            ReferenceType::VideoSessionCompletion,
        ))
        .expiring_at(self.expiry_from(now))
    }

    /// Late-cancellation penalty.
    #[must_use]
    pub fn cancellation_penalty(
        &self,
        account_id: AccountId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> NewEntry {
        NewEntry::debit(
            account_id,
            self.config.cancellation_penalty,
            EntryKind::Penalty,
            "Penalty for late session cancellation",
            now,
        )
        .with_reference(EntryReference::new(
            session_id.to_string(),
            ReferenceType::VideoSessionCancellation,
        ))
    }

    /// Purchased credits, keyed by the external payment receipt.
    #[must_use]
    pub fn purchase(
        &self,
        account_id: AccountId,
        amount: Decimal,
        payment_reference: &str,
        now: DateTime<Utc>,
    ) -> NewEntry {
        NewEntry::credit(
            account_id,
            amount,
            EntryKind::Purchase,
            format!("Purchased {amount} credits"),
            now,
        )
        .with_reference(EntryReference::new(payment_reference, ReferenceType::Payment))
        .expiring_at(self.expiry_from(now))
    }
}

fn prorate(rate_per_hour: Decimal, duration_minutes: i64) -> Decimal {
    if duration_minutes <= 0 {
        return Decimal::ZERO;
    }
    round_credits(rate_per_hour * Decimal::from(duration_minutes) / Decimal::from(MINUTES_PER_HOUR))
}
