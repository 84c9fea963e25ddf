//! `SeaORM` Entity for credit_accounts table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "credit_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub account_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((18, 2)))")]
    pub current_balance: Decimal,
    #[sea_orm(column_type = "Decimal(Some((18, 2)))")]
    pub reserved_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((18, 2)))")]
    pub total_earned: Decimal,
    #[sea_orm(column_type = "Decimal(Some((18, 2)))")]
    pub total_spent: Decimal,
    #[sea_orm(column_type = "Decimal(Some((18, 2)))")]
    pub lifetime_earnings: Decimal,
    pub last_transaction_at: Option<DateTimeWithTimeZone>,
    pub version: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::ledger_entries::Entity")]
    LedgerEntries,
    #[sea_orm(has_many = "super::credit_reservations::Entity")]
    CreditReservations,
}

impl Related<super::ledger_entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerEntries.def()
    }
}

impl Related<super::credit_reservations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CreditReservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
