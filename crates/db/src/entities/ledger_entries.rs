//! `SeaORM` Entity for ledger_entries table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub account_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((18, 2)))")]
    pub amount: Decimal,
    pub kind: String,
    pub status: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((18, 2)))")]
    pub balance_before: Decimal,
    #[sea_orm(column_type = "Decimal(Some((18, 2)))")]
    pub balance_after: Decimal,
    pub created_at: DateTimeWithTimeZone,
    pub processed_at: Option<DateTimeWithTimeZone>,
    pub expires_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::credit_accounts::Entity",
        from = "Column::AccountId",
        to = "super::credit_accounts::Column::AccountId"
    )]
    CreditAccounts,
}

impl Related<super::credit_accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CreditAccounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
