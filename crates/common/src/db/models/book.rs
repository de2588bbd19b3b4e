//! Book entity: an uploaded PDF and its ingestion status

use crate::status::{BookStatus, UnknownStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "books")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub file_name: String,

    /// Blob store locator of the original PDF
    #[sea_orm(column_type = "Text")]
    pub storage_locator: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub uploaded_at: DateTimeWithTimeZone,

    /// Set whenever the status changes
    pub status_changed_at: DateTimeWithTimeZone,

    pub campaign_id: Uuid,
}

impl Model {
    /// Get the ingestion status as an enum
    pub fn book_status(&self) -> Result<BookStatus, UnknownStatus> {
        self.status.parse()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::campaign::Entity",
        from = "Column::CampaignId",
        to = "super::campaign::Column::Id",
        on_delete = "Cascade"
    )]
    Campaign,
}

impl Related<super::campaign::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Campaign.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
