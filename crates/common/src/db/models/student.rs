//! Student entity
//!
//! `(student_code, sheet_id)` is unique; uploads upsert on that pair.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "students")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub sheet_id: Uuid,

    /// Code printed on the spreadsheet, unique within a sheet
    #[sea_orm(column_type = "Text")]
    pub student_code: String,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    /// Parent phone, doubles as the parent's login identity
    #[sea_orm(column_type = "Text")]
    pub parent_phone: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub student_phone: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sheet::Entity",
        from = "Column::SheetId",
        to = "super::sheet::Column::Id"
    )]
    Sheet,

    #[sea_orm(has_many = "super::session::Entity")]
    Sessions,

    #[sea_orm(has_many = "super::exam_result::Entity")]
    ExamResults,
}

impl Related<super::sheet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sheet.def()
    }
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
}

impl Related<super::exam_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExamResults.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
