//! Cumulative exam entity
//!
//! `(name, exam_type)` is unique so an upload can create-or-reuse in one statement.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of exam spanning a whole group
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum ExamType {
    /// The cumulative "shamel" exam
    #[sea_orm(string_value = "shamel")]
    Shamel,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "exams")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    pub exam_type: ExamType,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::exam_result::Entity")]
    Results,
}

impl Related<super::exam_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Results.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
