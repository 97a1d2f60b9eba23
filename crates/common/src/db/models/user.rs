//! Login identity
//!
//! Parents are keyed by phone number, admins by username. Accounts created by
//! an upload have no credential yet and must change their password on first login.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", unique)]
    pub phone_or_username: String,

    /// Auth identity, assigned once a credential is established
    pub auth_id: Option<Uuid>,

    /// Argon2 PHC string
    #[sea_orm(column_type = "Text", nullable)]
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    pub must_change_password: bool,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether the account still relies on the initial password
    pub fn has_credential(&self) -> bool {
        self.password_hash.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_student::Entity")]
    Students,

    #[sea_orm(has_many = "super::user_role::Entity")]
    Roles,
}

impl Related<super::user_student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Students.def()
    }
}

impl Related<super::user_role::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Roles.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
