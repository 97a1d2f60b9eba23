//! Class session entity
//!
//! One row per `(student_id, session_number)`. Each of the eight homework
//! slots has its own column so an upload can touch exactly one of them.

use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

/// Homework outcome recorded for a session slot
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "hw_status")]
#[serde(rename_all = "snake_case")]
pub enum HomeworkStatus {
    #[sea_orm(string_value = "complete")]
    Complete,
    #[sea_orm(string_value = "not_done")]
    NotDone,
    #[sea_orm(string_value = "partial")]
    Partial,
    #[sea_orm(string_value = "cheated")]
    Cheated,
}

impl HomeworkStatus {
    /// Map the spreadsheet's numeric homework code.
    ///
    /// Missing, zero and unknown codes all mean `Complete`: a cell only
    /// carries a value when something went wrong.
    pub fn from_code(code: Option<f64>) -> Self {
        match code {
            Some(c) if c == 1.0 => HomeworkStatus::NotDone,
            Some(c) if c == 2.0 => HomeworkStatus::Partial,
            Some(c) if c == 3.0 => HomeworkStatus::Cheated,
            _ => HomeworkStatus::Complete,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HomeworkStatus::Complete => "complete",
            HomeworkStatus::NotDone => "not_done",
            HomeworkStatus::Partial => "partial",
            HomeworkStatus::Cheated => "cheated",
        }
    }
}

impl std::fmt::Display for HomeworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the eight homework columns (`hw1` .. `hw8`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HomeworkSlot(u8);

impl HomeworkSlot {
    pub const COUNT: u8 = 8;

    pub fn new(number: u8) -> Option<Self> {
        (1..=Self::COUNT).contains(&number).then_some(Self(number))
    }

    /// Parse a column selector such as `hw3`, `HW3` or `hw3_status`
    pub fn parse(column: &str) -> Option<Self> {
        let lowered = column.trim().to_ascii_lowercase();
        let name = lowered.strip_suffix("_status").unwrap_or(&lowered);
        name.strip_prefix("hw")?
            .parse::<u8>()
            .ok()
            .and_then(Self::new)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// The table column backing this slot
    pub fn column(self) -> Column {
        match self.0 {
            1 => Column::Hw1Status,
            2 => Column::Hw2Status,
            3 => Column::Hw3Status,
            4 => Column::Hw4Status,
            5 => Column::Hw5Status,
            6 => Column::Hw6Status,
            7 => Column::Hw7Status,
            _ => Column::Hw8Status,
        }
    }
}

impl std::fmt::Display for HomeworkSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hw{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub student_id: Uuid,

    /// 1 through 8
    pub session_number: i32,

    pub attended: Option<bool>,

    #[sea_orm(column_type = "Double", nullable)]
    pub payment: Option<f64>,

    #[sea_orm(column_type = "Double", nullable)]
    pub quiz_mark: Option<f64>,

    /// Clock-in time as written on the sheet
    #[sea_orm(column_type = "Text", nullable)]
    pub time: Option<String>,

    /// Clock-out time chosen by the admin at upload
    #[sea_orm(column_type = "Text", nullable)]
    pub finish_time: Option<String>,

    pub hw1_status: Option<HomeworkStatus>,
    pub hw2_status: Option<HomeworkStatus>,
    pub hw3_status: Option<HomeworkStatus>,
    pub hw4_status: Option<HomeworkStatus>,
    pub hw5_status: Option<HomeworkStatus>,
    pub hw6_status: Option<HomeworkStatus>,
    pub hw7_status: Option<HomeworkStatus>,
    pub hw8_status: Option<HomeworkStatus>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Homework status stored in the given slot
    pub fn homework(&self, slot: HomeworkSlot) -> Option<HomeworkStatus> {
        match slot.number() {
            1 => self.hw1_status,
            2 => self.hw2_status,
            3 => self.hw3_status,
            4 => self.hw4_status,
            5 => self.hw5_status,
            6 => self.hw6_status,
            7 => self.hw7_status,
            _ => self.hw8_status,
        }
    }

    /// All slots in column order
    pub fn homework_slots(&self) -> [Option<HomeworkStatus>; 8] {
        [
            self.hw1_status,
            self.hw2_status,
            self.hw3_status,
            self.hw4_status,
            self.hw5_status,
            self.hw6_status,
            self.hw7_status,
            self.hw8_status,
        ]
    }

    /// Write a slot in place
    pub fn set_homework(&mut self, slot: HomeworkSlot, status: HomeworkStatus) {
        let value = Some(status);
        match slot.number() {
            1 => self.hw1_status = value,
            2 => self.hw2_status = value,
            3 => self.hw3_status = value,
            4 => self.hw4_status = value,
            5 => self.hw5_status = value,
            6 => self.hw6_status = value,
            7 => self.hw7_status = value,
            _ => self.hw8_status = value,
        }
    }
}

impl ActiveModel {
    /// Mark a single homework slot as set, leaving the others `NotSet`
    pub fn set_homework(&mut self, slot: HomeworkSlot, status: HomeworkStatus) {
        let value = Set(Some(status));
        match slot.number() {
            1 => self.hw1_status = value,
            2 => self.hw2_status = value,
            3 => self.hw3_status = value,
            4 => self.hw4_status = value,
            5 => self.hw5_status = value,
            6 => self.hw6_status = value,
            7 => self.hw7_status = value,
            _ => self.hw8_status = value,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id",
        on_delete = "Cascade"
    )]
    Student,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_homework_codes() {
        assert_eq!(HomeworkStatus::from_code(None), HomeworkStatus::Complete);
        assert_eq!(HomeworkStatus::from_code(Some(0.0)), HomeworkStatus::Complete);
        assert_eq!(HomeworkStatus::from_code(Some(1.0)), HomeworkStatus::NotDone);
        assert_eq!(HomeworkStatus::from_code(Some(2.0)), HomeworkStatus::Partial);
        assert_eq!(HomeworkStatus::from_code(Some(3.0)), HomeworkStatus::Cheated);
        assert_eq!(HomeworkStatus::from_code(Some(7.0)), HomeworkStatus::Complete);
        assert_eq!(HomeworkStatus::from_code(Some(1.5)), HomeworkStatus::Complete);
        assert_eq!(HomeworkStatus::from_code(Some(-1.0)), HomeworkStatus::Complete);
    }

    #[test]
    fn test_slot_parsing() {
        assert_eq!(HomeworkSlot::parse("hw1").map(HomeworkSlot::number), Some(1));
        assert_eq!(HomeworkSlot::parse(" HW8 ").map(HomeworkSlot::number), Some(8));
        assert_eq!(HomeworkSlot::parse("hw4_status").map(HomeworkSlot::number), Some(4));
        assert!(HomeworkSlot::parse("hw0").is_none());
        assert!(HomeworkSlot::parse("hw9").is_none());
        assert!(HomeworkSlot::parse("quiz").is_none());
        assert!(HomeworkSlot::parse("").is_none());
    }

    #[test]
    fn test_slot_column_and_display() {
        let slot = HomeworkSlot::new(5).unwrap();
        assert_eq!(slot.to_string(), "hw5");
        assert!(matches!(slot.column(), Column::Hw5Status));
        assert_eq!(HomeworkStatus::NotDone.to_string(), "not_done");
    }
}
