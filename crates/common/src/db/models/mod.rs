//! SeaORM entity models
//!
//! Database entities for the Follow-Up portal

mod sheet;
mod student;
mod session;
mod exam;
mod exam_result;
mod user;
mod user_student;
mod user_role;

pub use sheet::{
    Entity as SheetEntity,
    Model as Sheet,
    ActiveModel as SheetActiveModel,
    Column as SheetColumn,
};

pub use student::{
    Entity as StudentEntity,
    Model as Student,
    ActiveModel as StudentActiveModel,
    Column as StudentColumn,
};

pub use session::{
    Entity as SessionEntity,
    Model as Session,
    ActiveModel as SessionActiveModel,
    Column as SessionColumn,
    HomeworkSlot,
    HomeworkStatus,
};

pub use exam::{
    Entity as ExamEntity,
    Model as Exam,
    ActiveModel as ExamActiveModel,
    Column as ExamColumn,
    ExamType,
};

pub use exam_result::{
    Entity as ExamResultEntity,
    Model as ExamResult,
    ActiveModel as ExamResultActiveModel,
    Column as ExamResultColumn,
};

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
};

pub use user_student::{
    Entity as UserStudentEntity,
    Model as UserStudent,
    ActiveModel as UserStudentActiveModel,
    Column as UserStudentColumn,
};

pub use user_role::{
    Entity as UserRoleEntity,
    Model as UserRole,
    ActiveModel as UserRoleActiveModel,
    Column as UserRoleColumn,
    AppRole,
};
