use crate::schema::{marks, notes, students, teachers};
use chrono::{NaiveDateTime, SubsecRound, Utc};
use clap::Args;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

/// The current UTC time, truncated to whole seconds so stored timestamps compare equal after a
/// round trip through SQLite.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(0)
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = teachers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Teacher {
    pub username: String,
    /// Argon2 PHC string, never the plain password.
    pub password_hash: String,
    pub created_at: NaiveDateTime,
}

#[derive(
    Queryable, Selectable, Insertable, Serialize, Deserialize, Tabled, Debug, Clone, PartialEq, Eq,
)]
#[diesel(table_name = students)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Student {
    pub usn: String,
    pub name: String,
    pub branch: String,
    pub year: i32,
    pub semester: i32,
    pub created_at: NaiveDateTime,
}

/// A student record as entered by a teacher, before validation.
#[derive(Args, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub name: String,
    pub usn: String,
    pub branch: String,
    pub year: i32,
    pub semester: i32,
}

/// Optional narrowing of the roster, e.g. one branch in one semester.
#[derive(Args, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct RosterFilter {
    /// Only students of this branch.
    #[arg(long)]
    pub branch: Option<String>,
    /// Only students in this semester.
    #[arg(long)]
    pub semester: Option<i32>,
}

/// Partial update of a student's mutable fields. The USN is the identity and cannot change.
#[derive(AsChangeset, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = students)]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub branch: Option<String>,
    pub year: Option<i32>,
    pub semester: Option<i32>,
}

impl StudentUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.branch.is_none() && self.year.is_none() && self.semester.is_none()
    }
}

#[derive(
    Queryable, Selectable, Insertable, Serialize, Tabled, Debug, Clone, PartialEq, Eq,
)]
#[diesel(table_name = marks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MarkEntry {
    pub usn: String,
    pub subject: String,
    pub score: i32,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = notes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Note {
    pub id: i32,
    pub subject: String,
    #[serde(skip)]
    pub subject_key: String,
    pub module: Option<String>,
    pub filename: String,
    #[serde(skip)]
    pub stored_path: String,
    pub uploaded_by: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = notes)]
pub struct NewNote<'a> {
    pub subject: &'a str,
    pub subject_key: &'a str,
    pub module: Option<&'a str>,
    pub filename: &'a str,
    pub stored_path: &'a str,
    pub uploaded_by: &'a str,
    pub created_at: NaiveDateTime,
}
