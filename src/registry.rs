//! The student registry: creating, importing, updating, listing and removing student records.

use crate::auth::Principal;
use crate::error::{PortalError, Result};
use crate::manager::PortalManager;
use crate::models::{NewStudent, RosterFilter, Student, StudentUpdate, now};
use crate::roster;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use tabled::Tabled;
use tracing::info;

const YEARS: std::ops::RangeInclusive<i32> = 1..=4;
const SEMESTERS: std::ops::RangeInclusive<i32> = 1..=8;

fn non_empty(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(PortalError::Validation(format!("{field} is required")))
    } else {
        Ok(value.to_string())
    }
}

fn in_range(value: i32, range: &std::ops::RangeInclusive<i32>, field: &str) -> Result<i32> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(PortalError::Validation(format!(
            "{field} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

/// Checks a student record and returns it with surrounding whitespace removed.
pub fn validate_new_student(student: &NewStudent) -> Result<NewStudent> {
    Ok(NewStudent {
        name: non_empty(&student.name, "name")?,
        usn: non_empty(&student.usn, "usn")?,
        branch: non_empty(&student.branch, "branch")?,
        year: in_range(student.year, &YEARS, "year")?,
        semester: in_range(student.semester, &SEMESTERS, "semester")?,
    })
}

fn validate_update(changes: &StudentUpdate) -> Result<StudentUpdate> {
    if changes.is_empty() {
        return Err(PortalError::Validation("no fields to update".to_string()));
    }

    Ok(StudentUpdate {
        name: changes
            .name
            .as_deref()
            .map(|v| non_empty(v, "name"))
            .transpose()?,
        branch: changes
            .branch
            .as_deref()
            .map(|v| non_empty(v, "branch"))
            .transpose()?,
        year: changes
            .year
            .map(|v| in_range(v, &YEARS, "year"))
            .transpose()?,
        semester: changes
            .semester
            .map(|v| in_range(v, &SEMESTERS, "semester"))
            .transpose()?,
    })
}

fn insert_validated(db: &mut PortalManager, student: NewStudent) -> Result<Student> {
    if db.find_student(&student.usn)?.is_some() {
        return Err(PortalError::Validation(format!(
            "usn {} is already registered",
            student.usn
        )));
    }

    let record = Student {
        usn: student.usn,
        name: student.name,
        branch: student.branch,
        year: student.year,
        semester: student.semester,
        created_at: now(),
    };
    db.insert_student(&record)?;
    Ok(record)
}

/// Adds a single student. Fails without touching existing data if the USN is taken.
pub fn create_student(
    db: &mut PortalManager,
    actor: &Principal,
    student: &NewStudent,
) -> Result<Student> {
    let teacher = actor.require_teacher()?;
    let student = validate_new_student(student)?;

    let record = insert_validated(db, student)?;
    info!(teacher, usn = %record.usn, "student created");
    Ok(record)
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Created,
    Rejected,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Created => write!(f, "created"),
            RowStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Serialize, Tabled, Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub row: usize,
    pub usn: String,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl RowOutcome {
    fn created(row: usize, usn: &str) -> Self {
        Self {
            row,
            usn: usn.to_string(),
            status: RowStatus::Created,
            reason: String::new(),
        }
    }

    fn rejected(row: usize, usn: &str, reason: impl Into<String>) -> Self {
        Self {
            row,
            usn: usn.to_string(),
            status: RowStatus::Rejected,
            reason: reason.into(),
        }
    }
}

/// The per-row result of a bulk import.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub rejected: usize,
    pub rows: Vec<RowOutcome>,
}

/// Imports a roster CSV on a best-effort basis.
///
/// Every well-formed row with a new USN is created. Other rows are rejected individually and the
/// reason recorded in the report. Duplicate USNs inside the roster are found before anything is
/// written; the first occurrence wins.
pub fn bulk_import<R: Read>(
    db: &mut PortalManager,
    actor: &Principal,
    reader: R,
) -> Result<ImportReport> {
    let teacher = actor.require_teacher()?;
    let rows = roster::parse_roster(reader)?;

    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut outcomes = Vec::with_capacity(rows.len());
    let mut pending = Vec::new();

    for entry in rows {
        let student = match entry.parsed {
            Ok(student) => student,
            Err(reason) => {
                outcomes.push(RowOutcome::rejected(entry.row, &entry.usn, reason));
                continue;
            }
        };

        let student = match validate_new_student(&student) {
            Ok(student) => student,
            Err(e) => {
                outcomes.push(RowOutcome::rejected(entry.row, &entry.usn, e.to_string()));
                continue;
            }
        };

        if let Some(first) = first_seen.get(&student.usn) {
            outcomes.push(RowOutcome::rejected(
                entry.row,
                &student.usn,
                format!("duplicate usn within import (first seen on row {first})"),
            ));
            continue;
        }

        first_seen.insert(student.usn.clone(), entry.row);
        pending.push((entry.row, student));
    }

    // A failure other than a rejected row undoes the whole import.
    let inserted = db.transaction(|db| {
        let mut inserted = Vec::with_capacity(pending.len());
        for (row, student) in pending {
            let usn = student.usn.clone();
            match insert_validated(db, student) {
                Ok(_) => inserted.push(RowOutcome::created(row, &usn)),
                Err(PortalError::Validation(reason)) => {
                    inserted.push(RowOutcome::rejected(row, &usn, reason))
                }
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    })?;
    outcomes.extend(inserted);

    outcomes.sort_by_key(|outcome| outcome.row);

    let created = outcomes
        .iter()
        .filter(|o| o.status == RowStatus::Created)
        .count();
    let report = ImportReport {
        created,
        rejected: outcomes.len() - created,
        rows: outcomes,
    };

    info!(
        teacher,
        created = report.created,
        rejected = report.rejected,
        "roster imported"
    );
    Ok(report)
}

/// Changes a student's mutable fields.
pub fn update_student(
    db: &mut PortalManager,
    actor: &Principal,
    usn: &str,
    changes: &StudentUpdate,
) -> Result<Student> {
    let teacher = actor.require_teacher()?;
    let usn = usn.trim();
    let changes = validate_update(changes)?;

    let student = db
        .update_student(usn, &changes)?
        .ok_or_else(|| PortalError::NotFound(format!("student {usn}")))?;

    info!(teacher, usn, "student updated");
    Ok(student)
}

/// Teachers see the roster narrowed by `filter`; a student sees only their own record.
pub fn list_students(
    db: &mut PortalManager,
    actor: &Principal,
    filter: &RosterFilter,
) -> Result<Vec<Student>> {
    match actor {
        Principal::Teacher { .. } => {
            let filter = RosterFilter {
                branch: filter
                    .branch
                    .as_deref()
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .map(str::to_string),
                semester: filter.semester,
            };
            db.get_roster(&filter)
        }
        Principal::Student { usn, .. } => Ok(db.find_student(usn)?.into_iter().collect()),
    }
}

pub fn get_student(db: &mut PortalManager, actor: &Principal, usn: &str) -> Result<Student> {
    let usn = usn.trim();
    actor.ensure_can_read(usn)?;

    db.find_student(usn)?
        .ok_or_else(|| PortalError::NotFound(format!("student {usn}")))
}

/// Removes a student together with all of their marks.
pub fn delete_student(db: &mut PortalManager, actor: &Principal, usn: &str) -> Result<Student> {
    let teacher = actor.require_teacher()?;
    let usn = usn.trim();

    let student = db
        .delete_student(usn)?
        .ok_or_else(|| PortalError::NotFound(format!("student {usn}")))?;

    info!(teacher, usn, "student deleted");
    Ok(student)
}
