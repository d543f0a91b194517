//! The marks ledger: one score per student and subject.

use crate::auth::Principal;
use crate::error::{PortalError, Result};
use crate::manager::PortalManager;
use crate::models::{MarkEntry, now};
use tracing::info;

pub const MAX_SCORE: i32 = 100;

fn require_student(db: &mut PortalManager, usn: &str) -> Result<()> {
    match db.find_student(usn)? {
        Some(_) => Ok(()),
        None => Err(PortalError::NotFound(format!("student {usn}"))),
    }
}

/// Records `score` for `subject`, replacing any earlier score for the same subject.
pub fn set_mark(
    db: &mut PortalManager,
    actor: &Principal,
    usn: &str,
    subject: &str,
    score: i32,
) -> Result<MarkEntry> {
    let teacher = actor.require_teacher()?;

    let usn = usn.trim();
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(PortalError::Validation("subject is required".to_string()));
    }
    if !(0..=MAX_SCORE).contains(&score) {
        return Err(PortalError::Validation(format!(
            "score must be between 0 and {MAX_SCORE}, got {score}"
        )));
    }
    require_student(db, usn)?;

    let entry = MarkEntry {
        usn: usn.to_string(),
        subject: subject.to_string(),
        score,
        updated_at: now(),
    };
    db.upsert_mark(&entry)?;

    info!(teacher, usn, subject, score, "mark recorded");
    Ok(entry)
}

/// All marks of a student, ordered by subject. Students may only read their own.
pub fn get_marks_for_student(
    db: &mut PortalManager,
    actor: &Principal,
    usn: &str,
) -> Result<Vec<MarkEntry>> {
    let usn = usn.trim();
    actor.ensure_can_read(usn)?;
    require_student(db, usn)?;

    db.get_marks(usn)
}

/// Clears every mark of a student, returning how many entries were removed.
pub fn reset_marks(db: &mut PortalManager, actor: &Principal, usn: &str) -> Result<usize> {
    let teacher = actor.require_teacher()?;
    let usn = usn.trim();
    require_student(db, usn)?;

    let removed = db.delete_marks(usn)?;
    info!(teacher, usn, removed, "marks reset");
    Ok(removed)
}
