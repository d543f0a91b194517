//! Credential checks and the access-control rules shared by every component.
//!
//! Teachers log in with a username and an Argon2-hashed password. Students log in with their
//! name as the username and their USN as the password. The USN is semi-public, so this is a weak
//! credential; it is kept as-is because it is how students have always signed in.

use crate::error::{PortalError, Result};
use crate::manager::PortalManager;
use crate::models::{Teacher, now};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// The authenticated identity attached to a request.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Principal {
    Teacher { username: String },
    Student { usn: String, name: String },
}

impl Principal {
    /// The principal used by the command-line tools, which run with local operator rights.
    pub fn operator() -> Self {
        Principal::Teacher {
            username: "operator".to_string(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Principal::Teacher { .. } => Role::Teacher,
            Principal::Student { .. } => Role::Student,
        }
    }

    /// A short identifier for logs and audit columns.
    pub fn identity(&self) -> &str {
        match self {
            Principal::Teacher { username } => username,
            Principal::Student { usn, .. } => usn,
        }
    }

    /// Fails unless the principal is a teacher, returning the teacher's username.
    pub fn require_teacher(&self) -> Result<&str> {
        match self {
            Principal::Teacher { username } => Ok(username),
            Principal::Student { .. } => Err(PortalError::Authorization(
                "teacher role required".to_string(),
            )),
        }
    }

    /// Teachers may read any student's data; students only their own.
    pub fn can_read_student(&self, usn: &str) -> bool {
        match self {
            Principal::Teacher { .. } => true,
            Principal::Student { usn: own, .. } => own == usn,
        }
    }

    pub fn ensure_can_read(&self, usn: &str) -> Result<()> {
        if self.can_read_student(usn) {
            Ok(())
        } else {
            Err(PortalError::Authorization(
                "students may only read their own records".to_string(),
            ))
        }
    }
}

/// A login whose account was found but whose credential may still need checking.
///
/// Looking the account up needs the database; checking an Argon2 hash is slow and does not, so
/// the two steps are split and callers can release the database in between.
#[derive(Debug, Clone)]
pub enum PendingLogin {
    Teacher {
        username: String,
        password_hash: String,
    },
    /// Students are matched on (name, usn) by the lookup itself.
    Student(Principal),
}

/// Finds the account a login refers to. `None` covers blank input and unknown accounts.
pub fn lookup_login(
    db: &mut PortalManager,
    role: Role,
    username: &str,
    password: &str,
) -> Result<Option<PendingLogin>> {
    let username = username.trim();
    let password = password.trim();

    if username.is_empty() || password.is_empty() {
        return Ok(None);
    }

    Ok(match role {
        Role::Teacher => db.find_teacher(username)?.map(|teacher| PendingLogin::Teacher {
            username: teacher.username,
            password_hash: teacher.password_hash,
        }),
        Role::Student => db
            .find_student_by_login(username, password)?
            .map(|student| {
                PendingLogin::Student(Principal::Student {
                    usn: student.usn,
                    name: student.name,
                })
            }),
    })
}

/// Finishes a login started by [`lookup_login`].
///
/// Every failure is reported as [`PortalError::Authentication`] so callers cannot tell an unknown
/// user from a wrong password.
pub fn complete_login(
    role: Role,
    pending: Option<PendingLogin>,
    password: &str,
) -> Result<Principal> {
    let principal = match pending {
        Some(PendingLogin::Teacher {
            username,
            password_hash,
        }) if role == Role::Teacher => verify_password(&password_hash, password.trim())
            .then_some(Principal::Teacher { username }),
        Some(PendingLogin::Student(principal)) if role == Role::Student => Some(principal),
        _ => None,
    };

    match principal {
        Some(principal) => {
            info!(role = ?role, identity = principal.identity(), "login succeeded");
            Ok(principal)
        }
        None => {
            warn!(role = ?role, "login failed");
            Err(PortalError::Authentication)
        }
    }
}

/// Checks a submitted credential against the store for `role`.
pub fn authenticate(
    db: &mut PortalManager,
    role: Role,
    username: &str,
    password: &str,
) -> Result<Principal> {
    let pending = lookup_login(db, role, username, password)?;
    complete_login(role, pending, password)
}

/// Creates a teacher account. Teachers are only ever provisioned by an operator.
pub fn create_teacher(db: &mut PortalManager, username: &str, password: &str) -> Result<()> {
    let username = username.trim();
    if username.is_empty() {
        return Err(PortalError::Validation("username is required".to_string()));
    }
    if password.trim().is_empty() {
        return Err(PortalError::Validation("password is required".to_string()));
    }
    if db.find_teacher(username)?.is_some() {
        return Err(PortalError::Validation(format!(
            "teacher '{username}' already exists"
        )));
    }

    db.insert_teacher(&Teacher {
        username: username.to_string(),
        password_hash: hash_password(password.trim())?,
        created_at: now(),
    })?;

    info!(username, "teacher account created");
    Ok(())
}

/// Seeds the configured teacher account if no teacher exists yet. Returns whether one was added.
pub fn seed_teacher(db: &mut PortalManager, username: &str, password: &str) -> Result<bool> {
    if db.num_teachers()? > 0 {
        return Ok(false);
    }
    create_teacher(db, username, password)?;
    Ok(true)
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| PortalError::PasswordHash(e.to_string()))?;
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| PortalError::PasswordHash(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| PortalError::PasswordHash(e.to_string()))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
