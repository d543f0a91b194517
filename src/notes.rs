//! Subject notes uploaded by teachers and readable by every signed-in user.
//!
//! Metadata lives in the `notes` table; the file bytes live in the upload directory under a
//! timestamped, sanitized name.

use crate::auth::Principal;
use crate::error::{PortalError, Result};
use crate::manager::PortalManager;
use crate::models::{NewNote, Note, now};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File types accepted for upload.
pub const ALLOWED_EXTENSIONS: [&str; 7] = ["pdf", "doc", "docx", "ppt", "pptx", "zip", "txt"];

/// Where note files are written and how large they may be.
#[derive(Debug, Clone)]
pub struct NoteStorage {
    pub upload_dir: PathBuf,
    pub max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct NoteUpload {
    pub subject: String,
    pub module: Option<String>,
    pub filename: String,
    pub content: Vec<u8>,
}

/// The key subjects are matched on: lowercase with all whitespace removed, so that
/// "Data Structures" and "datastructures" refer to the same subject.
pub fn subject_key(subject: &str) -> String {
    subject
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Reduces an uploaded file name to a safe basename of ASCII letters, digits, `.`, `-` and `_`.
pub fn secure_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or("");

    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    cleaned.trim_start_matches(['.', '_']).to_string()
}

fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

/// Stores an uploaded note. Only teachers may upload.
pub fn add_note(
    db: &mut PortalManager,
    storage: &NoteStorage,
    actor: &Principal,
    upload: &NoteUpload,
) -> Result<Note> {
    let teacher = actor.require_teacher()?;

    let subject = upload.subject.trim();
    if subject.is_empty() {
        return Err(PortalError::Validation("subject is required".to_string()));
    }
    let module = upload
        .module
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());

    let filename = secure_filename(&upload.filename);
    if !allowed_file(&filename) {
        return Err(PortalError::Validation(format!(
            "file type not allowed, expected one of: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    if upload.content.is_empty() {
        return Err(PortalError::Validation("file is empty".to_string()));
    }
    if upload.content.len() > storage.max_bytes {
        return Err(PortalError::Validation(format!(
            "file exceeds the {} byte limit",
            storage.max_bytes
        )));
    }

    fs::create_dir_all(&storage.upload_dir)?;
    let timestamp = Utc::now().format("%Y%m%d%H%M%S%9f");
    let path = storage.upload_dir.join(format!("{timestamp}_{filename}"));
    fs::write(&path, &upload.content)?;

    let stored_path = path.to_string_lossy().replace('\\', "/");
    let key = subject_key(subject);
    let inserted = db.insert_note(&NewNote {
        subject,
        subject_key: &key,
        module,
        filename: &filename,
        stored_path: &stored_path,
        uploaded_by: teacher,
        created_at: now(),
    });

    let note = match inserted {
        Ok(note) => note,
        Err(e) => {
            // Do not leave an orphaned file behind.
            if let Err(io) = fs::remove_file(&path) {
                warn!("could not remove {}: {io}", path.display());
            }
            return Err(e);
        }
    };

    info!(teacher, subject, filename = %note.filename, id = note.id, "note uploaded");
    Ok(note)
}

/// Every note, newest first.
pub fn list_all_notes(db: &mut PortalManager, _actor: &Principal) -> Result<Vec<Note>> {
    db.get_notes()
}

/// Notes for one subject, newest first. Subject matching ignores case and whitespace.
pub fn list_notes_by_subject(
    db: &mut PortalManager,
    _actor: &Principal,
    subject: &str,
) -> Result<Vec<Note>> {
    db.get_notes_by_subject_key(&subject_key(subject))
}

/// Loads a note's metadata and file contents for download.
pub fn read_note(db: &mut PortalManager, _actor: &Principal, id: i32) -> Result<(Note, Vec<u8>)> {
    let note = db
        .find_note(id)?
        .ok_or_else(|| PortalError::NotFound(format!("note {id}")))?;

    let content = match fs::read(Path::new(&note.stored_path)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(id, path = %note.stored_path, "note file is missing");
            return Err(PortalError::NotFound(format!("file for note {id}")));
        }
        Err(e) => return Err(e.into()),
    };

    Ok((note, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> NoteStorage {
        NoteStorage {
            upload_dir: dir.path().join("uploads"),
            max_bytes: 1024,
        }
    }

    fn upload(subject: &str, filename: &str) -> NoteUpload {
        NoteUpload {
            subject: subject.to_string(),
            module: Some("Module 1".to_string()),
            filename: filename.to_string(),
            content: b"lecture notes".to_vec(),
        }
    }

    fn jane() -> Principal {
        Principal::Student {
            usn: "1RV21CS002".to_string(),
            name: "Jane Smith".to_string(),
        }
    }

    #[test]
    fn test_subject_key() {
        assert_eq!(subject_key(" Data  Structures "), "datastructures");
        assert_eq!(subject_key("OS"), "os");
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("C:\\docs\\unit 1.pdf"), "unit_1.pdf");
        assert_eq!(secure_filename(".hidden.pdf"), "hidden.pdf");
        assert_eq!(secure_filename("résumé.pdf"), "rsum.pdf");
    }

    #[test]
    fn test_allowed_file() {
        assert!(allowed_file("unit1.PDF"));
        assert!(allowed_file("slides.pptx"));
        assert!(!allowed_file("script.sh"));
        assert!(!allowed_file("pdf"));
        assert!(!allowed_file(".pdf"));
    }

    #[test]
    fn test_add_and_read_note() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut db = PortalManager::in_memory().unwrap();

        let note = add_note(
            &mut db,
            &storage,
            &Principal::operator(),
            &upload("Data Structures", "unit 1.pdf"),
        )
        .unwrap();
        assert_eq!(note.filename, "unit_1.pdf");
        assert_eq!(note.module.as_deref(), Some("Module 1"));
        assert_eq!(note.uploaded_by, "operator");

        let (read, content) = read_note(&mut db, &jane(), note.id).unwrap();
        assert_eq!(read, note);
        assert_eq!(content, b"lecture notes");
    }

    #[test]
    fn test_students_cannot_upload() {
        let dir = TempDir::new().unwrap();
        let mut db = PortalManager::in_memory().unwrap();

        let err = add_note(&mut db, &storage(&dir), &jane(), &upload("OS", "a.pdf")).unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));
        assert!(!dir.path().join("uploads").exists());
    }

    #[test]
    fn test_upload_validation() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut db = PortalManager::in_memory().unwrap();
        let teacher = Principal::operator();

        let bad_type = add_note(&mut db, &storage, &teacher, &upload("OS", "virus.exe"));
        assert!(matches!(bad_type, Err(PortalError::Validation(_))));

        let no_subject = add_note(&mut db, &storage, &teacher, &upload("  ", "a.pdf"));
        assert!(matches!(no_subject, Err(PortalError::Validation(_))));

        let mut too_big = upload("OS", "a.pdf");
        too_big.content = vec![0; 2048];
        let too_big = add_note(&mut db, &storage, &teacher, &too_big);
        assert!(matches!(too_big, Err(PortalError::Validation(_))));

        assert!(list_all_notes(&mut db, &teacher).unwrap().is_empty());
    }

    #[test]
    fn test_list_by_subject_is_fuzzy() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut db = PortalManager::in_memory().unwrap();
        let teacher = Principal::operator();

        add_note(&mut db, &storage, &teacher, &upload("Data Structures", "a.pdf")).unwrap();
        add_note(&mut db, &storage, &teacher, &upload("OS", "b.pdf")).unwrap();
        let latest =
            add_note(&mut db, &storage, &teacher, &upload("datastructures", "c.pdf")).unwrap();

        let notes = list_notes_by_subject(&mut db, &jane(), "DATA structures").unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].id, latest.id, "newest first");

        assert_eq!(list_all_notes(&mut db, &jane()).unwrap().len(), 3);
    }

    #[test]
    fn test_missing_note_or_file() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut db = PortalManager::in_memory().unwrap();

        let err = read_note(&mut db, &jane(), 42).unwrap_err();
        assert!(matches!(err, PortalError::NotFound(_)));

        let note = add_note(
            &mut db,
            &storage,
            &Principal::operator(),
            &upload("OS", "a.pdf"),
        )
        .unwrap();
        fs::remove_file(&note.stored_path).unwrap();
        let err = read_note(&mut db, &jane(), note.id).unwrap_err();
        assert!(matches!(err, PortalError::NotFound(_)));
    }
}
