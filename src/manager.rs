use crate::error::Result;
use crate::models::{MarkEntry, NewNote, Note, RosterFilter, Student, StudentUpdate, Teacher};
use crate::schema;
use diesel::connection::{SimpleConnection, TransactionManager};
use diesel::prelude::*;
use tracing::{debug, warn};

/// The schema applied on every connect. Every statement is idempotent.
const SCHEMA: &str = include_str!("../migrations/2025-10-01-000000_create_portal/up.sql");

/// The manager for recording, modifying, and retrieving portal data.
///
/// This layer performs no authorization; callers in [`crate::registry`], [`crate::ledger`],
/// [`crate::notes`] and [`crate::export`] check the acting principal first.
pub struct PortalManager {
    db: SqliteConnection,
}

impl PortalManager {
    /// Connects to the `sqlite3` database at `database_url` and makes sure the schema exists.
    pub fn connect(database_url: &str) -> Result<Self> {
        let connection = SqliteConnection::establish(database_url)?;
        Self::from_connection(connection)
    }

    /// Wraps an already established connection, applying the schema.
    pub fn from_connection(mut connection: SqliteConnection) -> Result<Self> {
        connection.batch_execute("PRAGMA foreign_keys = ON;")?;
        connection.batch_execute(SCHEMA)?;
        debug!("database schema ready");
        Ok(Self { db: connection })
    }

    /// A fresh in-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::connect(":memory:")
    }

    /// Runs `f` in a transaction: committed if it returns `Ok`, rolled back otherwise.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        type Manager = <SqliteConnection as Connection>::TransactionManager;

        Manager::begin_transaction(&mut self.db)?;
        match f(self) {
            Ok(value) => {
                Manager::commit_transaction(&mut self.db)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = Manager::rollback_transaction(&mut self.db) {
                    warn!("rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn execute_sql(&mut self, sql: &str) -> Result<()> {
        Ok(self.db.batch_execute(sql)?)
    }

    // --- teachers -------------------------------------------------------------------------------

    /// Returns the total number of teacher accounts.
    pub fn num_teachers(&mut self) -> Result<usize> {
        use schema::teachers::dsl::*;

        let count: i64 = teachers.count().get_result(&mut self.db)?;
        Ok(count as usize)
    }

    /// Inserts a teacher account.
    pub fn insert_teacher(&mut self, teacher: &Teacher) -> Result<()> {
        diesel::insert_into(schema::teachers::table)
            .values(teacher)
            .execute(&mut self.db)?;
        Ok(())
    }

    /// Looks up a teacher by username.
    pub fn find_teacher(&mut self, name: &str) -> Result<Option<Teacher>> {
        use schema::teachers::dsl::*;

        Ok(teachers
            .filter(username.eq(name))
            .select(Teacher::as_select())
            .first(&mut self.db)
            .optional()?)
    }

    // --- students -------------------------------------------------------------------------------

    /// Returns the total number of students on the roster.
    pub fn num_students(&mut self) -> Result<usize> {
        use schema::students::dsl::*;

        let count: i64 = students.count().get_result(&mut self.db)?;
        Ok(count as usize)
    }

    /// Retrieves the students on the roster matching `filter`, ordered by USN.
    pub fn get_roster(&mut self, filter: &RosterFilter) -> Result<Vec<Student>> {
        use schema::students::dsl::*;

        let mut query = students.select(Student::as_select()).into_boxed();
        if let Some(wanted) = &filter.branch {
            query = query.filter(branch.eq(wanted));
        }
        if let Some(wanted) = filter.semester {
            query = query.filter(semester.eq(wanted));
        }

        Ok(query.order(usn.asc()).load(&mut self.db)?)
    }

    /// Retrieves a specific student from the roster based on their USN.
    pub fn find_student(&mut self, student_usn: &str) -> Result<Option<Student>> {
        use schema::students::dsl::*;

        Ok(students
            .filter(usn.eq(student_usn))
            .select(Student::as_select())
            .first(&mut self.db)
            .optional()?)
    }

    /// Finds the student whose name and USN both match, i.e. a student login.
    pub fn find_student_by_login(
        &mut self,
        student_name: &str,
        student_usn: &str,
    ) -> Result<Option<Student>> {
        use schema::students::dsl::*;

        Ok(students
            .filter(name.eq(student_name))
            .filter(usn.eq(student_usn))
            .select(Student::as_select())
            .first(&mut self.db)
            .optional()?)
    }

    /// Inserts a single student. A USN that already exists fails as a validation error.
    pub fn insert_student(&mut self, student: &Student) -> Result<()> {
        diesel::insert_into(schema::students::table)
            .values(student)
            .execute(&mut self.db)?;
        Ok(())
    }

    /// Applies a partial update and returns the updated student, or `None` if the USN is unknown.
    pub fn update_student(
        &mut self,
        student_usn: &str,
        changes: &StudentUpdate,
    ) -> Result<Option<Student>> {
        use schema::students::dsl::*;

        Ok(diesel::update(students.filter(usn.eq(student_usn)))
            .set(changes)
            .returning(Student::as_returning())
            .get_result(&mut self.db)
            .optional()?)
    }

    /// Removes a student and all of their marks, returning the removed student.
    pub fn delete_student(&mut self, student_usn: &str) -> Result<Option<Student>> {
        self.db.transaction(|conn| {
            diesel::delete(schema::marks::table.filter(schema::marks::usn.eq(student_usn)))
                .execute(conn)?;

            diesel::delete(schema::students::table.filter(schema::students::usn.eq(student_usn)))
                .returning(Student::as_returning())
                .get_result(conn)
                .optional()
        })
        .map_err(Into::into)
    }

    // --- marks ----------------------------------------------------------------------------------

    /// Records a mark. If an entry for the same (USN, subject) already exists, it is replaced.
    pub fn upsert_mark(&mut self, entry: &MarkEntry) -> Result<()> {
        diesel::replace_into(schema::marks::table)
            .values(entry)
            .execute(&mut self.db)?;
        Ok(())
    }

    /// Returns every mark of a student, ordered by subject.
    pub fn get_marks(&mut self, student_usn: &str) -> Result<Vec<MarkEntry>> {
        use schema::marks::dsl::*;

        Ok(marks
            .filter(usn.eq(student_usn))
            .order(subject.asc())
            .select(MarkEntry::as_select())
            .load(&mut self.db)?)
    }

    /// Deletes every mark of a student and returns how many were removed.
    pub fn delete_marks(&mut self, student_usn: &str) -> Result<usize> {
        use schema::marks::dsl::*;

        Ok(diesel::delete(marks.filter(usn.eq(student_usn))).execute(&mut self.db)?)
    }

    // --- notes ----------------------------------------------------------------------------------

    /// Inserts note metadata and returns the stored row.
    pub fn insert_note(&mut self, note: &NewNote<'_>) -> Result<Note> {
        Ok(diesel::insert_into(schema::notes::table)
            .values(note)
            .returning(Note::as_returning())
            .get_result(&mut self.db)?)
    }

    /// Returns every note, newest first.
    pub fn get_notes(&mut self) -> Result<Vec<Note>> {
        use schema::notes::dsl::*;

        Ok(notes
            .order((created_at.desc(), id.desc()))
            .select(Note::as_select())
            .load(&mut self.db)?)
    }

    /// Returns the notes whose normalized subject equals `key`, newest first.
    pub fn get_notes_by_subject_key(&mut self, key: &str) -> Result<Vec<Note>> {
        use schema::notes::dsl::*;

        Ok(notes
            .filter(subject_key.eq(key))
            .order((created_at.desc(), id.desc()))
            .select(Note::as_select())
            .load(&mut self.db)?)
    }

    pub fn find_note(&mut self, note_id: i32) -> Result<Option<Note>> {
        use schema::notes::dsl::*;

        Ok(notes
            .filter(id.eq(note_id))
            .select(Note::as_select())
            .first(&mut self.db)
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now;

    fn student(student_usn: &str, student_name: &str) -> Student {
        Student {
            usn: student_usn.to_string(),
            name: student_name.to_string(),
            branch: "CSE".to_string(),
            year: 2,
            semester: 3,
            created_at: now(),
        }
    }

    fn mark(student_usn: &str, subject: &str, score: i32) -> MarkEntry {
        MarkEntry {
            usn: student_usn.to_string(),
            subject: subject.to_string(),
            score,
            updated_at: now(),
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let mut manager = PortalManager::in_memory().unwrap();
        manager.db.batch_execute(SCHEMA).unwrap();
        assert_eq!(manager.num_students().unwrap(), 0);
    }

    #[test]
    fn test_insert_and_find_student() {
        let mut manager = PortalManager::in_memory().unwrap();
        let jane = student("1RV21CS002", "Jane Smith");
        manager.insert_student(&jane).unwrap();

        assert_eq!(manager.find_student("1RV21CS002").unwrap(), Some(jane.clone()));
        assert_eq!(
            manager
                .find_student_by_login("Jane Smith", "1RV21CS002")
                .unwrap(),
            Some(jane)
        );
        assert_eq!(
            manager
                .find_student_by_login("Jane Smith", "1RV21CS003")
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_upsert_mark_replaces() {
        let mut manager = PortalManager::in_memory().unwrap();
        manager
            .insert_student(&student("1RV21CS002", "Jane Smith"))
            .unwrap();

        manager.upsert_mark(&mark("1RV21CS002", "Math", 90)).unwrap();
        manager.upsert_mark(&mark("1RV21CS002", "Math", 95)).unwrap();
        manager.upsert_mark(&mark("1RV21CS002", "Art", 70)).unwrap();

        let marks = manager.get_marks("1RV21CS002").unwrap();
        let subjects: Vec<(&str, i32)> = marks
            .iter()
            .map(|m| (m.subject.as_str(), m.score))
            .collect();
        assert_eq!(subjects, vec![("Art", 70), ("Math", 95)]);
    }

    #[test]
    fn test_delete_student_cascades_marks() {
        let mut manager = PortalManager::in_memory().unwrap();
        manager
            .insert_student(&student("1RV21CS002", "Jane Smith"))
            .unwrap();
        manager.upsert_mark(&mark("1RV21CS002", "Math", 90)).unwrap();

        let removed = manager.delete_student("1RV21CS002").unwrap();
        assert_eq!(removed.map(|s| s.usn), Some("1RV21CS002".to_string()));
        assert!(manager.get_marks("1RV21CS002").unwrap().is_empty());
        assert_eq!(manager.delete_student("1RV21CS002").unwrap(), None);
    }

    #[test]
    fn test_roster_filter() {
        let mut manager = PortalManager::in_memory().unwrap();
        let mut ece = student("1RV21EC001", "Anil Rao");
        ece.branch = "ECE".to_string();
        let mut senior = student("1RV20CS010", "Meera Iyer");
        senior.semester = 7;
        for s in [student("1RV21CS002", "Jane Smith"), ece, senior] {
            manager.insert_student(&s).unwrap();
        }

        assert_eq!(manager.get_roster(&RosterFilter::default()).unwrap().len(), 3);

        let cse_third = RosterFilter {
            branch: Some("CSE".to_string()),
            semester: Some(3),
        };
        let found = manager.get_roster(&cse_third).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].usn, "1RV21CS002");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let mut manager = PortalManager::in_memory().unwrap();

        let result: Result<()> = manager.transaction(|m| {
            m.insert_student(&student("1RV21CS002", "Jane Smith"))?;
            Err(crate::error::PortalError::Unavailable("interrupted".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(manager.num_students().unwrap(), 0);

        manager
            .transaction(|m| m.insert_student(&student("1RV21CS002", "Jane Smith")))
            .unwrap();
        assert_eq!(manager.num_students().unwrap(), 1);
    }

    #[test]
    fn test_update_unknown_student_is_none() {
        let mut manager = PortalManager::in_memory().unwrap();
        let changes = StudentUpdate {
            semester: Some(4),
            ..Default::default()
        };
        assert_eq!(manager.update_student("nobody", &changes).unwrap(), None);
    }
}
