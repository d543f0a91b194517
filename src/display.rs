use crate::models::{MarkEntry, Student};
use crate::registry::ImportReport;
use tabled::{Table, Tabled, settings::Style};

/// Pretty prints the roster.
pub fn show_roster(roster: Vec<Student>, verbose: bool) {
    let mut table = if verbose {
        Table::new(roster)
    } else {
        #[derive(Tabled)]
        struct SimpleStudent {
            usn: String,
            name: String,
            branch: String,
        }

        let simplified_roster: Vec<SimpleStudent> = roster
            .into_iter()
            .map(|student| SimpleStudent {
                usn: student.usn,
                name: student.name,
                branch: student.branch,
            })
            .collect();

        Table::new(simplified_roster)
    };

    table.with(Style::modern());
    println!("Roster:\n{table}");
}

/// Pretty prints a student's marks, ordered by subject.
pub fn show_marks(usn: &str, marks: Vec<MarkEntry>) {
    if marks.is_empty() {
        println!("No marks recorded for {usn}.");
        return;
    }

    #[derive(Tabled)]
    struct SubjectScore {
        subject: String,
        score: i32,
    }

    let rows: Vec<SubjectScore> = marks
        .into_iter()
        .map(|entry| SubjectScore {
            subject: entry.subject,
            score: entry.score,
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("Marks for {usn}:\n{table}");
}

/// Prints the per-row outcome of a roster import.
pub fn show_import_report(report: &ImportReport) {
    let mut table = Table::new(&report.rows);
    table.with(Style::modern());

    println!("{table}");
    println!("{} created, {} rejected", report.created, report.rejected);
}
