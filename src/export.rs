//! Marksheet export.
//!
//! A marksheet is a standalone HTML document listing every subject score of one student with a
//! total and an average. Rendering depends only on the stored rows, so the same data always
//! produces the same bytes.

use crate::auth::Principal;
use crate::error::{PortalError, Result};
use crate::manager::PortalManager;
use crate::models::{MarkEntry, Student};
use std::fmt::Write;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct Marksheet {
    pub student: Student,
    pub entries: Vec<MarkEntry>,
}

impl Marksheet {
    /// Sum of all subject scores.
    pub fn total(&self) -> i64 {
        self.entries.iter().map(|e| i64::from(e.score)).sum()
    }

    /// Mean subject score, rounded to two decimals. Zero for an empty marksheet.
    pub fn average(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let mean = self.total() as f64 / self.entries.len() as f64;
        (mean * 100.0).round() / 100.0
    }

    /// The download name, e.g. `Jane_Smith_1RV21CS002_Marksheet.html`.
    pub fn filename(&self) -> String {
        let name: String = self
            .student
            .name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        sanitize(&format!("{name}_{}_Marksheet.html", self.student.usn))
    }

    pub fn render_html(&self) -> String {
        let student = &self.student;
        let mut html = String::new();

        // Writing to a String cannot fail.
        let _ = write!(
            html,
            "<!DOCTYPE html>\n\
             <html lang=\"en\">\n\
             <head>\n\
             <meta charset=\"utf-8\">\n\
             <title>Marksheet - {usn}</title>\n\
             <style>\n\
             body {{ font-family: Helvetica, Arial, sans-serif; color: #333; margin: 40px; }}\n\
             h1 {{ color: #ff4b2b; text-align: center; }}\n\
             table {{ border-collapse: collapse; margin: 0 auto; min-width: 50%; }}\n\
             th {{ background: #ff6f3c; color: #fff; }}\n\
             th, td {{ border: 1px solid #ccc; padding: 6px 12px; text-align: center; }}\n\
             .summary {{ text-align: center; margin-top: 24px; }}\n\
             </style>\n\
             </head>\n\
             <body>\n\
             <h1>Marksheet</h1>\n\
             <p>\n\
             <b>Name:</b> {name}<br>\n\
             <b>USN:</b> {usn}<br>\n\
             <b>Branch:</b> {branch}<br>\n\
             <b>Year:</b> {year}<br>\n\
             <b>Semester:</b> {semester}\n\
             </p>\n\
             <table>\n\
             <tr><th>Subject</th><th>Score</th></tr>\n",
            name = escape(&student.name),
            usn = escape(&student.usn),
            branch = escape(&student.branch),
            year = student.year,
            semester = student.semester,
        );

        for entry in &self.entries {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td></tr>",
                escape(&entry.subject),
                entry.score
            );
        }

        let _ = write!(
            html,
            "</table>\n\
             <p class=\"summary\">\n\
             <b>Subjects:</b> {count} | <b>Total:</b> {total} | <b>Average:</b> {average:.2}\n\
             </p>\n\
             </body>\n\
             </html>\n",
            count = self.entries.len(),
            total = self.total(),
            average = self.average(),
        );

        html
    }
}

/// Minimal HTML escaping for text nodes and attribute values.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn sanitize(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Collects a student's marks into a marksheet. A student without any marks cannot be exported.
pub fn build_marksheet(db: &mut PortalManager, actor: &Principal, usn: &str) -> Result<Marksheet> {
    let usn = usn.trim();
    actor.ensure_can_read(usn)?;

    let student = db
        .find_student(usn)?
        .ok_or_else(|| PortalError::NotFound(format!("student {usn}")))?;
    let entries = db.get_marks(usn)?;

    if entries.is_empty() {
        return Err(PortalError::NotFound(format!("no marks recorded for {usn}")));
    }

    Ok(Marksheet { student, entries })
}

/// Renders the marksheet of `usn`, returning the download filename and the HTML document.
pub fn export_marksheet(
    db: &mut PortalManager,
    actor: &Principal,
    usn: &str,
) -> Result<(String, String)> {
    let marksheet = build_marksheet(db, actor, usn)?;
    info!(
        actor = actor.identity(),
        usn,
        subjects = marksheet.entries.len(),
        "marksheet exported"
    );
    Ok((marksheet.filename(), marksheet.render_html()))
}
