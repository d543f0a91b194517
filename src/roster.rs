//! Parsing of roster CSV files used for bulk student import.
//!
//! A roster has a header row naming the columns `name,usn,branch,year,semester` and one student
//! per row. Header names are matched case-insensitively, so column order is not significant.

use crate::error::{PortalError, Result};
use crate::models::NewStudent;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::io::Read;

/// The columns every roster must provide.
pub const COLUMNS: [&str; 5] = ["name", "usn", "branch", "year", "semester"];

/// One data row of a roster: its 1-based row number and either the parsed student or the reason
/// it could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub row: usize,
    /// The raw USN cell, kept so rejected rows can still be identified in reports.
    pub usn: String,
    pub parsed: std::result::Result<NewStudent, String>,
}

/// Positions of the required columns within the header.
struct ColumnIndex([usize; 5]);

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();

        let mut positions = [0usize; 5];
        let mut missing = Vec::new();
        for (slot, column) in COLUMNS.iter().enumerate() {
            match normalized.iter().position(|h| h == column) {
                Some(pos) => positions[slot] = pos,
                None => missing.push(*column),
            }
        }

        if missing.is_empty() {
            Ok(Self(positions))
        } else {
            Err(PortalError::Validation(format!(
                "roster is missing column(s): {}",
                missing.join(", ")
            )))
        }
    }

    fn get<'r>(&self, record: &'r StringRecord, slot: usize) -> &'r str {
        record.get(self.0[slot]).unwrap_or("").trim()
    }
}

fn required(value: &str, column: &str) -> std::result::Result<String, String> {
    if value.is_empty() {
        Err(format!("missing {column}"))
    } else {
        Ok(value.to_string())
    }
}

fn number(value: &str, column: &str) -> std::result::Result<i32, String> {
    if value.is_empty() {
        return Err(format!("missing {column}"));
    }
    value
        .parse()
        .map_err(|_| format!("{column} must be a whole number, got '{value}'"))
}

fn parse_record(
    columns: &ColumnIndex,
    record: &StringRecord,
) -> std::result::Result<NewStudent, String> {
    Ok(NewStudent {
        name: required(columns.get(record, 0), "name")?,
        usn: required(columns.get(record, 1), "usn")?,
        branch: required(columns.get(record, 2), "branch")?,
        year: number(columns.get(record, 3), "year")?,
        semester: number(columns.get(record, 4), "semester")?,
    })
}

/// Parses a roster. A missing or incomplete header fails the whole roster; problems with
/// individual rows are reported on those rows.
pub fn parse_roster<R: Read>(reader: R) -> Result<Vec<RosterRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let columns = ColumnIndex::from_headers(&headers)?;

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let row = index + 1;
        let entry = match result {
            Ok(record) => {
                // Blank lines are skipped by the reader; a row of empty cells is skipped here.
                if record.iter().all(|cell| cell.trim().is_empty()) {
                    continue;
                }
                RosterRow {
                    row,
                    usn: columns.get(&record, 1).to_string(),
                    parsed: parse_record(&columns, &record),
                }
            }
            Err(e) => RosterRow {
                row,
                usn: String::new(),
                parsed: Err(format!("unreadable row: {e}")),
            },
        };
        rows.push(entry);
    }

    Ok(rows)
}
