//! This module contains the command-line interface [`Cli`] parser for running and administering
//! the portal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::path::PathBuf;
use tracing::info;

use crate::auth::{self, Principal};
use crate::config::Settings;
use crate::display;
use crate::export;
use crate::ledger;
use crate::manager::PortalManager;
use crate::models::{NewStudent, RosterFilter};
use crate::registry;
use crate::server;

/// The command line configuration struct, where the command-line interface parser is automatically
/// derived by [`clap::Parser`].
#[derive(Parser, Debug)]
#[command(version, about = "College portal for student records, marks and notes")]
pub struct Cli {
    /// Configuration file name, without the `.toml` extension.
    #[arg(long, default_value = "config")]
    pub config: String,

    /// The different commands available for running and administering the portal.
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server.
    Serve,

    /// Create a teacher account.
    AddTeacher { username: String, password: String },

    /// Add a new student to the roster.
    AddStudent(NewStudent),

    /// Add students from a roster CSV file.
    ImportRoster { file_path: PathBuf },

    /// Display the roster.
    ShowRoster {
        /// Show every column.
        #[arg(short, long)]
        verbose: bool,

        #[command(flatten)]
        filter: RosterFilter,
    },

    /// Record (or overwrite) a student's score in a subject.
    SetMark {
        usn: String,
        subject: String,
        score: i32,
    },

    /// Display a student's marks.
    ShowMarks { usn: String },

    /// Write a student's marksheet as an HTML file.
    ExportMarksheet {
        usn: String,
        /// Output path. Defaults to the marksheet's own file name in the current directory.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

impl Cli {
    /// Runs the parsed command. Administrative commands act as the operator teacher.
    pub async fn run(self) -> Result<()> {
        let settings = Settings::load(&self.config)?;

        match self.command {
            Command::Serve => server::serve(settings).await,
            command => run_admin(&settings, command),
        }
    }
}

fn run_admin(settings: &Settings, command: Command) -> Result<()> {
    let mut manager = PortalManager::connect(&settings.database_url)?;
    let operator = Principal::operator();

    match command {
        // Dispatched by `Cli::run`.
        Command::Serve => {}
        Command::AddTeacher { username, password } => {
            auth::create_teacher(&mut manager, &username, &password)?;
            println!("Created teacher '{}'", username.trim());
        }
        Command::AddStudent(student) => {
            let student = registry::create_student(&mut manager, &operator, &student)?;
            println!("Added {} ({})", student.name, student.usn);
        }
        Command::ImportRoster { file_path } => {
            let file = File::open(&file_path)
                .with_context(|| format!("could not open {}", file_path.display()))?;
            let report = registry::bulk_import(&mut manager, &operator, file)?;
            display::show_import_report(&report);
        }
        Command::ShowRoster { verbose, filter } => {
            let roster = registry::list_students(&mut manager, &operator, &filter)?;
            display::show_roster(roster, verbose);
        }
        Command::SetMark {
            usn,
            subject,
            score,
        } => {
            let entry = ledger::set_mark(&mut manager, &operator, &usn, &subject, score)?;
            println!("{}: {} = {}", entry.usn, entry.subject, entry.score);
        }
        Command::ShowMarks { usn } => {
            let marks = ledger::get_marks_for_student(&mut manager, &operator, &usn)?;
            display::show_marks(&usn, marks);
        }
        Command::ExportMarksheet { usn, out } => {
            let (filename, html) = export::export_marksheet(&mut manager, &operator, &usn)?;
            let path = out.unwrap_or_else(|| PathBuf::from(filename));
            fs::write(&path, html)
                .with_context(|| format!("could not write {}", path.display()))?;
            info!("Wrote marksheet to {}", path.display());
            println!("{}", path.display());
        }
    }

    Ok(())
}
