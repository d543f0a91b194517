//! A small college portal: teachers maintain the student roster, subject marks and course notes;
//! students sign in to view their own record and marks, download their marksheet and read notes.
//!
//! The [`server`] module exposes everything over HTTP, and [`cli`] offers the same administrative
//! operations from the command line.

pub mod auth;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod export;
pub mod extract;
pub mod ledger;
pub mod manager;
pub mod models;
pub mod notes;
pub mod registry;
pub mod roster;
pub mod schema;
pub mod server;
pub mod session;

pub use error::{PortalError, Result};
