use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::notes::NoteStorage;

/// Credentials created on `serve` when the database has no teacher yet.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedTeacher {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub bind_address: String,
    pub upload_dir: PathBuf,
    pub session_ttl_secs: u64,
    pub db_lock_timeout_ms: u64,
    pub max_upload_bytes: usize,
    /// Whether the session cookie carries the `Secure` attribute.
    pub cookie_secure: bool,
    pub seed_teacher: Option<SeedTeacher>,
}

impl Settings {
    /// Loads settings from built-in defaults, then `<path>.toml` if present, then `PORTAL__*`
    /// environment variables. `DATABASE_URL` (also read from `.env`) overrides the database.
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = Config::builder()
            .set_default("database_url", "portal.db")?
            .set_default("bind_address", "127.0.0.1:5000")?
            .set_default("upload_dir", "uploads")?
            .set_default("session_ttl_secs", 3600)?
            .set_default("db_lock_timeout_ms", 5000)?
            .set_default("max_upload_bytes", 50 * 1024 * 1024)?
            .set_default("cookie_secure", true)?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("PORTAL").separator("__"))
            .set_override_option("database_url", env::var("DATABASE_URL").ok())?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn db_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.db_lock_timeout_ms)
    }

    pub fn note_storage(&self) -> NoteStorage {
        NoteStorage {
            upload_dir: self.upload_dir.clone(),
            max_bytes: self.max_upload_bytes,
        }
    }
}
