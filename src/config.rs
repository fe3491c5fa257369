//! Configuration loading from `.env` files.

use std::{env, path::PathBuf};

use anyhow::{Context, Result};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite database holding the events.
    pub db_path: PathBuf,
    /// Default directory the filesystem is mounted on.
    pub mount_point: PathBuf,
    /// Enable Schnorr signature verification on ingest.
    pub verify_sig: bool,
    /// Let users other than the mounting one see the filesystem.
    pub allow_other: bool,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let db_path = PathBuf::from(env::var("DB_PATH").context("DB_PATH not set")?);
        let mount_point = PathBuf::from(env::var("MOUNT_POINT").context("MOUNT_POINT not set")?);
        let verify_sig = env::var("VERIFY_SIG").unwrap_or_else(|_| "1".into()) != "0";
        let allow_other = env::var("ALLOW_OTHER").unwrap_or_else(|_| "0".into()) == "1";
        Ok(Self {
            db_path,
            mount_point,
            verify_sig,
            allow_other,
        })
    }
}
