//! Data directory layout.
//!
//! Resolved from: explicit `--data-dir` > `BENCHDASH_DATA_DIR` env > `~/.benchdash`.
//! Callers hold a [`DataDir`] instead of building paths from `HOME`.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DATA_DIR_ENV: &str = "BENCHDASH_DATA_DIR";
const DEFAULT_DIR_NAME: &str = ".benchdash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Priority: `explicit` arg > `BENCHDASH_DATA_DIR` env > `~/.benchdash`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty());
        Self::resolve_from(explicit, env.map(PathBuf::from), dirs::home_dir())
    }

    fn resolve_from(
        explicit: Option<&Path>,
        env: Option<PathBuf>,
        home: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let root = if let Some(p) = explicit {
            p.to_path_buf()
        } else if let Some(p) = env {
            p
        } else {
            home.ok_or(ConfigError::NoHomeDir)?.join(DEFAULT_DIR_NAME)
        };
        Ok(Self { root })
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn session_path(&self) -> PathBuf {
        self.root.join("session.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the data dir and its `logs/` subdirectory.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}
