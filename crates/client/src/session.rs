//! Auth session.
//!
//! The token lives in an explicit [`Session`] value that is handed to the
//! REST client at construction. Persistence is a small JSON file next to the
//! config; nothing is cached process-wide.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    path: Option<PathBuf>,
    token: Option<String>,
}

impl Session {
    /// A session that is never written to disk.
    pub fn in_memory(token: Option<String>) -> Self {
        Self { path: None, token }
    }

    /// Read the session file. A missing file is an anonymous session.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let token = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => None,
            Ok(raw) => serde_json::from_str::<SessionFile>(&raw)?.token,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        debug!(
            component = "session",
            event = "session.loaded",
            path = %path.display(),
            authenticated = token.is_some(),
            "Session loaded"
        );
        Ok(Self {
            path: Some(path),
            token,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Persist the current token. No-op for in-memory sessions.
    pub fn save(&self) -> Result<(), ConfigError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&SessionFile {
            token: self.token.clone(),
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, path)?;
        info!(
            component = "session",
            event = "session.saved",
            path = %path.display(),
            "Session saved"
        );
        Ok(())
    }

    /// Forget the token and remove the session file.
    pub fn clear(&mut self) -> Result<(), ConfigError> {
        self.token = None;
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(
            component = "session",
            event = "session.cleared",
            path = %path.display(),
            "Session cleared"
        );
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
