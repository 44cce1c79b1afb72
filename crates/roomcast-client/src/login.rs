//! Soft login: a display name kept on the local machine.
//!
//! Nothing here is checked by the relay; the name only travels as the
//! optional `fromName` of outgoing messages.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Shortest accepted display name, after trimming.
pub const MIN_NAME_LEN: usize = 2;

const DEFAULT_PATH: &str = "~/.config/roomcast/user.json";

/// A logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftUser {
    /// Display name.
    pub name: String,
}

/// Display name persisted as JSON.
#[derive(Debug)]
pub struct SoftLogin {
    path: PathBuf,
    current: Option<SoftUser>,
}

impl SoftLogin {
    /// `~/.config/roomcast/user.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from(shellexpand::tilde(DEFAULT_PATH).as_ref())
    }

    /// Load the stored user, if any. A missing or unreadable file means
    /// nobody is logged in.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = load(&path);
        Self { path, current }
    }

    /// The logged-in user.
    #[must_use]
    pub fn current(&self) -> Option<&SoftUser> {
        self.current.as_ref()
    }

    /// Store a display name.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NameTooShort`] if fewer than
    /// [`MIN_NAME_LEN`] characters remain after trimming, or an I/O error
    /// if the file cannot be written.
    pub fn login(&mut self, display_name: &str) -> Result<&SoftUser> {
        let name = display_name.trim();
        if name.chars().count() < MIN_NAME_LEN {
            return Err(ClientError::NameTooShort(MIN_NAME_LEN));
        }

        let user = SoftUser {
            name: name.to_string(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec(&user)?)?;
        debug!(path = %self.path.display(), "Stored soft login");

        Ok(&*self.current.insert(user))
    }

    /// Forget the stored user.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be removed.
    pub fn logout(&mut self) -> Result<()> {
        self.current = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn load(path: &Path) -> Option<SoftUser> {
    let raw = std::fs::read(path).ok()?;
    match serde_json::from_slice(&raw) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable soft login");
            None
        }
    }
}
