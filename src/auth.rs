//! Access token storage
//!
//! The token lives in `~/.roamterm/credentials.toml` under a fixed key and is
//! passed verbatim as the `token` query parameter of the session URL.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::config_dir;

/// Key the access token is stored under
pub const ACCESS_TOKEN_KEY: &str = "access_token";

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("token store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed token store {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize token store: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no access token; run `roamterm save-token <TOKEN>` or pass --token")]
    Missing,
}

/// File-backed key/value store holding the access token
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the default location
    pub fn default_location() -> Result<Self, TokenError> {
        config_dir()
            .map(|dir| Self::at(dir.join("credentials.toml")))
            .ok_or(TokenError::NoHome)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored token, if any
    pub fn load(&self) -> Result<Option<String>, TokenError> {
        Ok(self.entries()?.remove(ACCESS_TOKEN_KEY).filter(|t| !t.is_empty()))
    }

    pub fn save(&self, token: &str) -> Result<(), TokenError> {
        let mut entries = self.entries()?;
        entries.insert(ACCESS_TOKEN_KEY.to_string(), token.trim().to_string());
        let content = toml::to_string(&entries)?;
        fs::write(&self.path, content).map_err(|source| TokenError::Io {
            path: self.path.clone(),
            source,
        })?;
        restrict_permissions(&self.path);
        Ok(())
    }

    fn entries(&self) -> Result<BTreeMap<String, String>, TokenError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| TokenError::Io {
            path: self.path.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| TokenError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

/// Pick the explicit token, else the stored one.
pub fn resolve_token(explicit: Option<String>, store: &TokenStore) -> Result<String, TokenError> {
    match explicit.filter(|t| !t.is_empty()) {
        Some(token) => Ok(token),
        None => store.load()?.ok_or(TokenError::Missing),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> TokenStore {
        let path = std::env::temp_dir().join(format!("roamterm-{}-{}.toml", name, std::process::id()));
        let _ = fs::remove_file(&path);
        TokenStore::at(path)
    }

    #[test]
    fn test_missing_file_has_no_token() {
        let store = temp_store("missing");
        assert_eq!(store.load().unwrap(), None);
        assert!(matches!(resolve_token(None, &store), Err(TokenError::Missing)));
    }

    #[test]
    fn test_save_then_load() {
        let store = temp_store("save");
        store.save(" eyJhbGciOi.payload.sig \n").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("eyJhbGciOi.payload.sig"));

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("access_token"));
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn test_explicit_token_wins() {
        let store = temp_store("explicit");
        store.save("stored").unwrap();
        assert_eq!(resolve_token(Some("cli".to_string()), &store).unwrap(), "cli");
        assert_eq!(resolve_token(Some(String::new()), &store).unwrap(), "stored");
        let _ = fs::remove_file(store.path());
    }
}
