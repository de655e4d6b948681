//! Bearer token persistence.
//!
//! The token is kept in a small JSON file (`{"token": "..."}`) next to the
//! config. Unknown keys in that file are preserved on write.
use eyre::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::fetcher::Credential;

pub const TOKEN_HELP: &str = "\
No token found. To obtain a token follow the following steps:
  1. Go to the website https://developer.microsoft.com/en-us/graph/graph-explorer
  2. Sign in with your account by clicking the user icon in the top right corner
  3. Click again on your user icon and select 'Consent to permissions'
  4. Scroll down to chat, locate 'Chat.Read' and click the 'Consent' button
  5. Close the permission panel and click on the 'Access Token' tab in the main page
  6. Copy the token";

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Credential>> {
        let settings = self.read()?;
        Ok(settings
            .get("token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.trim().is_empty())
            .map(Credential::new))
    }

    pub fn store(&self, credential: &Credential) -> Result<()> {
        let mut settings = self.read()?;
        settings.insert(
            "token".to_string(),
            serde_json::Value::String(credential.token().to_string()),
        );
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).wrap_err_with(|| format!("Failed to create: {}", dir.display()))?;

        // The temp file is created owner-only and keeps that mode once renamed.
        let mut tmp = NamedTempFile::new_in(dir).wrap_err("Failed to create temporary file")?;
        serde_json::to_writer_pretty(&mut tmp, &settings)
            .wrap_err("Failed to serialize credentials")?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .wrap_err_with(|| format!("Failed to write credentials: {}", self.path.display()))?;
        Ok(())
    }

    fn read(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        if !self.path.exists() {
            return Ok(serde_json::Map::new());
        }
        let content = fs::read_to_string(&self.path)
            .wrap_err_with(|| format!("Failed to read credentials: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse credentials: {}", self.path.display()))
    }
}
