//! Persistent download progress.
//!
//! All state lives in one JSON document:
//!
//! ```json
//! {
//!   "chat_progress": { "<chat id>": { "next_url": "https://...", "num": 12 } },
//!   "chat_list": [ { "id": "...", "name": "...", ... } ]
//! }
//! ```
//!
//! Every write re-reads the file, replaces one part and commits the whole
//! document through a temp file + rename, so other conversations' entries and
//! unknown top-level keys survive.
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::model::Conversation;

/// Resumption state of one conversation.
///
/// `next_cursor == None` means the stream was read to its end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "next_url")]
    pub next_cursor: Option<String>,
    #[serde(rename = "num", default)]
    pub requests_done: u64,
}

impl Checkpoint {
    pub fn is_exhausted(&self) -> bool {
        self.next_cursor.is_none()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    chat_progress: BTreeMap<String, Checkpoint>,
    #[serde(default)]
    chat_list: Vec<Conversation>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every known checkpoint; empty on first run.
    pub fn load(&self) -> Result<BTreeMap<String, Checkpoint>> {
        Ok(self.read_state()?.chat_progress)
    }

    pub fn get(&self, conversation_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.read_state()?.chat_progress.remove(conversation_id))
    }

    /// Records the cursor of the next page to fetch for one conversation.
    pub fn save(
        &self,
        conversation_id: &str,
        next_cursor: Option<&str>,
        requests_done: u64,
    ) -> Result<()> {
        let mut state = self.read_state()?;
        state.chat_progress.insert(
            conversation_id.to_string(),
            Checkpoint {
                next_cursor: next_cursor.map(str::to_string),
                requests_done,
            },
        );
        self.write_state(&state)
    }

    pub fn cached_chat_list(&self) -> Result<Vec<Conversation>> {
        Ok(self.read_state()?.chat_list)
    }

    pub fn save_chat_list(&self, chats: &[Conversation]) -> Result<()> {
        let mut state = self.read_state()?;
        state.chat_list = chats.to_vec();
        self.write_state(&state)
    }

    fn read_state(&self) -> Result<StateFile> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(StateFile::default()),
            Ok(content) => serde_json::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse state file: {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
            Err(e) => Err(e)
                .wrap_err_with(|| format!("Failed to read state file: {}", self.path.display())),
        }
    }

    fn write_state(&self, state: &StateFile) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .wrap_err_with(|| format!("Failed to create state directory: {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(dir).wrap_err("Failed to create temporary file")?;
        serde_json::to_writer(&mut tmp, state).wrap_err("Failed to serialize state")?;
        tmp.flush()?;
        tmp.as_file()
            .sync_all()
            .wrap_err("Failed to sync state file")?;
        tmp.persist(&self.path)
            .wrap_err_with(|| format!("Failed to write state file: {}", self.path.display()))?;
        Ok(())
    }
}
