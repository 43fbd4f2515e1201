//! Per-database memory notes.
//!
//! Free-form notes the user records about a database, injected verbatim into
//! the system prompt. Stored in a per-user `memories.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SaberError};

/// One memory note for a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub database_name: String,
    pub content: String,
    /// Unix seconds.
    pub created_at: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    databases: HashMap<String, Vec<MemoryEntry>>,
}

/// File-backed store of per-database memory notes.
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    /// Opens the store at the default platform data path.
    pub fn open_default() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| SaberError::storage("Could not determine data directory"))?;
        Ok(Self::open(data_dir.join("sqlsaber").join("memories.json")))
    }

    /// Opens the store at the given path. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds a memory for a database and returns it.
    pub fn add(&self, database_name: &str, content: &str) -> Result<MemoryEntry> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SaberError::validation("Memory content cannot be empty"));
        }

        let entry = MemoryEntry {
            id: Uuid::new_v4().to_string(),
            database_name: database_name.to_string(),
            content: content.to_string(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
        };

        let mut file = self.load()?;
        file.databases
            .entry(database_name.to_string())
            .or_default()
            .push(entry.clone());
        self.save(&file)?;
        Ok(entry)
    }

    /// Lists memories for a database in insertion order.
    pub fn list(&self, database_name: &str) -> Result<Vec<MemoryEntry>> {
        let file = self.load()?;
        Ok(file.databases.get(database_name).cloned().unwrap_or_default())
    }

    /// Removes a memory by id; returns whether anything was removed.
    pub fn remove(&self, database_name: &str, id: &str) -> Result<bool> {
        let mut file = self.load()?;
        let Some(entries) = file.databases.get_mut(database_name) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            self.save(&file)?;
        }
        Ok(removed)
    }

    /// Removes all memories for a database; returns the removed count.
    pub fn clear(&self, database_name: &str) -> Result<usize> {
        let mut file = self.load()?;
        let count = file
            .databases
            .remove(database_name)
            .map(|entries| entries.len())
            .unwrap_or(0);
        if count > 0 {
            self.save(&file)?;
        }
        Ok(count)
    }

    /// Formats a database's memories as a prompt section, or an empty string
    /// when there are none.
    pub fn format_for_prompt(&self, database_name: &str) -> Result<String> {
        let entries = self.list(database_name)?;
        if entries.is_empty() {
            return Ok(String::new());
        }

        let mut section = String::new();
        for entry in &entries {
            section.push_str("- ");
            section.push_str(&entry.content);
            section.push('\n');
        }
        Ok(section.trim_end().to_string())
    }

    fn load(&self) -> Result<MemoryFile> {
        if !self.path.exists() {
            return Ok(MemoryFile::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| SaberError::storage(format!("Failed to read memories: {e}")))?;
        if raw.trim().is_empty() {
            return Ok(MemoryFile::default());
        }
        serde_json::from_str(&raw)
            .map_err(|e| SaberError::storage(format!("Malformed memories file: {e}")))
    }

    fn save(&self, file: &MemoryFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SaberError::storage(format!("Failed to create data dir: {e}")))?;
        }
        let raw = serde_json::to_string_pretty(file)
            .map_err(|e| SaberError::storage(format!("Failed to encode memories: {e}")))?;
        std::fs::write(&self.path, raw)
            .map_err(|e| SaberError::storage(format!("Failed to write memories: {e}")))
    }
}
