use crate::error::SaveError;
use crate::message::Message;

use chrono::Local;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all, read_dir, remove_file, write};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const SAVE_DIR: &str = "./data/save";

// A character conversation as written to disk, one file per save name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationSave {
    pub save_name: String,
    pub character_name: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub saved_at: String,
}

impl ConversationSave {
    pub fn new(
        save_name: impl Into<String>,
        character_name: impl Into<String>,
        system_prompt: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            save_name: save_name.into(),
            character_name: character_name.into(),
            system_prompt: system_prompt.into(),
            messages,
            saved_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SaveManager {
    save_dir: PathBuf,
}

impl Default for SaveManager {
    fn default() -> Self {
        Self::new(SAVE_DIR)
    }
}

impl SaveManager {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    // Names of the saves currently on disk, sorted.
    pub fn available_saves(&self) -> Vec<String> {
        Self::scan_save_files(&self.save_dir)
    }

    pub fn scan_save_files(save_dir: &Path) -> Vec<String> {
        let Ok(entries) = read_dir(save_dir) else {
            return Vec::new();
        };

        let mut saves: Vec<String> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let path = entry.path();
                if path.is_file() && path.extension()? == "json" {
                    path.file_stem()?.to_str().map(String::from)
                } else {
                    None
                }
            })
            .collect();
        saves.sort();
        saves
    }

    // A save name must stay a single file inside the save directory.
    fn path_for(&self, save_name: &str) -> Result<PathBuf, SaveError> {
        let valid = !save_name.is_empty()
            && !save_name.starts_with('.')
            && !save_name.contains(['/', '\\', ':', '\0']);
        if !valid {
            return Err(SaveError::InvalidName(save_name.to_string()));
        }
        Ok(self.save_dir.join(format!("{}.json", save_name)))
    }

    pub fn load(&self, save_name: &str) -> Result<ConversationSave, SaveError> {
        let file = File::open(self.path_for(save_name)?).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SaveError::NotFound(save_name.to_string()),
            _ => SaveError::Io(e),
        })?;
        let save: ConversationSave = serde_json::from_reader(file)?;
        debug!(
            "Loaded save {} ({} messages, saved {})",
            save_name,
            save.messages.len(),
            save.saved_at
        );
        Ok(save)
    }

    pub fn save(&self, save: &ConversationSave) -> Result<(), SaveError> {
        let path = self.path_for(&save.save_name)?;
        create_dir_all(&self.save_dir)?;
        let serialized = serde_json::to_string_pretty(save)?;
        write(path, serialized)?;
        Ok(())
    }

    pub fn delete_save(&self, save_name: &str) -> Result<(), SaveError> {
        match remove_file(self.path_for(save_name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SaveError::NotFound(save_name.to_string()))
            }
            Err(e) => Err(SaveError::Io(e)),
        }
    }
}
