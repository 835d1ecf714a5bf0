//! Seek info persistence
//!
//! Keeps the position of every file source in a JSON file so a restarted
//! daemon resumes right after the last line it ingested.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use tailpoll_logs::SeekInfo;

/// On-disk layout of the state file
#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    /// Map of source name to its last position
    seek_info: BTreeMap<String, SeekInfo>,
}

/// Seek info of all sources, written through to disk
pub struct SeekStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl SeekStore {
    /// Load the store from disk. A missing or unreadable file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "ignoring corrupt state file");
                State::default()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => State::default(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read state file");
                State::default()
            }
        };
        tracing::debug!(path = %path.display(), sources = state.seek_info.len(), "loaded state");

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, source: &str) -> Option<SeekInfo> {
        self.state.lock().seek_info.get(source).copied()
    }

    /// Record the position of a source and write the file
    pub fn sync(&self, source: &str, seek_info: SeekInfo) -> io::Result<()> {
        let mut state = self.state.lock();
        state.seek_info.insert(source.to_string(), seek_info);
        write_atomic(&self.path, &state)
    }

    /// Write the current state to disk
    pub fn save(&self) -> io::Result<()> {
        let state = self.state.lock();
        write_atomic(&self.path, &state)
    }
}

/// Write to a sibling temp file then rename over the target
fn write_atomic(path: &Path, state: &State) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(state)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}
