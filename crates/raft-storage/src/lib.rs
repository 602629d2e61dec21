//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: implements raft_core::Storage; opened by raft-runtime when a data dir is given
//! what: FileStorage, one json record per node written atomically

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use raft_core::{PersistentState, Storage, StorageError};

const STATE_FILE: &str = "state.json";
const TEMP_FILE: &str = "state.tmp";

/// file-based storage implementation using std::fs
///
/// stores the whole persistence record in `<dir>/state.json`:
/// `{ "current_term": .., "voted_for": .., "log": [..] }`
#[derive(Debug, Clone)]
pub struct FileStorage {
    /// directory path for storing state files
    dir: PathBuf,
}

impl FileStorage {
    /// create a new filestorage at the given directory
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// get the path to the state file
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// forget everything saved so far
    pub fn clear(&mut self) -> io::Result<()> {
        for name in [STATE_FILE, TEMP_FILE] {
            match fs::remove_file(self.dir.join(name)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    // atomic write: write to temp file, sync, then rename over the old record
    fn write_atomically(&self, contents: &[u8]) -> io::Result<()> {
        let temp_path = self.dir.join(TEMP_FILE);
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, self.state_path())?;

        // make the rename itself durable where the platform allows it
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;

        Ok(())
    }
}

impl Storage for FileStorage {
    fn save(&mut self, state: &PersistentState) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(state)?;
        self.write_atomically(&json)?;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<PersistentState>, StorageError> {
        let contents = match fs::read(self.state_path()) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None), // new node
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }
}
