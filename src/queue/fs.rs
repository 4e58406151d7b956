//! Filesystem coordination backend.
//!
//! Each entry is a file named `entry-<sequence>` with a zero-padded,
//! monotonically increasing sequence. Payloads are written and synced to a
//! temporary file first and then hard-linked into place, so an entry is
//! either fully visible or absent after a crash, and two producers can never
//! claim the same sequence number.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use uuid::Uuid;

use super::{CoordinationBackend, QueueError};

const ENTRY_PREFIX: &str = "entry-";
const TEMP_PREFIX: &str = ".tmp-";
const MAX_APPEND_ATTEMPTS: usize = 16;

/// Queue directory accessed through a capability handle.
#[derive(Debug)]
pub struct FsCoordinationBackend {
    path: Utf8PathBuf,
    dir: Dir,
    last_sequence: AtomicU64,
}

impl FsCoordinationBackend {
    /// Opens the queue directory, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the directory cannot be
    /// created or opened.
    pub fn open(path: &Utf8Path) -> Result<Self, QueueError> {
        Dir::create_ambient_dir_all(path, ambient_authority())
            .map_err(|err| unavailable(path, &err))?;
        let dir = Dir::open_ambient_dir(path, ambient_authority())
            .map_err(|err| unavailable(path, &err))?;
        Ok(Self {
            path: path.to_path_buf(),
            dir,
            last_sequence: AtomicU64::new(0),
        })
    }

    /// Queue directory.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn unavailable(&self, err: &io::Error) -> QueueError {
        unavailable(&self.path, err)
    }

    fn sequences(&self) -> Result<Vec<(u64, String)>, QueueError> {
        let mut nodes = Vec::new();
        for listed in self.dir.entries().map_err(|err| self.unavailable(&err))? {
            let name = listed
                .and_then(|entry| entry.file_name())
                .map_err(|err| self.unavailable(&err))?;
            if let Some(sequence) = parse_sequence(&name) {
                nodes.push((sequence, name));
            }
        }
        nodes.sort_unstable();
        Ok(nodes)
    }

    fn next_sequence(&self) -> Result<u64, QueueError> {
        let highest = self
            .sequences()?
            .last()
            .map_or(0, |(sequence, _)| *sequence);
        let floor = self.last_sequence.load(Ordering::SeqCst);
        Ok(highest.max(floor) + 1)
    }

    fn write_temp(&self, payload: &[u8]) -> Result<String, QueueError> {
        let temp_name = format!("{TEMP_PREFIX}{}", Uuid::new_v4());
        let mut file = self
            .dir
            .create(&temp_name)
            .map_err(|err| self.unavailable(&err))?;
        file.write_all(payload)
            .and_then(|()| file.sync_all())
            .map_err(|err| self.unavailable(&err))?;
        Ok(temp_name)
    }
}

impl CoordinationBackend for FsCoordinationBackend {
    fn append(&self, payload: &[u8]) -> Result<String, QueueError> {
        let temp_name = self.write_temp(payload)?;
        let mut sequence = self.next_sequence()?;
        let mut attempts = 1;
        let linked = loop {
            let node = entry_name(sequence);
            match self.dir.hard_link(&temp_name, &self.dir, &node) {
                Ok(()) => break Ok(node),
                // A concurrent producer claimed this sequence.
                Err(err)
                    if err.kind() == io::ErrorKind::AlreadyExists
                        && attempts < MAX_APPEND_ATTEMPTS =>
                {
                    attempts += 1;
                    sequence += 1;
                }
                Err(err) => break Err(self.unavailable(&err)),
            }
        };
        if let Err(err) = self.dir.remove_file(&temp_name) {
            tracing::warn!(
                path = %self.path,
                file = %temp_name,
                error = %err,
                "failed to remove temporary queue file"
            );
        }
        let node = linked?;
        self.last_sequence.fetch_max(sequence, Ordering::SeqCst);
        Ok(node)
    }

    fn children(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.sequences()?.into_iter().map(|(_, name)| name).collect())
    }

    fn read(&self, node: &str) -> Result<Option<Vec<u8>>, QueueError> {
        match self.dir.read(node) {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.unavailable(&err)),
        }
    }

    fn remove(&self, node: &str) -> Result<bool, QueueError> {
        match self.dir.remove_file(node) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(self.unavailable(&err)),
        }
    }
}

fn entry_name(sequence: u64) -> String {
    format!("{ENTRY_PREFIX}{sequence:020}")
}

fn parse_sequence(name: &str) -> Option<u64> {
    name.strip_prefix(ENTRY_PREFIX)?.parse().ok()
}

fn unavailable(path: &Utf8Path, err: &io::Error) -> QueueError {
    QueueError::Unavailable {
        location: path.to_string(),
        message: err.to_string(),
    }
}
