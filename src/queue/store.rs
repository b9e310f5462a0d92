//! Log File I/O Abstraction
//!
//! Trait-based storage for the single backing log file, following the
//! store patterns used elsewhere for write-ahead logs.
//!
//! ## Implementations
//!
//! - `FileStore`: production (std::fs append / truncate-write)
//! - `MemStore`: unit tests and crash simulation
//!
//! Each `append` / `overwrite` is issued as one underlying write call, so
//! a crash mid-call leaves either the prior content intact or the new
//! content fully written. Replay relies on that: a torn final line is the
//! only damage a crash can cause, and the codec skips it.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Error as IoError, ErrorKind, Lines, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Error type for queue operations.
#[derive(Debug)]
pub enum QueueError {
    /// The queue was closed; add/commit are no longer allowed.
    Closed,
    /// I/O failure from the backing store. In-memory and on-disk state
    /// may disagree until the next open replays the log.
    Io(IoError),
    /// A record failed to encode or decode.
    Corrupt(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Closed => write!(f, "queue is closed"),
            QueueError::Io(e) => write!(f, "queue I/O error: {}", e),
            QueueError::Corrupt(msg) => write!(f, "queue corrupt record: {}", msg),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<IoError> for QueueError {
    fn from(e: IoError) -> Self {
        QueueError::Io(e)
    }
}

/// Storage backend for the queue's single log file.
pub trait LogStore: Send + Sync {
    type Lines: Iterator<Item = Result<String, QueueError>>;

    /// Whether the log file currently exists.
    fn exists(&self) -> bool;
    /// Lazy line sequence over the current file contents.
    fn read_lines(&self) -> Result<Self::Lines, QueueError>;
    /// Append text to the file in one write call, creating it if absent.
    fn append(&self, text: &str) -> Result<(), QueueError>;
    /// Replace the whole file contents in one write call.
    fn overwrite(&self, text: &str) -> Result<(), QueueError>;
    /// Delete the file. Deleting an absent file is not an error.
    fn delete(&self) -> Result<(), QueueError>;
    /// Human-readable location, for log messages.
    fn location(&self) -> String;
}

// ============================================================================
// FileStore - For production
// ============================================================================

/// Local filesystem log store.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Lazy line iterator over a log file.
pub struct FileLines {
    lines: Lines<BufReader<File>>,
}

impl Iterator for FileLines {
    type Item = Result<String, QueueError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next().map(|r| r.map_err(QueueError::from))
    }
}

impl LogStore for FileStore {
    type Lines = FileLines;

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read_lines(&self) -> Result<FileLines, QueueError> {
        let file = File::open(&self.path)?;
        Ok(FileLines {
            lines: BufReader::new(file).lines(),
        })
    }

    fn append(&self, text: &str) -> Result<(), QueueError> {
        debug_assert!(!text.is_empty(), "Precondition: text must not be empty");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    fn overwrite(&self, text: &str) -> Result<(), QueueError> {
        std::fs::write(&self.path, text.as_bytes())?;
        Ok(())
    }

    fn delete(&self) -> Result<(), QueueError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::Io(e)),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// MemStore - For unit tests and crash simulation
// ============================================================================

#[derive(Debug, Default)]
struct MemFile {
    data: Vec<u8>,
    exists: bool,
}

/// In-memory log store. Cloning shares the same backing file, so a
/// "restart" is simulated by opening a fresh queue on a clone.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    file: Arc<Mutex<MemFile>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Raw file bytes (for asserting on log contents in tests).
    pub fn raw(&self) -> Option<Vec<u8>> {
        let file = self.file.lock().expect("mem store mutex poisoned");
        file.exists.then(|| file.data.clone())
    }

    /// Replace the raw file bytes (for corruption / torn-write simulation).
    pub fn set_raw(&self, data: Vec<u8>) {
        let mut file = self.file.lock().expect("mem store mutex poisoned");
        file.data = data;
        file.exists = true;
    }

    /// Truncate the file to `len` bytes, as a crash mid-append would.
    pub fn truncate(&self, len: usize) {
        let mut file = self.file.lock().expect("mem store mutex poisoned");
        file.data.truncate(len);
    }
}

/// Owned line iterator over a point-in-time copy of the memory file.
pub struct MemLines {
    lines: std::vec::IntoIter<String>,
}

impl Iterator for MemLines {
    type Item = Result<String, QueueError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next().map(Ok)
    }
}

impl LogStore for MemStore {
    type Lines = MemLines;

    fn exists(&self) -> bool {
        self.file.lock().expect("mem store mutex poisoned").exists
    }

    fn read_lines(&self) -> Result<MemLines, QueueError> {
        let file = self.file.lock().expect("mem store mutex poisoned");
        if !file.exists {
            return Err(QueueError::Io(IoError::new(
                ErrorKind::NotFound,
                "no such memory file",
            )));
        }
        let text = String::from_utf8_lossy(&file.data);
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        Ok(MemLines {
            lines: lines.into_iter(),
        })
    }

    fn append(&self, text: &str) -> Result<(), QueueError> {
        let mut file = self.file.lock().expect("mem store mutex poisoned");
        file.data.extend_from_slice(text.as_bytes());
        file.exists = true;
        Ok(())
    }

    fn overwrite(&self, text: &str) -> Result<(), QueueError> {
        let mut file = self.file.lock().expect("mem store mutex poisoned");
        file.data = text.as_bytes().to_vec();
        file.exists = true;
        Ok(())
    }

    fn delete(&self) -> Result<(), QueueError> {
        let mut file = self.file.lock().expect("mem store mutex poisoned");
        file.data.clear();
        file.exists = false;
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_append_read() {
        let store = MemStore::new();
        assert!(!store.exists());

        store.append("{\"remove\":\"0\"}\n").unwrap();
        store.append("{\"remove\":\"1\"}\n").unwrap();
        assert!(store.exists());

        let lines: Vec<String> = store.read_lines().unwrap().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["{\"remove\":\"0\"}", "{\"remove\":\"1\"}"]);
    }

    #[test]
    fn test_mem_overwrite_and_delete() {
        let store = MemStore::new();
        store.append("old\n").unwrap();
        store.overwrite("new\n").unwrap();

        let lines: Vec<String> = store.read_lines().unwrap().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["new"]);

        store.delete().unwrap();
        assert!(!store.exists());
        assert!(store.read_lines().is_err());
    }

    #[test]
    fn test_mem_clone_shares_file() {
        let store = MemStore::new();
        let other = store.clone();
        store.append("shared\n").unwrap();
        assert!(other.exists());
        assert_eq!(other.raw().unwrap(), b"shared\n");
    }

    #[test]
    fn test_mem_truncate_simulates_torn_write() {
        let store = MemStore::new();
        store.append("complete line\n").unwrap();
        store.append("torn li").unwrap();
        store.truncate(b"complete line\ntorn".len());

        let lines: Vec<String> = store.read_lines().unwrap().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["complete line", "torn"]);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("queue.log"));
        assert!(!store.exists());

        store.append("a\n").unwrap();
        store.append("b\n").unwrap();
        let lines: Vec<String> = store.read_lines().unwrap().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["a", "b"]);

        store.overwrite("c\n").unwrap();
        let lines: Vec<String> = store.read_lines().unwrap().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["c"]);

        store.delete().unwrap();
        assert!(!store.exists());
        // Deleting again is fine
        store.delete().unwrap();
    }
}
