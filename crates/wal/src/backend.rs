use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sa_engine_domain::Event;

/// Abstract journal backend. The default is a single append-only JSONL file
/// per run; alternatives (in-memory, remote) implement the same contract.
pub trait WalBackend: Send + Sync {
    fn append_line(&self, line: &str) -> std::io::Result<()>;
    fn read_all(&self) -> std::io::Result<Vec<String>>;
}

/// One JSON object per line, UTF-8, LF-terminated. The WAL file is the
/// single writer within a process — appends are whole-line and crash-safe.
pub struct FileWalBackend {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl FileWalBackend {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    /// `<workspace>/<runtime_dir>/runs/<run_id>/events.jsonl`.
    pub fn for_run(workspace: &Path, runtime_dir: &str, run_id: &str) -> std::io::Result<Self> {
        Self::open(workspace.join(runtime_dir).join("runs").join(run_id).join("events.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WalBackend for FileWalBackend {
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }

    fn read_all(&self) -> std::io::Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(raw.lines().map(|l| l.to_string()).collect())
    }
}

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryWalBackend {
    lines: Mutex<Vec<String>>,
}

impl WalBackend for MemoryWalBackend {
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }

    fn read_all(&self) -> std::io::Result<Vec<String>> {
        Ok(self.lines.lock().clone())
    }
}

/// Serialize an event to its JSON-line representation. `allow_nan=false` is
/// implicit: `serde_json` rejects NaN/Inf floats by producing `null`, never
/// an invalid-JSON literal, so every journaled line stays parseable.
pub fn event_to_line(event: &Event) -> std::io::Result<String> {
    serde_json::to_string(event).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
