//! Log tailer: incremental reader for a rotated remote log directory.
//!
//! Each poll picks the newest `.log`/`.txt` file in the directory, reads it
//! whole, and returns only the lines appended since the previous poll.
//!
//! - The first poll of a file establishes a baseline and returns nothing,
//!   so history is never replayed on startup or after rotation.
//! - If the remembered last line can no longer be found (truncation, front
//!   trimming) every line is returned: duplicates are preferred over loss.
//! - The position is advanced before the caller sees the lines, so a failed
//!   relay never causes the same lines to be re-read.

use palwatch_core::{RemoteEntry, RemoteFs, RemoteResult};
use tracing::{debug, info};

use crate::chat::{ChatBatch, ChatFilter};

/// File name suffixes treated as logs.
pub const LOG_EXTENSIONS: [&str; 2] = [".log", ".txt"];

/// Identity of the file being tailed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId {
    pub path: String,
}

impl FileId {
    pub fn new(directory: &str, name: &str) -> Self {
        let dir = directory.trim_end_matches('/');
        let path = if dir.is_empty() {
            name.to_string()
        } else {
            format!("{dir}/{name}")
        };
        Self { path }
    }
}

/// Tail position for one server's log directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailState {
    pub current_file: Option<FileId>,
    /// Last fully processed line; `None` means no line seen yet.
    pub last_line: Option<String>,
    pub baseline_established: bool,
    /// Number of lines the file had at the previous poll.
    line_count: usize,
}

impl TailState {
    fn switch_to(&mut self, file: FileId) {
        self.current_file = Some(file);
        self.last_line = None;
        self.baseline_established = false;
        self.line_count = 0;
    }

    /// Record `lines` as the current file content and return the new ones.
    pub fn advance<S: AsRef<str>>(&mut self, lines: &[S]) -> Vec<String> {
        if !self.baseline_established {
            self.last_line = lines.last().map(|l| l.as_ref().to_string());
            self.line_count = lines.len();
            self.baseline_established = true;
            return Vec::new();
        }

        let start = self.resume_index(lines);
        let fresh = lines[start..]
            .iter()
            .map(|l| l.as_ref().to_string())
            .collect();

        if let Some(last) = lines.last() {
            self.last_line = Some(last.as_ref().to_string());
        }
        self.line_count = lines.len();
        fresh
    }

    /// Index of the first line after `last_line`.
    fn resume_index<S: AsRef<str>>(&self, lines: &[S]) -> usize {
        let Some(last) = self.last_line.as_deref() else {
            return 0;
        };

        // Append-only fast path: the old last line is still where we left it.
        if self.line_count > 0
            && self.line_count <= lines.len()
            && lines[self.line_count - 1].as_ref() == last
        {
            return self.line_count;
        }

        match lines.iter().rposition(|l| l.as_ref() == last) {
            Some(i) => i + 1,
            None => 0,
        }
    }
}

/// Newest regular file with a log extension.
pub fn newest_log(entries: &[RemoteEntry]) -> Option<&RemoteEntry> {
    entries
        .iter()
        .filter(|e| !e.is_dir && LOG_EXTENSIONS.iter().any(|ext| e.name.ends_with(ext)))
        .max_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.name.cmp(&b.name)))
}

/// Tails one remote log directory for one server.
#[derive(Debug)]
pub struct LogTailer {
    server: String,
    directory: String,
    state: TailState,
}

impl LogTailer {
    pub fn new(server: impl Into<String>, directory: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            directory: directory.into(),
            state: TailState::default(),
        }
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn state(&self) -> &TailState {
        &self.state
    }

    /// Lines appended to the newest log file since the previous poll.
    pub async fn poll(&mut self, fs: &dyn RemoteFs) -> RemoteResult<Vec<String>> {
        let entries = fs.list_dir(&self.directory).await?;
        let Some(newest) = newest_log(&entries) else {
            debug!(server = %self.server, dir = %self.directory, "no log file found");
            return Ok(Vec::new());
        };

        let file = FileId::new(&self.directory, &newest.name);
        if self.state.current_file.as_ref() != Some(&file) {
            if self.state.current_file.is_some() {
                info!(server = %self.server, file = %file.path, "log rotated, establishing new baseline");
            }
            self.state.switch_to(file.clone());
        }

        let bytes = fs.read_file(&file.path).await?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();

        let baseline = !self.state.baseline_established;
        let fresh = self.state.advance(&lines);
        if baseline {
            debug!(server = %self.server, file = %file.path, lines = lines.len(), "baseline established");
        } else if !fresh.is_empty() {
            debug!(server = %self.server, new = fresh.len(), "new log lines");
        }
        Ok(fresh)
    }

    /// Poll and keep only relayable chat and link requests.
    pub async fn poll_chat(
        &mut self,
        fs: &dyn RemoteFs,
        filter: &ChatFilter,
    ) -> RemoteResult<ChatBatch> {
        let lines = self.poll(fs).await?;
        Ok(filter.extract(&lines))
    }
}
