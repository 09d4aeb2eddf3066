//! Per-invocation protocol transcripts.
//!
//! Diagnostics go through the `log` facade everywhere. In addition, each
//! agent invocation can write a raw transcript of its arguments, stdout and
//! stderr to `{log_dir}/{id}.log`, which is what you want when debugging a
//! protocol mismatch.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only transcript file.
///
/// Cloning shares the same file. A disabled transcript swallows every line.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    file: Arc<Mutex<Option<File>>>,
}

impl Transcript {
    /// A transcript that writes nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open (or create) `{log_dir}/{id}.log`.
    ///
    /// Any failure to create the directory or file yields a disabled
    /// transcript; a missing log must never fail a turn.
    pub fn open(log_dir: Option<&Path>, id: &str) -> Self {
        let file = log_dir.and_then(|dir| {
            if let Err(err) = std::fs::create_dir_all(dir) {
                log::warn!("Cannot create log dir {}: {}", dir.display(), err);
                return None;
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(format!("{id}.log")))
                .map_err(|err| log::warn!("Cannot open transcript {id}: {err}"))
                .ok()
        });
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Write a timestamped `[ts] DIRECTION: data` line.
    pub fn line(&self, direction: &str, data: &str) {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref mut file) = *guard {
            let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let _ = writeln!(file, "[{ts}] {direction}: {data}");
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_file() {
        let dir = tempdir().unwrap();
        let transcript = Transcript::open(Some(dir.path()), "turn-1");
        assert!(transcript.is_enabled());
        assert!(dir.path().join("turn-1.log").exists());
    }

    #[test]
    fn open_without_dir_is_disabled() {
        let transcript = Transcript::open(None, "turn-1");
        assert!(!transcript.is_enabled());
        // Should not panic
        transcript.line("STDOUT", "ignored");
    }

    #[test]
    fn line_writes_timestamped_entry() {
        let dir = tempdir().unwrap();
        let transcript = Transcript::open(Some(&dir.path().join("nested")), "turn-2");
        transcript.line("STDERR", "warning: slow disk");

        let contents = std::fs::read_to_string(dir.path().join("nested/turn-2.log")).unwrap();
        assert!(contents.starts_with('['));
        assert!(contents.contains("Z] STDERR: warning: slow disk"));
    }

    #[test]
    fn clones_share_the_file() {
        let dir = tempdir().unwrap();
        let a = Transcript::open(Some(dir.path()), "shared");
        let b = a.clone();
        a.line("ARGS", "-p");
        b.line("STDOUT", "{}");

        let contents = std::fs::read_to_string(dir.path().join("shared.log")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
