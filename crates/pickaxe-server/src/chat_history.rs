//! Append-only chat log (§6, SPEC_FULL §1 supplement): one line per message,
//! `username:message`, inbound newlines replaced with spaces on write.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub struct ChatHistory {
    file: File,
}

impl ChatHistory {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, username: &str, message: &str) -> io::Result<()> {
        let sanitized = message.replace(['\n', '\r'], " ");
        writeln!(self.file, "{username}:{sanitized}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_sanitized_line_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_history.txt");
        let mut history = ChatHistory::open(&path).unwrap();
        history.append("alice", "hello\nworld").unwrap();
        history.append("bob", "hi").unwrap();
        drop(history);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "alice:hello world\nbob:hi\n");
    }

    #[test]
    fn reopening_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_history.txt");
        ChatHistory::open(&path).unwrap().append("alice", "first").unwrap();
        ChatHistory::open(&path).unwrap().append("alice", "second").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "alice:first\nalice:second\n");
    }
}
