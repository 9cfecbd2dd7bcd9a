//! Console log tailing.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Upper bound on lines returned by one tail request.
pub const MAX_TAIL_LINES: usize = 10_000;

/// Longest line kept; the remainder of a longer line is dropped.
pub const MAX_LINE_BYTES: usize = 16 * 1024;

/// Last `n` lines of a log file, joined with `\n`.
///
/// Serial consoles emit arbitrary bytes, so lines are decoded lossily. A
/// missing file is `ArtifactMissing`.
pub async fn tail(path: &Path, n: usize) -> Result<String> {
    let path: PathBuf = path.to_path_buf();
    let n = n.min(MAX_TAIL_LINES);
    tokio::task::spawn_blocking(move || read_last_n_lines(&path, n))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("log tail task failed: {e}"))))?
}

fn read_last_n_lines(path: &Path, n: usize) -> Result<String> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::artifact_missing("log", path));
        }
        Err(e) => return Err(e.into()),
    };
    if n == 0 {
        return Ok(String::new());
    }

    // Keep only the last N lines, each at most MAX_LINE_BYTES, in memory.
    let mut ring: VecDeque<String> = VecDeque::with_capacity(n + 1);
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            break;
        }
        let (segment, ends_line) = match chunk.iter().position(|b| *b == b'\n') {
            Some(at) => (&chunk[..at], true),
            None => (chunk, false),
        };
        let room = MAX_LINE_BYTES.saturating_sub(line.len());
        line.extend_from_slice(&segment[..segment.len().min(room)]);
        let consumed = segment.len() + usize::from(ends_line);
        reader.consume(consumed);

        if ends_line {
            push_line(&mut ring, &mut line, n);
        }
    }
    if !line.is_empty() {
        push_line(&mut ring, &mut line, n);
    }

    Ok(ring.into_iter().collect::<Vec<_>>().join("\n"))
}

fn push_line(ring: &mut VecDeque<String>, line: &mut Vec<u8>, n: usize) {
    while line.last() == Some(&b'\r') {
        line.pop();
    }
    if ring.len() == n {
        ring.pop_front();
    }
    ring.push_back(String::from_utf8_lossy(line).into_owned());
    line.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tail_returns_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vps_x.log");
        let text: String = (1..=50).map(|i| format!("line {i}\r\n")).collect();
        std::fs::write(&path, text).unwrap();

        assert_eq!(tail(&path, 3).await.unwrap(), "line 48\nline 49\nline 50");
        assert_eq!(tail(&path, 0).await.unwrap(), "");
        assert_eq!(tail(&path, 500).await.unwrap().lines().count(), 50);
    }

    #[tokio::test]
    async fn test_tail_tolerates_binary_noise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vps_x.log");
        std::fs::write(&path, b"boot\n\xff\xfe garbage\nlogin: ").unwrap();
        let out = tail(&path, 2).await.unwrap();
        assert!(out.ends_with("login: "));
        assert!(out.contains("garbage"));
    }

    #[tokio::test]
    async fn test_tail_caps_unterminated_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vps_x.log");
        let mut noise = vec![b'#'; MAX_LINE_BYTES * 4];
        noise.extend_from_slice(b"\nlogin: ");
        std::fs::write(&path, noise).unwrap();

        let out = tail(&path, 2).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert_eq!(lines[1], "login: ");
    }

    #[tokio::test]
    async fn test_tail_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let err = tail(&dir.path().join("absent.log"), 10).await.unwrap_err();
        assert!(matches!(err, Error::ArtifactMissing { artifact: "log", .. }));
    }
}
