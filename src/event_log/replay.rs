//! Event Log Replay
//!
//! Lazy, restartable iteration over the committed events of one identity.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Take};
use std::path::PathBuf;

use crate::error::{BridgeError, Result};
use crate::event_log::event::Event;

/// Iterator over the events committed when the replay was opened.
///
/// The replay is bounded to the log length observed at open time, so a
/// concurrent writer growing the tip does not extend it. A final line
/// missing its newline terminator is a write still in flight and is
/// never yielded.
pub struct Replay {
    path: PathBuf,
    committed_len: u64,
    reader: Option<BufReader<Take<File>>>,
    line_num: usize,
    done: bool,
}

impl Replay {
    pub(crate) fn open(path: PathBuf) -> Result<Self> {
        let committed_len = std::fs::metadata(&path)
            .map_err(|e| BridgeError::StorageError(format!("Failed to stat event log: {}", e)))?
            .len();

        Ok(Self {
            path,
            committed_len,
            reader: None,
            line_num: 0,
            done: false,
        })
    }

    /// Number of bytes this replay covers
    pub fn committed_len(&self) -> u64 {
        self.committed_len
    }

    /// Rewind to the first event, keeping the same committed bound
    pub fn restart(&mut self) {
        self.reader = None;
        self.line_num = 0;
        self.done = false;
    }

    fn reader(&mut self) -> Result<&mut BufReader<Take<File>>> {
        if self.reader.is_none() {
            let file = File::open(&self.path)
                .map_err(|e| BridgeError::StorageError(format!("Failed to open event log: {}", e)))?;
            self.reader = Some(BufReader::new(file.take(self.committed_len)));
        }
        // Populated just above
        self.reader
            .as_mut()
            .ok_or_else(|| BridgeError::StorageError("Event log reader unavailable".to_string()))
    }

    fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = self
                .reader()?
                .read_until(b'\n', &mut buf)
                .map_err(|e| BridgeError::StorageError(format!("Failed to read event log: {}", e)))?;
            self.line_num += 1;

            if read == 0 || buf.last() != Some(&b'\n') {
                return Ok(None);
            }
            if buf.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Ok(Some(buf));
        }
    }
}

impl Iterator for Replay {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let line = match self.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        Some(serde_json::from_slice::<Event>(&line).map_err(|e| {
            BridgeError::SerializationError(format!(
                "Failed to parse event at line {}: {}",
                self.line_num, e
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_events(path: &PathBuf, events: &[Event]) {
        let mut file = File::create(path).unwrap();
        for event in events {
            writeln!(file, "{}", serde_json::to_string(event).unwrap()).unwrap();
        }
    }

    #[test]
    fn test_replay_in_order_and_restart() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("log.jsonl");

        let icp = Event::inception(json!({}));
        let ixn = Event::interaction(&icp, json!({"cycle": 1}));
        write_events(&path, &[icp.clone(), ixn.clone()]);

        let mut replay = Replay::open(path).unwrap();
        let seqs: Vec<u64> = replay.by_ref().map(|e| e.unwrap().sequence).collect();
        assert_eq!(seqs, vec![0, 1]);

        replay.restart();
        let again: Vec<Event> = replay.map(|e| e.unwrap()).collect();
        assert_eq!(again, vec![icp, ixn]);
    }

    #[test]
    fn test_torn_tail_is_skipped() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("log.jsonl");

        let icp = Event::inception(json!({}));
        write_events(&path, &[icp]);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"identity\":\"E12").unwrap();

        let events: Vec<_> = Replay::open(path).unwrap().collect();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
    }

    #[test]
    fn test_bounded_to_open_time_length() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("log.jsonl");

        let icp = Event::inception(json!({}));
        write_events(&path, &[icp.clone()]);
        let replay = Replay::open(path.clone()).unwrap();

        let ixn = Event::interaction(&icp, json!({}));
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", serde_json::to_string(&ixn).unwrap()).unwrap();

        assert_eq!(replay.count(), 1);
    }
}
