use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::sync::SyncOutcome;

const MAX_ROTATIONS: usize = 5;
const CHAIN_START: &str = "CHAIN_START";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub data: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
}

/// Append-only JSON-lines record of applied index changes, hash-chained so an
/// edited line breaks every hash after it.
pub struct SyncJournal {
    path: PathBuf,
    inner: Mutex<ChainState>,
    max_bytes: u64,
}

#[derive(Debug)]
struct ChainState {
    last_seq: u64,
    last_hash: String,
}

impl SyncJournal {
    pub fn open<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let (last_seq, last_hash) = Self::load_state(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(ChainState {
                last_seq,
                last_hash,
            }),
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scans the file for the chain tip. An unparsable final line is a torn
    /// write from an interrupted append and is cut off; anything earlier is
    /// corruption and fails the open.
    fn load_state(path: &Path) -> Result<(u64, String)> {
        if !path.exists() {
            return Ok((0, CHAIN_START.to_string()));
        }
        let raw = fs::read(path)?;
        let lines: Vec<&[u8]> = raw.split_inclusive(|b| *b == b'\n').collect();
        let mut last_seq = 0;
        let mut last_hash = CHAIN_START.to_string();
        let mut offset = 0;
        let mut torn_at = None;
        for (idx, line) in lines.iter().enumerate() {
            let start = offset;
            offset += line.len();
            if is_blank(line) {
                continue;
            }
            match serde_json::from_slice::<JournalEntry>(line) {
                Ok(entry) => {
                    last_seq = entry.seq;
                    last_hash = entry.hash;
                }
                Err(err) if lines[idx + 1..].iter().all(|l| is_blank(l)) => {
                    warn!(
                        path = %path.display(),
                        line = idx + 1,
                        error = %err,
                        "dropping torn journal line"
                    );
                    torn_at = Some(start);
                    break;
                }
                Err(err) => {
                    return Err(anyhow!("journal line {} is corrupt: {err}", idx + 1));
                }
            }
        }
        if let Some(len) = torn_at {
            OpenOptions::new().write(true).open(path)?.set_len(len as u64)?;
        } else if raw.last().is_some_and(|b| *b != b'\n') {
            // complete entry, missing only its newline
            OpenOptions::new().append(true).open(path)?.write_all(b"\n")?;
        }
        Ok((last_seq, last_hash))
    }

    fn compute_hash(entry_without_hash: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(entry_without_hash.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn append(&self, kind: &str, data: serde_json::Value) -> Result<JournalEntry> {
        let mut state = self.inner.lock();
        self.rotate_if_needed(&mut state)?;
        let seq = state.last_seq + 1;
        let mut value = serde_json::json!({
            "seq": seq,
            "timestamp": Utc::now(),
            "kind": kind,
            "data": data,
            "prev_hash": state.last_hash,
        });
        let hash = Self::compute_hash(&value);
        value["hash"] = serde_json::Value::String(hash.clone());
        let entry: JournalEntry = serde_json::from_value(value)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        file.flush()?;

        state.last_seq = seq;
        state.last_hash = hash;
        Ok(entry)
    }

    /// Journals an applied change. No-ops are not recorded.
    pub fn record(&self, outcome: &SyncOutcome) -> Result<Option<JournalEntry>> {
        let SyncOutcome::Applied {
            user_id,
            removed,
            inserted,
            commit_time,
        } = outcome
        else {
            return Ok(None);
        };
        let kind = match (removed, inserted) {
            (Some(_), Some(_)) => "INDEX_SWAPPED",
            (None, Some(_)) => "INDEX_INSERTED",
            (Some(_), None) => "INDEX_REMOVED",
            (None, None) => return Ok(None),
        };
        let data = serde_json::json!({
            "user_id": user_id,
            "removed": removed,
            "inserted": inserted,
            "commit_time": commit_time,
        });
        self.append(kind, data).map(Some)
    }

    fn rotate_if_needed(&self, state: &mut ChainState) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = self.path_with_suffix(i)?;
            if rotated.exists() {
                if i == MAX_ROTATIONS {
                    fs::remove_file(&rotated)?;
                } else {
                    fs::rename(&rotated, self.path_with_suffix(i + 1)?)?;
                }
            }
        }
        fs::rename(&self.path, self.path_with_suffix(1)?)?;
        // new file, new chain; seq stays monotonic
        state.last_hash = CHAIN_START.to_string();
        Ok(())
    }

    /// Most recent first.
    pub fn read_recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)?;
            if since.is_some_and(|ts| entry.timestamp < ts) {
                continue;
            }
            entries.push(entry);
        }
        entries.reverse();
        if let Some(lim) = limit {
            entries.truncate(lim);
        }
        Ok(entries)
    }

    /// Recomputes every hash in the active file. Returns the number of entries.
    pub fn verify_chain(&self) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut expected_prev = CHAIN_START.to_string();
        let mut count = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut value: serde_json::Value = serde_json::from_str(&line)?;
            let stored = value
                .as_object_mut()
                .and_then(|obj| obj.remove("hash"))
                .and_then(|h| h.as_str().map(str::to_string))
                .ok_or_else(|| anyhow!("journal line {} has no hash", count + 1))?;
            let prev = value["prev_hash"].as_str().unwrap_or_default();
            if prev != expected_prev {
                return Err(anyhow!("journal chain broken at line {}", count + 1));
            }
            if Self::compute_hash(&value) != stored {
                return Err(anyhow!("journal hash mismatch at line {}", count + 1));
            }
            expected_prev = stored;
            count += 1;
        }
        Ok(count)
    }

    fn path_with_suffix(&self, index: usize) -> Result<PathBuf> {
        let filename = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("journal path has no file name"))?
            .to_string_lossy()
            .to_string();
        Ok(self.path.with_file_name(format!("{filename}.{index}")))
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}
