use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use super::KeyValueStore;

const SESSION_EXTENSION: &str = "json";
const SESSION_TMP_EXTENSION: &str = "json.tmp";
const SESSION_PREFIX: &str = "session-";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionRecord {
    session_id: String,
    touched_at: i64,
    entries: BTreeMap<String, String>,
}

/// One JSON file per shell session, dropped on `end()` or once older than the retention.
#[derive(Debug)]
pub struct SessionStore {
    session_id: String,
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl SessionStore {
    /// Opens the session identified by `QUOTETUI_SESSION`, or by the launching shell.
    pub fn open_current(dir: &Path, retention: Option<Duration>) -> Result<Self> {
        Self::open(dir, &current_session_id(), retention)
    }

    pub fn open(dir: &Path, session_id: &str, retention: Option<Duration>) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating session dir {}", dir.display()))?;
        let path = dir.join(format!(
            "{SESSION_PREFIX}{}.{SESSION_EXTENSION}",
            sanitize_id(session_id)
        ));
        let entries = match read_record(&path) {
            Ok(Some(record)) if is_expired(record.touched_at, retention) => {
                tracing::info!(session_id, "session expired, starting fresh");
                remove_path(&path)?;
                BTreeMap::new()
            }
            Ok(Some(record)) => record.entries,
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                tracing::warn!(?err, "discarding unreadable session file {}", path.display());
                BTreeMap::new()
            }
        };
        Ok(Self {
            session_id: session_id.to_string(),
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ends the session: every entry is dropped and the backing file removed.
    pub fn end(&self) -> Result<()> {
        self.entries.lock().clear();
        remove_path(&self.path)
    }

    /// Removes session files of any session untouched for longer than `retention`.
    pub fn purge_stale(dir: &Path, retention: Option<Duration>) -> Result<usize> {
        let Some(retention) = retention else {
            return Ok(0);
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading session dir {}", dir.display()))
            }
        };

        let mut purged = 0;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(?err, "skipping unreadable session entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(SESSION_EXTENSION)
            {
                continue;
            }
            let stale = match read_record(&path) {
                Ok(Some(record)) => is_expired(record.touched_at, Some(retention)),
                Ok(None) => false,
                Err(_) => true,
            };
            if stale {
                remove_path(&path)?;
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!(purged, "purged stale session files");
        }
        Ok(purged)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            return remove_path(&self.path);
        }
        let record = SessionRecord {
            session_id: self.session_id.clone(),
            touched_at: OffsetDateTime::now_utc().unix_timestamp(),
            entries: entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&record).context("serialising session record")?;
        let tmp_path = self.path.with_extension(SESSION_TMP_EXTENSION);
        fs::write(&tmp_path, &json)
            .with_context(|| format!("writing temporary session file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("atomically persisting session {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for SessionStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }
}

pub fn current_session_id() -> String {
    if let Ok(id) = env::var("QUOTETUI_SESSION") {
        if !id.trim().is_empty() {
            return id;
        }
    }
    launching_process_id().to_string()
}

#[cfg(unix)]
fn launching_process_id() -> u32 {
    std::os::unix::process::parent_id()
}

#[cfg(not(unix))]
fn launching_process_id() -> u32 {
    std::process::id()
}

fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn is_expired(touched_at: i64, retention: Option<Duration>) -> bool {
    let Some(retention) = retention else {
        return false;
    };
    let touched = OffsetDateTime::from_unix_timestamp(touched_at)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    OffsetDateTime::now_utc() - touched > retention
}

fn read_record(path: &Path) -> Result<Option<SessionRecord>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("reading session file {}", path.display()))
        }
    };
    let record = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing session file {}", path.display()))?;
    Ok(Some(record))
}

fn remove_path(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing session file {}", path.display())),
    }
}
