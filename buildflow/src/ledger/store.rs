//! Sharded in-memory ledger with NDJSON persistence.

use super::{LedgerEntry, INTERRUPTED_DETAIL};
use crate::core::StageStatus;
use crate::errors::LedgerError;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Slot {
    entry: LedgerEntry,
    /// Status written during the current invocation, if any.
    written: Option<StageStatus>,
}

/// Persistent map from stage id to its last recorded [`LedgerEntry`].
///
/// Writes for distinct stages proceed concurrently; writes for the same
/// stage are serialized by the owning shard. Within one invocation a stage
/// follows the lifecycle `Pending -> Running -> {Succeeded | Failed}` or
/// `Pending -> {Succeeded | Blocked | Failed}`, and each terminal status is
/// recorded at most once.
#[derive(Debug)]
pub struct RunLedger {
    path: Option<PathBuf>,
    slots: DashMap<String, Slot>,
    flush_lock: Mutex<()>,
}

impl RunLedger {
    /// Creates a ledger that is never persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            slots: DashMap::new(),
            flush_lock: Mutex::new(()),
        }
    }

    /// Opens the ledger at `path`.
    ///
    /// A missing file yields an empty ledger. Malformed lines are skipped,
    /// later records for a stage replace earlier ones, and entries left in
    /// `Running` by a crashed run are loaded as `Failed`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let ledger = Self {
            path: Some(path.clone()),
            slots: DashMap::new(),
            flush_lock: Mutex::new(()),
        };

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No ledger yet, starting empty");
                return Ok(ledger);
            }
            Err(source) => return Err(LedgerError::Io { path, source }),
        };

        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(line) {
                Ok(mut entry) => {
                    if entry.status == StageStatus::Running {
                        entry.status = StageStatus::Failed;
                        entry.error_detail = Some(INTERRUPTED_DETAIL.to_string());
                    }
                    ledger.slots.insert(
                        entry.stage_id.clone(),
                        Slot {
                            entry,
                            written: None,
                        },
                    );
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        line = index + 1,
                        error = %err,
                        "Skipping malformed ledger record"
                    );
                }
            }
        }

        info!(path = %path.display(), entries = ledger.slots.len(), "Ledger loaded");
        Ok(ledger)
    }

    /// Returns the backing file, if persisted.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Starts a new invocation, allowing every stage to be recorded again.
    pub fn begin_invocation(&self) {
        for mut slot in self.slots.iter_mut() {
            slot.written = None;
        }
    }

    /// Returns the last recorded entry for `stage_id`.
    #[must_use]
    pub fn get(&self, stage_id: &str) -> Option<LedgerEntry> {
        self.slots.get(stage_id).map(|slot| slot.entry.clone())
    }

    /// Records `entry` for `stage_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Conflict`] if the transition from the status
    /// recorded earlier in this invocation is not allowed, including a
    /// second terminal write.
    pub fn set(&self, stage_id: &str, mut entry: LedgerEntry) -> Result<(), LedgerError> {
        stage_id.clone_into(&mut entry.stage_id);
        let to = entry.status;

        match self.slots.entry(stage_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let from = occupied.get().written.unwrap_or(StageStatus::Pending);
                if !from.can_transition_to(to) {
                    return Err(LedgerError::Conflict {
                        stage_id: stage_id.to_string(),
                        from,
                        to,
                    });
                }
                occupied.insert(Slot {
                    entry,
                    written: Some(to),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if !StageStatus::Pending.can_transition_to(to) {
                    return Err(LedgerError::Conflict {
                        stage_id: stage_id.to_string(),
                        from: StageStatus::Pending,
                        to,
                    });
                }
                vacant.insert(Slot {
                    entry,
                    written: Some(to),
                });
            }
        }
        Ok(())
    }

    /// Returns all entries ordered by stage id.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> =
            self.slots.iter().map(|slot| slot.entry.clone()).collect();
        entries.sort_by(|a, b| a.stage_id.cmp(&b.stage_id));
        entries
    }

    /// Returns the number of recorded stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Persists the ledger.
    ///
    /// The records are written to a sibling temporary file which then
    /// replaces the ledger file, so readers never observe a partial ledger.
    /// Does nothing for in-memory ledgers.
    pub async fn flush(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.flush_lock.lock().await;

        let mut buf = String::new();
        for entry in self.entries() {
            buf.push_str(&serde_json::to_string(&entry)?);
            buf.push('\n');
        }

        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let tmp = temp_path(path);
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(buf.as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;

        debug!(path = %path.display(), entries = self.slots.len(), "Ledger flushed");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
