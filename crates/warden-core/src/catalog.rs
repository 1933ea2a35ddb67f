use crate::crypto::Direction;
use crate::engine::{normalize_lexically, Engine, TransformReport};
use crate::error::{Result, WardenError};
use crate::persist::{read_catalog, write_catalog, SaveWorker};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Absolute path string registered for bulk encryption.
pub type ProtectedPath = String;

/// The form a path is stored under: symlinks and `..` resolved, so `d`, `d/`
/// and `d/../d` all name the same member.
pub fn key_for(path: &str) -> ProtectedPath {
    let raw = Path::new(path);
    let resolved = fs::canonicalize(raw)
        .or_else(|_| normalize_lexically(raw))
        .unwrap_or_else(|_| raw.to_path_buf());
    resolved.display().to_string()
}

#[derive(Debug)]
pub struct BulkEntry {
    pub path: ProtectedPath,
    pub outcome: Result<TransformReport>,
}

impl BulkEntry {
    pub fn is_clean(&self) -> bool {
        matches!(&self.outcome, Ok(report) if report.is_clean())
    }
}

/// Per-path outcomes of an encrypt-all / decrypt-all pass.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub entries: Vec<BulkEntry>,
}

impl BulkReport {
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(BulkEntry::is_clean)
    }

    /// True when there was work and none of it succeeded.
    pub fn all_failed(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.outcome.is_err())
    }

    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        for entry in &self.entries {
            match &entry.outcome {
                Err(err) => out.push(err.to_string()),
                Ok(report) => {
                    out.extend(report.failures.iter().map(|f| f.error.to_string()));
                    out.extend(
                        report
                            .skipped
                            .iter()
                            .map(|p| WardenError::SecurityViolation(p.clone()).to_string()),
                    );
                }
            }
        }
        out
    }
}

/// The protected-path set plus where it is persisted.
pub struct Catalog {
    paths: BTreeSet<ProtectedPath>,
    location: PathBuf,
    saver: Option<SaveWorker>,
}

impl Catalog {
    /// Loads the persisted catalog. An unreadable or partial file is not an
    /// error: the catalog starts empty and a warning is logged.
    pub fn load(location: impl Into<PathBuf>, queue_depth: usize) -> Self {
        let location = location.into();
        let paths = if location.exists() {
            match read_catalog(&location) {
                Ok(paths) => paths.into_iter().collect(),
                Err(err) => {
                    warn!(
                        path = %location.display(),
                        error = %err,
                        "could not load protected paths; using an empty catalog"
                    );
                    BTreeSet::new()
                }
            }
        } else {
            BTreeSet::new()
        };
        let saver = match SaveWorker::spawn(location.clone(), queue_depth) {
            Ok(worker) => Some(worker),
            Err(err) => {
                warn!(error = %err, "cannot start catalog save worker; saving synchronously");
                None
            }
        };
        info!(path = %location.display(), entries = paths.len(), "catalog loaded");
        Self {
            paths,
            location,
            saver,
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path) || self.paths.contains(&key_for(path))
    }

    pub fn list(&self) -> Vec<ProtectedPath> {
        self.paths.iter().cloned().collect()
    }

    /// Registers an existing path. Returns `false` when it was already present.
    pub fn add(&mut self, path: &str) -> Result<bool> {
        if !Path::new(path).exists() {
            return Err(WardenError::NotFound(PathBuf::from(path)));
        }
        let inserted = self.paths.insert(key_for(path));
        if inserted {
            self.schedule_save();
        }
        Ok(inserted)
    }

    /// Returns `false` when the path was not a member.
    pub fn remove(&mut self, path: &str) -> bool {
        let removed = self.paths.remove(path) || self.paths.remove(&key_for(path));
        if removed {
            self.schedule_save();
        }
        removed
    }

    /// Distinct on-disk targets of a bulk pass. Entries that resolve to the
    /// same place collapse, and an entry inside another entry's directory is
    /// dropped so no file is transformed twice.
    pub fn targets(&self) -> Vec<PathBuf> {
        let mut resolved: Vec<PathBuf> = self
            .paths
            .iter()
            .map(|p| PathBuf::from(key_for(p)))
            .collect();
        resolved.sort();
        let mut kept: Vec<PathBuf> = Vec::with_capacity(resolved.len());
        for path in resolved {
            if kept.iter().any(|k| path.starts_with(k)) {
                continue;
            }
            kept.push(path);
        }
        kept
    }

    pub fn encrypt_all(&self, engine: &Engine, password: &str) -> Result<BulkReport> {
        self.apply_all(engine, Direction::Encrypt, password)
    }

    pub fn decrypt_all(&self, engine: &Engine, password: &str) -> Result<BulkReport> {
        self.apply_all(engine, Direction::Decrypt, password)
    }

    fn apply_all(&self, engine: &Engine, direction: Direction, password: &str) -> Result<BulkReport> {
        let mut report = BulkReport::default();
        for target in self.targets() {
            let outcome = engine.transform_path(&target, direction, password);
            match outcome {
                Err(err) if err.is_fatal() => return Err(err),
                Err(ref err) => warn!(path = %target.display(), error = %err, "protected path failed"),
                Ok(_) => {}
            }
            report.entries.push(BulkEntry {
                path: target.display().to_string(),
                outcome,
            });
        }
        Ok(report)
    }

    /// Final synchronous save. Observes every mutation made before the call.
    pub fn flush(&mut self) -> io::Result<()> {
        let snapshot = self.list();
        match self.saver.take() {
            Some(worker) => worker.finish(snapshot)?,
            None => write_catalog(&self.location, &snapshot)?,
        }
        info!(path = %self.location.display(), entries = self.paths.len(), "catalog flushed");
        Ok(())
    }

    fn schedule_save(&self) {
        let snapshot = self.list();
        match &self.saver {
            Some(worker) => worker.schedule(snapshot),
            None => {
                if let Err(err) = write_catalog(&self.location, &snapshot) {
                    warn!(path = %self.location.display(), error = %err, "catalog save failed");
                }
            }
        }
    }
}
