//! On-disk form of the catalog and the worker that writes it.
//!
//! Saves are queued through a bounded channel and written by one thread, so
//! writes land in the order mutations happened. `finish` enqueues the final
//! snapshot behind everything already queued and blocks until it is on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

enum SaveRequest {
    Save(Vec<String>),
    Flush {
        snapshot: Vec<String>,
        ack: SyncSender<io::Result<()>>,
    },
}

pub struct SaveWorker {
    tx: SyncSender<SaveRequest>,
    handle: JoinHandle<()>,
    location: PathBuf,
}

impl SaveWorker {
    pub fn spawn(location: PathBuf, queue_depth: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(queue_depth.max(1));
        let worker_location = location.clone();
        let handle = thread::Builder::new()
            .name("catalog-save".into())
            .spawn(move || run(worker_location, rx))?;
        Ok(Self {
            tx,
            handle,
            location,
        })
    }

    /// Queues a snapshot. Blocks only while the queue is full.
    pub fn schedule(&self, snapshot: Vec<String>) {
        if self.tx.send(SaveRequest::Save(snapshot)).is_err() {
            warn!(path = %self.location.display(), "catalog save worker is gone; save dropped");
        }
    }

    /// Writes `snapshot` after every queued save and stops the worker.
    pub fn finish(self, snapshot: Vec<String>) -> io::Result<()> {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        let sent = self.tx.send(SaveRequest::Flush {
            snapshot: snapshot.clone(),
            ack: ack_tx,
        });
        let result = match sent {
            Ok(()) => ack_rx
                .recv()
                .unwrap_or_else(|_| write_catalog(&self.location, &snapshot)),
            Err(_) => write_catalog(&self.location, &snapshot),
        };
        drop(self.tx);
        if self.handle.join().is_err() {
            warn!("catalog save worker panicked");
        }
        result
    }
}

fn run(location: PathBuf, rx: Receiver<SaveRequest>) {
    let mut next = rx.recv();
    while let Ok(request) = next {
        match request {
            SaveRequest::Save(snapshot) => {
                // A newer request supersedes this snapshot.
                match rx.try_recv() {
                    Ok(later) => {
                        next = Ok(later);
                        continue;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
                }
                if let Err(err) = write_catalog(&location, &snapshot) {
                    warn!(path = %location.display(), error = %err, "catalog save failed");
                }
            }
            SaveRequest::Flush { snapshot, ack } => {
                let result = write_catalog(&location, &snapshot);
                let _ = ack.send(result);
                return;
            }
        }
        next = rx.recv();
    }
}

/// Writes the path list as a flat JSON array via a temp file and rename.
pub fn write_catalog(location: &Path, paths: &[String]) -> io::Result<()> {
    let parent = match location.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, paths)?;
    tmp.as_file().sync_all()?;
    tmp.persist(location).map_err(|e| e.error)?;
    debug!(path = %location.display(), entries = paths.len(), "catalog saved");
    Ok(())
}

/// Reads the persisted path list. Non-string entries are dropped.
pub fn read_catalog(location: &Path) -> anyhow::Result<Vec<String>> {
    let data = fs::read_to_string(location)?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&data)?;
    Ok(values
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect())
}
