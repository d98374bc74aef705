//! Compaction: reclaims tombstoned slots and keeps the WAL bounded.
//!
//! A pass rebuilds the store without gaps, rebuilds the active index over the
//! renumbered slots (training is kept), rebuilds the metadata index and remaps
//! point IDs. It is logged as a single [`WalOp::Compact`] so replay renumbers
//! exactly as the live pass did. Databases with a snapshot path then checkpoint
//! (save + WAL truncate).
//!
//! The background worker wakes every `compaction_interval_secs`, or early when
//! a delete pushes the deleted ratio over its threshold.

use crate::config;
use crate::error::Result;
use crate::storage::database::{Database, Outcome, State};
use crate::storage::wal::WalOp;
use crate::storage::{MetadataIndex, WriteAheadLog};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

impl State {
    /// Rebuilds everything over the live slots. Returns `remap[old] = Some(new)`.
    pub(crate) fn compact(&mut self) -> Vec<Option<u32>> {
        let (store, remap) = self.store.compacted();
        let mut index = self.index.clone();
        index.rebuild(&store);
        let metadata_index = MetadataIndex::build(&store);
        self.point_ids.remap(&remap);
        self.store = store;
        self.index = index;
        self.metadata_index = metadata_index;
        remap
    }
}

#[derive(Debug, Default)]
struct SignalState {
    stop: bool,
    /// A wake-up requested while the worker was busy.
    pending: bool,
}

#[derive(Debug, Default)]
struct Signal {
    state: Mutex<SignalState>,
    wake: Condvar,
}

/// Handle to the background compaction thread.
#[derive(Debug)]
pub(crate) struct CompactionWorker {
    signal: Arc<Signal>,
    handle: JoinHandle<()>,
}

impl Database {
    /// Compacts synchronously. Returns `remap[old_index] = Some(new_index)` for
    /// every surviving record; indices held across this call are stale.
    ///
    /// An error means nothing changed. Once the pass is logged it always
    /// returns the remap, even if the checkpoint that follows fails.
    pub fn compact(&self) -> Result<Vec<Option<usize>>> {
        let start = Instant::now();
        let before = self.count();
        let remap = match self.mutate(|_| Ok(WalOp::Compact))? {
            Outcome::Compacted(remap) => remap,
            _ => Vec::new(),
        };
        // The Compact record is already durable, so a failed checkpoint only
        // leaves it for the next replay; the caller still needs the remap.
        if self.path().is_some() && self.wal.is_some() {
            if let Err(e) = self.save(None) {
                tracing::warn!(error = %e, "checkpoint after compaction failed, WAL kept");
            }
        }
        let live = remap.iter().filter(|r| r.is_some()).count();
        tracing::info!(
            reclaimed = before - live,
            live,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "compaction finished"
        );
        Ok(remap
            .into_iter()
            .map(|r| r.map(|s| s as usize))
            .collect())
    }

    /// Saves to the database's own path, which truncates the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        self.ensure_writable()?;
        if self.path().is_some() {
            self.save(None)?;
        }
        Ok(())
    }

    /// Runs whichever threshold-driven pass is due. Returns whether one ran.
    pub fn run_compaction_triggers(&self) -> Result<bool> {
        self.ensure_writable()?;
        let settings = self.settings();
        let (deleted, ratio) = {
            let state = self.state.read();
            (state.store.deleted_count(), state.store.deleted_ratio())
        };
        if deleted > 0 && ratio > settings.deleted_ratio_threshold {
            tracing::info!(deleted, ratio, "deleted-ratio threshold exceeded, compacting");
            self.compact()?;
            return Ok(true);
        }
        let wal_bytes = self.wal.as_ref().map_or(0, WriteAheadLog::size);
        if settings.wal_compaction_threshold > 0 && wal_bytes > settings.wal_compaction_threshold {
            tracing::info!(wal_bytes, "WAL size threshold exceeded, checkpointing");
            self.checkpoint()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Starts the background compaction thread. Starting it twice is a no-op.
    pub fn start_background_compaction(self: &Arc<Self>) -> Result<()> {
        self.ensure_writable()?;
        let mut slot = self.compactor.lock();
        if slot.is_some() {
            return Ok(());
        }
        let signal = Arc::new(Signal::default());
        let weak = Arc::downgrade(self);
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("vectordb-compaction".into())
            .spawn(move || run_worker(weak, thread_signal))?;
        *slot = Some(CompactionWorker { signal, handle });
        tracing::info!(
            interval_secs = self.settings().compaction_interval_secs,
            "background compaction started"
        );
        Ok(())
    }

    /// Signals the worker and waits (bounded) for an in-flight pass to finish.
    /// Stopping when nothing runs is a no-op.
    pub fn stop_background_compaction(&self) -> Result<()> {
        let Some(worker) = self.compactor.lock().take() else {
            return Ok(());
        };
        worker.request_stop();
        if worker.handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        let deadline = Instant::now() + Duration::from_secs(config::COMPACTION_STOP_TIMEOUT_SECS);
        while !worker.handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("background compaction did not stop in time, detaching");
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }
        if worker.handle.join().is_err() {
            tracing::warn!("background compaction thread panicked");
        }
        tracing::info!("background compaction stopped");
        Ok(())
    }

    pub fn background_compaction_running(&self) -> bool {
        self.compactor.lock().is_some()
    }

    /// Wakes the worker early, e.g. after deletes or a new interval.
    pub(crate) fn nudge_compactor(&self) {
        if let Some(worker) = self.compactor.lock().as_ref() {
            worker.signal.state.lock().pending = true;
            worker.signal.wake.notify_one();
        }
    }

    pub(crate) fn shutdown_compactor(&self) {
        if let Err(e) = self.stop_background_compaction() {
            tracing::warn!(error = %e, "stopping background compaction failed");
        }
    }
}

impl CompactionWorker {
    fn request_stop(&self) {
        self.signal.state.lock().stop = true;
        self.signal.wake.notify_all();
    }
}

fn run_worker(db: Weak<Database>, signal: Arc<Signal>) {
    loop {
        let interval = match db.upgrade() {
            Some(db) => Duration::from_secs(db.settings().compaction_interval_secs),
            None => return,
        };
        {
            let mut state = signal.state.lock();
            if !state.stop && !state.pending {
                signal.wake.wait_for(&mut state, interval);
            }
            if state.stop {
                return;
            }
            state.pending = false;
        }
        let Some(db) = db.upgrade() else {
            return;
        };
        if db.is_closed() {
            return;
        }
        if let Err(e) = db.run_compaction_triggers() {
            tracing::warn!(error = %e, "background compaction pass failed");
        }
    }
}
