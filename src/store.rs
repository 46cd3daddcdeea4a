//! Last converged snapshot plus the buffers of refreshes still in flight.
//!
//! Refreshes are numbered by epoch. Each sub-fetch lands in the buffer of its
//! epoch via [`CollectionStore::apply_partial`]; [`CollectionStore::commit`]
//! then either promotes the whole buffer or leaves the visible snapshot
//! untouched. Only an epoch newer than every epoch completed so far (failed
//! ones included) may commit, so the visible epoch never goes backwards.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, info, warn};
use serde::Serialize;

use crate::structures::{
    errors::{CollectionFailure, ConsoleError},
    model::{CollectionData, CollectionKind, Snapshot},
};

/// Load state of one collection, as of the newest refresh that touched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum CollectionStatus {
    Idle,
    Loading,
    Loaded,
    Failed(String),
}

/// What `commit` did with an epoch that fetched successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { epoch: u64 },
    /// A newer epoch had already completed; this one was dropped.
    Discarded { epoch: u64, newer: u64 },
}

#[derive(Debug, Default)]
struct Pending {
    results: HashMap<CollectionKind, Result<CollectionData, String>>,
}

#[derive(Debug)]
struct Inner {
    next_epoch: u64,
    highest_completed: u64,
    snapshot: Arc<Snapshot>,
    pending: BTreeMap<u64, Pending>,
    status: HashMap<CollectionKind, (u64, CollectionStatus)>,
}

#[derive(Debug)]
pub struct CollectionStore {
    inner: Mutex<Inner>,
}

impl Default for CollectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionStore {
    pub fn new() -> Self {
        let status = CollectionKind::ALL
            .iter()
            .map(|kind| (*kind, (0, CollectionStatus::Idle)))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                next_epoch: 1,
                highest_completed: 0,
                snapshot: Arc::new(Snapshot::default()),
                pending: BTreeMap::new(),
                status,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last fully converged snapshot.
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.lock().snapshot)
    }

    pub fn visible_epoch(&self) -> u64 {
        self.lock().snapshot.epoch
    }

    pub fn status(&self, kind: CollectionKind) -> CollectionStatus {
        self.lock()
            .status
            .get(&kind)
            .map(|(_, status)| status.clone())
            .unwrap_or(CollectionStatus::Idle)
    }

    pub fn statuses(&self) -> Vec<(CollectionKind, CollectionStatus)> {
        let inner = self.lock();
        CollectionKind::ALL
            .iter()
            .map(|kind| {
                let status = inner
                    .status
                    .get(kind)
                    .map(|(_, status)| status.clone())
                    .unwrap_or(CollectionStatus::Idle);
                (*kind, status)
            })
            .collect()
    }

    /// Allocates the next epoch and opens its buffer.
    pub(crate) fn begin(&self) -> u64 {
        let mut inner = self.lock();
        let epoch = inner.next_epoch;
        inner.next_epoch += 1;
        inner.pending.insert(epoch, Pending::default());
        for kind in CollectionKind::ALL {
            set_status(&mut inner, kind, epoch, CollectionStatus::Loading);
        }
        debug!("refresh epoch {} started", epoch);
        epoch
    }

    /// Buffers one sub-fetch outcome for `epoch`. Results for epochs that are
    /// already superseded are dropped.
    pub(crate) fn apply_partial(
        &self,
        epoch: u64,
        kind: CollectionKind,
        result: Result<CollectionData, String>,
    ) {
        let mut inner = self.lock();
        if epoch <= inner.highest_completed {
            debug!("dropping {} for stale epoch {}", kind, epoch);
            return;
        }
        let status = match &result {
            Ok(_) => CollectionStatus::Loaded,
            Err(message) => CollectionStatus::Failed(message.clone()),
        };
        set_status(&mut inner, kind, epoch, status);
        let result = match result {
            Ok(data) if data.kind() != kind => Err(format!("received {} data", data.kind())),
            other => other,
        };
        match inner.pending.get_mut(&epoch) {
            Some(pending) => {
                pending.results.insert(kind, result);
            }
            None => warn!("no open refresh for epoch {}, dropping {}", epoch, kind),
        }
    }

    /// Promotes the buffer of `epoch` if all four sub-fetches succeeded and no
    /// newer epoch has completed yet. Otherwise the visible snapshot is
    /// unchanged.
    pub(crate) fn commit(&self, epoch: u64) -> Result<CommitOutcome, ConsoleError> {
        let mut inner = self.lock();
        let visible = inner.snapshot.epoch;
        let pending = inner.pending.remove(&epoch);

        let newer = inner.highest_completed;
        if epoch <= newer {
            info!("refresh epoch {} discarded, epoch {} already completed", epoch, newer);
            return Ok(CommitOutcome::Discarded { epoch, newer });
        }
        inner.highest_completed = epoch;
        // older refreshes still in flight can no longer be committed
        inner.pending.retain(|pending_epoch, _| *pending_epoch > epoch);

        let mut pending = pending.unwrap_or_default();
        let mut snapshot = Snapshot {
            epoch,
            ..Snapshot::default()
        };
        let mut failures = Vec::new();
        for kind in CollectionKind::ALL {
            match pending.results.remove(&kind) {
                Some(Ok(CollectionData::Categories(categories))) => snapshot.categories = categories,
                Some(Ok(CollectionData::Websites(websites))) => snapshot.websites = websites,
                Some(Ok(CollectionData::Checks(checks))) => snapshot.checks = checks,
                Some(Ok(CollectionData::Summary(summary))) => snapshot.summary = summary,
                Some(Err(message)) => failures.push(CollectionFailure { kind, message }),
                None => failures.push(CollectionFailure {
                    kind,
                    message: "no result received".to_string(),
                }),
            }
        }

        if !failures.is_empty() {
            warn!(
                "refresh epoch {} failed for {} collection(s), keeping epoch {}",
                epoch,
                failures.len(),
                visible
            );
            return Err(ConsoleError::PartialRefreshFailure { epoch, failures });
        }

        inner.snapshot = Arc::new(snapshot);
        info!("refresh epoch {} committed", epoch);
        Ok(CommitOutcome::Committed { epoch })
    }
}

fn set_status(inner: &mut Inner, kind: CollectionKind, epoch: u64, status: CollectionStatus) {
    let entry = inner
        .status
        .entry(kind)
        .or_insert((0, CollectionStatus::Idle));
    // a slow old refresh must not overwrite the state reported by a newer one
    if epoch >= entry.0 {
        *entry = (epoch, status);
    }
}
