use std::{future::Future, sync::Arc, time::Duration};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{
    api::MonitorApi,
    store::{CollectionStore, CommitOutcome},
    structures::{
        errors::{ApiError, ConsoleError},
        model::{Category, CheckResult, CollectionData, CollectionKind, Snapshot},
    },
};

/// How a website's category reference resolves against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryResolution {
    Known(Category),
    /// The website has no category.
    Uncategorized,
    /// The website, or the category it points at, is not in the snapshot.
    Unknown { category_id: Option<String> },
}

pub fn resolve_category(snapshot: &Snapshot, website_id: &str) -> CategoryResolution {
    let Some(website) = snapshot.website(website_id) else {
        return CategoryResolution::Unknown { category_id: None };
    };
    match website.category_id.as_deref() {
        None => CategoryResolution::Uncategorized,
        Some(category_id) => match snapshot.category(category_id) {
            Some(category) => CategoryResolution::Known(category.clone()),
            None => CategoryResolution::Unknown {
                category_id: Some(category_id.to_string()),
            },
        },
    }
}

/// Website name, or a shortened identifier when it is not loaded.
pub fn website_label(snapshot: &Snapshot, website_id: &str) -> String {
    match snapshot.website(website_id) {
        Some(website) => website.name.clone(),
        None => short_id(website_id).to_string(),
    }
}

/// First characters of an opaque identifier, for labels.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(6) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub outcome: CommitOutcome,
    /// The visible snapshot right after this refresh finished.
    pub snapshot: Arc<Snapshot>,
}

/// Fans a refresh out to the four collections and commits the result.
///
/// Overlapping refreshes each get their own epoch. Whichever finishes is
/// committed unless a newer epoch has already completed, in which case its
/// result is thrown away.
#[derive(Clone)]
pub struct SyncCoordinator {
    api: Arc<dyn MonitorApi>,
    store: Arc<CollectionStore>,
    read_retries: u32,
}

impl SyncCoordinator {
    pub fn new(api: Arc<dyn MonitorApi>, store: Arc<CollectionStore>) -> Self {
        Self {
            api,
            store,
            read_retries: 0,
        }
    }

    /// Extra attempts for each read before it counts as failed.
    pub fn with_read_retries(mut self, read_retries: u32) -> Self {
        self.read_retries = read_retries;
        self
    }

    pub fn store(&self) -> &Arc<CollectionStore> {
        &self.store
    }

    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.store.current_snapshot()
    }

    pub async fn refresh(&self) -> Result<RefreshReport, ConsoleError> {
        let epoch = self.store.begin();
        // the reads run in their own task so a caller giving up does not
        // stop them from landing in the store
        let task = tokio::spawn(run_refresh(
            Arc::clone(&self.api),
            Arc::clone(&self.store),
            epoch,
            self.read_retries,
        ));
        let outcome = task.await??;
        Ok(RefreshReport {
            outcome,
            snapshot: self.store.current_snapshot(),
        })
    }

    /// Refreshes every `period` until the returned handle is aborted.
    pub fn spawn_periodic(&self, period: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = coordinator.refresh().await {
                    warn!("periodic refresh failed: {}", e);
                }
            }
        })
    }

    pub fn resolve_category(&self, website_id: &str) -> CategoryResolution {
        resolve_category(&self.store.current_snapshot(), website_id)
    }

    pub fn latest_check(&self, website_id: &str) -> Option<CheckResult> {
        self.store.current_snapshot().latest_check(website_id).cloned()
    }

    pub fn website_label(&self, website_id: &str) -> String {
        website_label(&self.store.current_snapshot(), website_id)
    }
}

async fn run_refresh(
    api: Arc<dyn MonitorApi>,
    store: Arc<CollectionStore>,
    epoch: u64,
    retries: u32,
) -> Result<CommitOutcome, ConsoleError> {
    let categories = async {
        let result = read(CollectionKind::Categories, retries, || api.categories()).await;
        store.apply_partial(epoch, CollectionKind::Categories, result.map(CollectionData::Categories));
    };
    let websites = async {
        let result = read(CollectionKind::Websites, retries, || api.websites()).await;
        store.apply_partial(epoch, CollectionKind::Websites, result.map(CollectionData::Websites));
    };
    let checks = async {
        let result = read(CollectionKind::Checks, retries, || api.latest_checks()).await;
        store.apply_partial(epoch, CollectionKind::Checks, result.map(CollectionData::Checks));
    };
    let summary = async {
        let result = read(CollectionKind::Summary, retries, || api.summary()).await;
        store.apply_partial(epoch, CollectionKind::Summary, result.map(CollectionData::Summary));
    };
    futures::join!(categories, websites, checks, summary);

    let outcome = store.commit(epoch)?;
    if let CommitOutcome::Committed { .. } = outcome {
        info!("snapshot now at epoch {}", epoch);
    }
    Ok(outcome)
}

async fn read<T, F, Fut>(kind: CollectionKind, retries: u32, mut fetch: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        match fetch().await {
            Ok(value) => return Ok(value),
            // a body we cannot parse will not parse on the second try either
            Err(e @ ApiError::Decode(_)) => return Err(e.to_string()),
            Err(e) if attempt < retries => {
                attempt += 1;
                debug!("retrying {} read ({}/{}): {}", kind, attempt, retries, e);
            }
            Err(e) => {
                warn!("{} read failed: {}", kind, e);
                return Err(e.to_string());
            }
        }
    }
}
