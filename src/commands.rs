use std::{collections::HashSet, fmt, sync::Arc};

use log::{debug, info, warn};
use time::OffsetDateTime;

use crate::{
    api::MonitorApi,
    store::CommitOutcome,
    structures::{
        errors::{ApiError, ConsoleError},
        model::{Category, NewCategory, NewWebsite, Snapshot, Website},
    },
    sync::SyncCoordinator,
};

/// Phases of a single `trigger_check` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    Idle,
    Dispatching,
    DispatchFailed,
    AwaitingResult,
    ExecutionFailed,
    Refreshing,
    Done,
}

impl CheckPhase {
    fn can_advance_to(self, next: CheckPhase) -> bool {
        use CheckPhase::*;
        matches!(
            (self, next),
            (Idle, Dispatching)
                | (Dispatching, DispatchFailed)
                | (Dispatching, AwaitingResult)
                | (AwaitingResult, ExecutionFailed)
                | (AwaitingResult, Refreshing)
                | (Refreshing, ExecutionFailed)
                | (Refreshing, Done)
        )
    }
}

impl fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The path one check took through [`CheckPhase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTrace {
    website_id: String,
    phases: Vec<CheckPhase>,
}

impl CheckTrace {
    fn new(website_id: &str) -> Self {
        Self {
            website_id: website_id.to_string(),
            phases: vec![CheckPhase::Idle],
        }
    }

    pub fn phase(&self) -> CheckPhase {
        self.phases.last().copied().unwrap_or(CheckPhase::Idle)
    }

    pub fn phases(&self) -> &[CheckPhase] {
        &self.phases
    }

    fn advance(&mut self, next: CheckPhase) {
        let current = self.phase();
        debug_assert!(current.can_advance_to(next), "{current} -> {next}");
        debug!("check {}: {} -> {}", self.website_id, current, next);
        self.phases.push(next);
    }
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub website_id: String,
    /// When the check was requested, by the local clock.
    pub requested_at: OffsetDateTime,
    pub trace: CheckTrace,
    /// Holds the new result for `website_id`.
    pub snapshot: Arc<Snapshot>,
}

/// Follow-up refreshes a check may need when its own epoch is superseded.
const CHECK_REFRESH_ATTEMPTS: usize = 3;

/// Checks for one website as known before a probe ran.
struct CheckBaseline {
    seen: HashSet<String>,
    newest: Option<OffsetDateTime>,
}

impl CheckBaseline {
    fn capture(snapshot: &Snapshot, website_id: &str) -> Self {
        let mut seen = HashSet::new();
        let mut newest = None;
        for check in snapshot.checks.iter().filter(|c| c.website_id == website_id) {
            seen.insert(check.id.clone());
            newest = newest.max(Some(check.created_at));
        }
        Self { seen, newest }
    }

    /// A result the baseline did not contain, stamped no earlier than the
    /// newest one it did. Both timestamps come from the backend's clock.
    fn has_new_result(&self, snapshot: &Snapshot, website_id: &str) -> bool {
        snapshot.checks.iter().any(|c| {
            c.website_id == website_id
                && !self.seen.contains(&c.id)
                && self.newest.map_or(true, |newest| c.created_at >= newest)
        })
    }
}

/// Mutations against the backend. Each successful command is followed by a
/// refresh and the caller gets the resulting snapshot; nothing is inserted
/// locally ahead of the service.
#[derive(Clone)]
pub struct CommandDispatcher {
    api: Arc<dyn MonitorApi>,
    sync: SyncCoordinator,
}

impl CommandDispatcher {
    pub fn new(api: Arc<dyn MonitorApi>, sync: SyncCoordinator) -> Self {
        Self { api, sync }
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub async fn create_category(
        &self,
        name: &str,
        color: Option<&str>,
    ) -> Result<(Category, Arc<Snapshot>), ConsoleError> {
        let category = NewCategory::new(name, color)?;
        info!("creating category {:?}", category.name);
        let created = self
            .api
            .create_category(&category)
            .await
            .map_err(command_error)?;
        let report = self.sync.refresh().await?;
        Ok((created, report.snapshot))
    }

    pub async fn create_website(
        &self,
        website: NewWebsite,
    ) -> Result<(Website, Arc<Snapshot>), ConsoleError> {
        website.validate()?;
        info!("creating website {:?} ({})", website.name, website.url);
        let created = self
            .api
            .create_website(&website)
            .await
            .map_err(command_error)?;
        let report = self.sync.refresh().await?;
        Ok((created, report.snapshot))
    }

    /// Runs a probe for `website_id` now and refreshes once it has finished.
    /// Succeeds only when the refreshed snapshot holds the new result.
    pub async fn trigger_check(&self, website_id: &str) -> Result<CheckOutcome, ConsoleError> {
        if matches!(website_id.trim(), "" | "." | "..") {
            return Err(ConsoleError::InvalidConfiguration(format!(
                "invalid website id {website_id:?}"
            )));
        }
        let requested_at = OffsetDateTime::now_utc();
        let baseline = self.check_baseline(website_id).await;
        let mut trace = CheckTrace::new(website_id);

        trace.advance(CheckPhase::Dispatching);
        match self.api.trigger_check(website_id).await {
            Ok(()) => trace.advance(CheckPhase::AwaitingResult),
            Err(ApiError::Unreachable(message)) => {
                trace.advance(CheckPhase::DispatchFailed);
                warn!("check {} not dispatched: {}", website_id, message);
                return Err(ConsoleError::CheckDispatchFailed {
                    website_id: website_id.to_string(),
                    message,
                });
            }
            Err(e) => {
                trace.advance(CheckPhase::AwaitingResult);
                trace.advance(CheckPhase::ExecutionFailed);
                warn!("check {} failed: {}", website_id, e);
                return Err(ConsoleError::CheckExecutionFailed {
                    website_id: website_id.to_string(),
                    message: e.to_string(),
                });
            }
        }

        // the probe has completed, so any epoch started from here on sees it
        trace.advance(CheckPhase::Refreshing);
        for _ in 0..CHECK_REFRESH_ATTEMPTS {
            let report = self.sync.refresh().await?;
            if baseline.has_new_result(&report.snapshot, website_id) {
                trace.advance(CheckPhase::Done);
                return Ok(CheckOutcome {
                    website_id: website_id.to_string(),
                    requested_at,
                    trace,
                    snapshot: report.snapshot,
                });
            }
            match report.outcome {
                // a newer epoch won without committing; try again
                CommitOutcome::Discarded { epoch, newer } => {
                    debug!("check {}: epoch {} lost to {}", website_id, epoch, newer)
                }
                CommitOutcome::Committed { .. } => break,
            }
        }

        trace.advance(CheckPhase::ExecutionFailed);
        warn!("check {} ran but stored no new result", website_id);
        Err(ConsoleError::CheckExecutionFailed {
            website_id: website_id.to_string(),
            message: "probe finished without a new check result".to_string(),
        })
    }

    async fn check_baseline(&self, website_id: &str) -> CheckBaseline {
        let mut snapshot = self.sync.current_snapshot();
        if snapshot.epoch == 0 {
            // nothing loaded yet, so learn which results already exist
            match self.sync.refresh().await {
                Ok(report) => snapshot = report.snapshot,
                Err(e) => warn!("check {}: no baseline: {}", website_id, e),
            }
        }
        CheckBaseline::capture(&snapshot, website_id)
    }
}

fn command_error(e: ApiError) -> ConsoleError {
    match e {
        ApiError::Unreachable(message) => ConsoleError::NetworkFailure(message),
        other => ConsoleError::CommandFailed(other.to_string()),
    }
}
