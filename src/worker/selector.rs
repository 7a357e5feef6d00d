//! Worker selection
//!
//! Placement order for a request:
//! 1. Only running workers carrying every required tag, owned by the
//!    requesting team or global, are candidates.
//! 2. A remembered worker for the affinity key wins while it is still a
//!    candidate; otherwise the memory is expired.
//! 3. Team-owned candidates are preferred over global ones.
//! 4. Ties break on fewest active containers, then on worker name.
//!
//! [`WorkerSelector::rank`] returns the full preference order so callers
//! can move on to the next worker when one is unreachable.

use crate::error::{HangarError, HangarResult};
use crate::worker::{AffinityKey, AffinityStore, TeamId, Worker, WorkerState};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Placement constraints for one operation
#[derive(Debug, Clone, Default)]
pub struct PlacementRequest {
    /// Tags the worker must carry
    pub tags: BTreeSet<String>,
    /// Requesting team
    pub team: Option<TeamId>,
    /// Resource identity used for sticky placement
    pub resource: Option<String>,
}

impl PlacementRequest {
    pub fn new(team: Option<TeamId>) -> Self {
        Self {
            team,
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    fn affinity_key(&self) -> Option<AffinityKey> {
        self.resource
            .as_ref()
            .map(|r| AffinityKey::new(r.clone(), self.team.clone()))
    }

    fn describe_tags(&self) -> String {
        self.tags.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Chooses the worker that should host an operation
#[derive(Debug, Clone, Default)]
pub struct WorkerSelector {
    affinity: Option<Arc<AffinityStore>>,
}

impl WorkerSelector {
    /// Selector with sticky placement backed by `affinity`
    pub fn new(affinity: Arc<AffinityStore>) -> Self {
        Self {
            affinity: Some(affinity),
        }
    }

    /// Selector that never remembers previous choices
    pub fn without_affinity() -> Self {
        Self { affinity: None }
    }

    /// Eligible workers in preference order
    ///
    /// Fails with `NoEligibleWorker` when nothing matches; that is a
    /// configuration problem and is never retried here.
    pub fn rank(&self, workers: &[Worker], request: &PlacementRequest) -> HangarResult<Vec<Worker>> {
        let candidates: Vec<&Worker> = workers
            .iter()
            .filter(|w| w.state == WorkerState::Running)
            .filter(|w| w.satisfies(&request.tags))
            .filter(|w| w.usable_by(request.team.as_ref()))
            .collect();

        if candidates.is_empty() {
            return Err(HangarError::NoEligibleWorker {
                tags: request.describe_tags(),
                team: request
                    .team
                    .as_ref()
                    .map_or_else(|| "<none>".to_string(), ToString::to_string),
            });
        }

        let (mut owned, mut global): (Vec<&Worker>, Vec<&Worker>) =
            candidates.into_iter().partition(|w| w.team.is_some());
        owned.sort_by(|a, b| load_order(a, b));
        global.sort_by(|a, b| load_order(a, b));

        // Global workers stay at the back as a fallback for unreachable
        // team workers.
        let mut ranked: Vec<Worker> = owned.into_iter().chain(global).cloned().collect();

        if let Some(key) = request.affinity_key() {
            self.apply_affinity(&key, &mut ranked);
        }

        Ok(ranked)
    }

    /// Best worker for `request`; records the choice for sticky placement
    pub fn select(&self, workers: &[Worker], request: &PlacementRequest) -> HangarResult<Worker> {
        let worker = self
            .rank(workers, request)?
            .into_iter()
            .next()
            .ok_or_else(|| HangarError::Internal("ranked candidates empty".to_string()))?;
        self.record(request, &worker);
        Ok(worker)
    }

    /// Remember that `worker` served `request`
    pub fn record(&self, request: &PlacementRequest, worker: &Worker) {
        if let (Some(store), Some(key)) = (&self.affinity, request.affinity_key()) {
            store.remember(key, &worker.name);
        }
    }

    fn apply_affinity(&self, key: &AffinityKey, ranked: &mut Vec<Worker>) {
        let Some(store) = &self.affinity else {
            return;
        };
        let Some(remembered) = store.get(key) else {
            return;
        };

        match ranked.iter().position(|w| w.name == remembered) {
            Some(idx) => {
                debug!(worker = %remembered, resource = %key.resource, "sticky placement");
                let worker = ranked.remove(idx);
                ranked.insert(0, worker);
            }
            None => {
                debug!(worker = %remembered, resource = %key.resource, "expiring stale affinity");
                store.forget(key);
            }
        }
    }
}

fn load_order(a: &Worker, b: &Worker) -> std::cmp::Ordering {
    a.active_containers
        .cmp(&b.active_containers)
        .then_with(|| a.name.cmp(&b.name))
}
