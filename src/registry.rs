//! Run registry: routes each run id to its hydrated coordinator.
//!
//! A run's coordinator sits behind one `tokio::sync::Mutex`; handlers hold
//! the guard from first read to final snapshot write, which is what makes
//! every run single-writer. Distinct runs proceed concurrently.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::clock::Clock;
use crate::coordinator::RunCoordinator;
use crate::error::ApiError;
use crate::snapshot::SnapshotStore;

pub type RunHandle = Arc<Mutex<RunCoordinator>>;

pub struct RunRegistry {
    runs: DashMap<String, RunHandle>,
    store: Arc<SnapshotStore>,
    clock: Arc<dyn Clock>,
}

impl RunRegistry {
    pub fn new(store: Arc<SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runs: DashMap::new(),
            store,
            clock,
        }
    }

    /// Handle for a run, hydrating it on first touch. Unknown ids come up
    /// as fresh Pending runs; hydration is idempotent, so a racing second
    /// caller just drops its copy.
    pub fn get(&self, run_id: &str) -> Result<RunHandle, ApiError> {
        if run_id.is_empty() {
            return Err(ApiError::InvalidRequest("runId must not be empty".into()));
        }
        if let Some(handle) = self.runs.get(run_id) {
            return Ok(handle.clone());
        }

        let coordinator =
            RunCoordinator::hydrate(run_id, self.store.clone(), self.clock.clone())?;
        let handle = self
            .runs
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(coordinator)))
            .clone();
        Ok(handle)
    }

    /// Every run this registry should maintain: the hydrated ones plus any
    /// with a persisted snapshot from a previous process.
    pub fn known_run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.iter().map(|e| e.key().clone()).collect();
        for id in self.store.run_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Run the maintenance tick over every known run. Returns the summed
    /// queue size. A failing run is logged and skipped; the tick is
    /// best-effort across runs.
    pub async fn tick_all(&self) -> usize {
        let mut total_queue = 0;
        for run_id in self.known_run_ids() {
            match self.get(&run_id) {
                Ok(handle) => {
                    let mut coordinator = handle.lock().await;
                    match coordinator.tick() {
                        Ok(queue_size) => total_queue += queue_size,
                        Err(e) => warn!(%run_id, error = %e, "maintenance tick failed"),
                    }
                }
                Err(e) => warn!(%run_id, error = %e, "could not hydrate run for tick"),
            }
        }
        total_queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> RunRegistry {
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        RunRegistry::new(store, clock)
    }

    #[tokio::test]
    async fn test_get_returns_same_handle() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let a = registry.get("run-a").unwrap();
        let b = registry.get("run-a").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get("run-b").unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_rejects_empty_run_id() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        assert!(matches!(
            registry.get(""),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_known_ids_include_persisted_runs() {
        let dir = TempDir::new().unwrap();
        {
            let registry = registry(&dir);
            let handle = registry.get("survivor").unwrap();
            let mut coordinator = handle.lock().await;
            coordinator
                .seed(&["https://a.test/1".to_string()], None, None)
                .unwrap();
        }

        // A fresh registry over the same store still knows the run.
        let registry = registry(&dir);
        assert!(registry
            .known_run_ids()
            .contains(&"survivor".to_string()));
        assert_eq!(registry.tick_all().await, 1);
    }
}
