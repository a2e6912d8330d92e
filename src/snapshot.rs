//! Durable run snapshots.
//!
//! Every state-mutating operation ends with exactly one atomic write of five
//! named slots (`pendingQueue`, `visitedUrls`, `domainStates`, `runState`,
//! `recentErrors`) into the run's sled tree. `apply_batch` makes the five
//! slots land together; readers never observe a partial snapshot. Missing
//! slots hydrate as empty, so a fresh run and a wiped store look identical.

use rkyv::{archived_root, AlignedVec, Deserialize};
use sled::Db;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::domains::DomainState;
use crate::frontier::QueuedUrl;
use crate::run_state::{RecentError, RunState};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("snapshot encode failed: {0}")]
    Encode(String),
    #[error("snapshot decode failed for slot {0}")]
    Decode(&'static str),
}

const SLOT_PENDING_QUEUE: &str = "pendingQueue";
const SLOT_VISITED_URLS: &str = "visitedUrls";
const SLOT_DOMAIN_STATES: &str = "domainStates";
const SLOT_RUN_STATE: &str = "runState";
const SLOT_RECENT_ERRORS: &str = "recentErrors";

const TREE_PREFIX: &str = "run::";

/// The five persisted slots of one run, in their in-memory form.
#[derive(Debug, Default)]
pub struct RunSnapshot {
    pub pending_queue: Vec<QueuedUrl>,
    pub visited_urls: Vec<u32>,
    pub domain_states: HashMap<String, DomainState>,
    pub run_state: Option<RunState>,
    pub recent_errors: Vec<RecentError>,
}

#[derive(Clone)]
pub struct SnapshotStore {
    db: Db,
}

impl SnapshotStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn with_db(db: Db) -> Self {
        Self { db }
    }

    /// Write all five slots in one atomic batch and flush.
    pub fn save(&self, run_id: &str, snapshot: &RunSnapshot) -> Result<(), SnapshotError> {
        let tree = self.db.open_tree(tree_name(run_id))?;

        let mut batch = sled::Batch::default();
        batch.insert(SLOT_PENDING_QUEUE, encode(&snapshot.pending_queue)?.as_slice());
        batch.insert(SLOT_VISITED_URLS, encode(&snapshot.visited_urls)?.as_slice());
        batch.insert(SLOT_DOMAIN_STATES, encode(&snapshot.domain_states)?.as_slice());
        if let Some(run_state) = &snapshot.run_state {
            batch.insert(SLOT_RUN_STATE, encode(run_state)?.as_slice());
        }
        batch.insert(SLOT_RECENT_ERRORS, encode(&snapshot.recent_errors)?.as_slice());

        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    /// Read whatever slots exist; absent slots come back empty.
    pub fn load(&self, run_id: &str) -> Result<RunSnapshot, SnapshotError> {
        let tree = self.db.open_tree(tree_name(run_id))?;

        let mut snapshot = RunSnapshot::default();
        if let Some(bytes) = tree.get(SLOT_PENDING_QUEUE)? {
            snapshot.pending_queue = decode::<Vec<QueuedUrl>>(&bytes, SLOT_PENDING_QUEUE)?;
        }
        if let Some(bytes) = tree.get(SLOT_VISITED_URLS)? {
            snapshot.visited_urls = decode::<Vec<u32>>(&bytes, SLOT_VISITED_URLS)?;
        }
        if let Some(bytes) = tree.get(SLOT_DOMAIN_STATES)? {
            snapshot.domain_states =
                decode::<HashMap<String, DomainState>>(&bytes, SLOT_DOMAIN_STATES)?;
        }
        if let Some(bytes) = tree.get(SLOT_RUN_STATE)? {
            snapshot.run_state = Some(decode::<RunState>(&bytes, SLOT_RUN_STATE)?);
        }
        if let Some(bytes) = tree.get(SLOT_RECENT_ERRORS)? {
            snapshot.recent_errors = decode::<Vec<RecentError>>(&bytes, SLOT_RECENT_ERRORS)?;
        }
        Ok(snapshot)
    }

    /// Ids of every run with a persisted snapshot.
    pub fn run_ids(&self) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|name| {
                std::str::from_utf8(&name)
                    .ok()
                    .and_then(|s| s.strip_prefix(TREE_PREFIX))
                    .map(|s| s.to_string())
            })
            .collect()
    }
}

fn tree_name(run_id: &str) -> String {
    format!("{}{}", TREE_PREFIX, run_id)
}

fn encode<T>(value: &T) -> Result<AlignedVec, SnapshotError>
where
    T: rkyv::Serialize<rkyv::ser::serializers::AllocSerializer<4096>>,
{
    rkyv::to_bytes::<_, 4096>(value).map_err(|e| SnapshotError::Encode(e.to_string()))
}

fn decode<T>(bytes: &[u8], slot: &'static str) -> Result<T, SnapshotError>
where
    T: rkyv::Archive,
    T::Archived: Deserialize<T, rkyv::Infallible>,
{
    // Copy into an aligned buffer; sled hands back arbitrarily aligned bytes.
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    let archived = unsafe { archived_root::<T>(&aligned) };
    archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|_| SnapshotError::Decode(slot))
}
