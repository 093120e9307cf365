//! Query service: resolves queries against the index and joins results to records.
//!
//! The store and its index are held together in one immutable snapshot.
//! Queries clone the current snapshot handle and run without holding the
//! lock, so a rebuild swaps in a complete new snapshot and in-flight queries
//! finish against the old one.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::analysis::features::FeatureRecord;
use crate::index::{IndexError, Neighbor, VectorIndex};
use crate::library::store::{FeatureStore, StoreError};

/// Errors surfaced by [`QueryService`].
#[derive(Debug, Error)]
pub enum QueryError {
    /// The queried file name is not in the store.
    #[error("No record named {0:?}")]
    NotFound(String),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => Self::NotFound(name),
            other => Self::Store(other),
        }
    }
}

/// One ranked result, joined back to its full record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Position of the record in the snapshot's store.
    pub row: usize,
    #[serde(flatten)]
    pub record: FeatureRecord,
    pub distance: f32,
}

/// A store paired with the index built from it.
#[derive(Debug)]
pub struct Snapshot {
    store: Arc<FeatureStore>,
    index: VectorIndex,
}

impl Snapshot {
    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    fn hits(&self, neighbors: Vec<Neighbor>) -> Vec<SearchHit> {
        neighbors
            .into_iter()
            .filter_map(|neighbor| {
                self.store.record_at(neighbor.row).map(|record| SearchHit {
                    row: neighbor.row,
                    record: record.clone(),
                    distance: neighbor.distance,
                })
            })
            .collect()
    }
}

/// Read-mostly similarity search over one store.
#[derive(Debug)]
pub struct QueryService {
    current: RwLock<Arc<Snapshot>>,
}

impl QueryService {
    /// Build an index over `store` and serve it.
    pub fn new(store: FeatureStore) -> Result<Self, QueryError> {
        let snapshot = build_snapshot(store)?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Serve `store` with a previously built index, which must match it.
    pub fn with_index(store: FeatureStore, index: VectorIndex) -> Result<Self, QueryError> {
        index.ensure_matches(&store)?;
        Ok(Self {
            current: RwLock::new(Arc::new(Snapshot {
                store: Arc::new(store),
                index,
            })),
        })
    }

    /// Current snapshot; stays valid even if a rebuild happens afterwards.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Nearest records to `vector`, including exact matches of stored records.
    pub fn query_by_vector(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, QueryError> {
        let snapshot = self.snapshot();
        let neighbors = snapshot.index.search(vector, k)?;
        Ok(snapshot.hits(neighbors))
    }

    /// Nearest records to the named record, never including the record itself.
    ///
    /// Returns `min(k, len - 1)` hits.
    pub fn query_by_name(&self, file_name: &str, k: usize) -> Result<Vec<SearchHit>, QueryError> {
        if k == 0 {
            return Err(IndexError::InvalidK.into());
        }
        let snapshot = self.snapshot();
        let vector = snapshot.store.vector_of(file_name)?;
        let neighbors = snapshot.index.search(&vector, k.saturating_add(1))?;
        let mut hits = snapshot.hits(neighbors);
        hits.retain(|hit| hit.record.file_name != file_name);
        hits.truncate(k);
        Ok(hits)
    }

    /// Replace the served store with `store` and a freshly built index.
    ///
    /// The new index is built before the swap; on error the old snapshot
    /// keeps serving. Row numbers from earlier results refer to the old store.
    pub fn rebuild(&self, store: FeatureStore) -> Result<(), QueryError> {
        let snapshot = Arc::new(build_snapshot(store)?);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = snapshot;
        info!("Query service swapped to a rebuilt index");
        Ok(())
    }
}

fn build_snapshot(store: FeatureStore) -> Result<Snapshot, QueryError> {
    let index = VectorIndex::build(&store)?;
    Ok(Snapshot {
        store: Arc::new(store),
        index,
    })
}
