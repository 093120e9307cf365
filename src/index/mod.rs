//! Exact k-nearest-neighbour index over a dense `f32` matrix.
//!
//! Distances are squared Euclidean over the vectors exactly as stored. No
//! normalization happens here: callers that want cosine similarity must
//! L2-normalize vectors before building the index.

mod persist;

use std::path::PathBuf;

use ndarray::{Array2, ArrayView1};
use thiserror::Error;
use tracing::info;

use crate::config::DistanceMetric;
use crate::library::store::FeatureStore;

pub use persist::INDEX_FORMAT_VERSION;

/// Errors raised while building, querying or persisting a [`VectorIndex`].
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Cannot build an index from an empty store")]
    EmptyStore,
    /// A row or query has the wrong number of values.
    #[error("Dimension mismatch at {context}: expected {expected}, got {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },
    #[error("k must be at least 1")]
    InvalidK,
    #[error("Query vector contains non-finite values")]
    NonFiniteQuery,
    /// The index was built from a different store.
    #[error("Index was built from store {index_store}, not {store}")]
    StaleIndex { index_store: String, store: String },
    #[error("Failed to access index {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Corrupt index blob: {0}")]
    Corrupt(String),
}

/// One search result: the row of the matching vector and its distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row: usize,
    pub distance: f32,
}

/// Immutable N×D matrix of index vectors; row `i` is store record `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    matrix: Array2<f32>,
    metric: DistanceMetric,
    store_hash: String,
}

impl VectorIndex {
    /// Materialize every record vector of `store`, in store order.
    pub fn build(store: &FeatureStore) -> Result<Self, IndexError> {
        let vectors: Vec<Vec<f32>> = store
            .records()
            .iter()
            .map(|record| record.numeric_vector())
            .collect();
        let index = Self::from_vectors(&vectors, store.config().metric, store.content_hash())?;
        info!(
            "Built vector index: {} rows x {} dims",
            index.len(),
            index.dims()
        );
        Ok(index)
    }

    /// Build from raw vectors; all rows must share one length.
    pub fn from_vectors(
        vectors: &[Vec<f32>],
        metric: DistanceMetric,
        store_hash: impl Into<String>,
    ) -> Result<Self, IndexError> {
        let Some(first) = vectors.first() else {
            return Err(IndexError::EmptyStore);
        };
        let dims = first.len();
        let mut flat = Vec::with_capacity(vectors.len() * dims);
        for (row, vector) in vectors.iter().enumerate() {
            if vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    context: format!("row {row}"),
                    expected: dims,
                    found: vector.len(),
                });
            }
            flat.extend_from_slice(vector);
        }
        let matrix = Array2::from_shape_vec((vectors.len(), dims), flat)
            .map_err(|err| IndexError::Corrupt(err.to_string()))?;
        Ok(Self {
            matrix,
            metric,
            store_hash: store_hash.into(),
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.nrows() == 0
    }

    /// Vector dimension.
    pub fn dims(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Content hash of the store this index was built from.
    pub fn store_hash(&self) -> &str {
        &self.store_hash
    }

    /// Stored vector for `row`.
    pub fn row(&self, row: usize) -> Option<ArrayView1<'_, f32>> {
        (row < self.len()).then(|| self.matrix.row(row))
    }

    /// Fail with [`IndexError::StaleIndex`] unless this index was built from `store`.
    pub fn ensure_matches(&self, store: &FeatureStore) -> Result<(), IndexError> {
        let store_hash = store.content_hash();
        if store_hash != self.store_hash || store.len() != self.len() {
            return Err(IndexError::StaleIndex {
                index_store: self.store_hash.clone(),
                store: store_hash,
            });
        }
        Ok(())
    }

    /// Up to `k` nearest rows by ascending distance, ties by ascending row.
    ///
    /// `k` above the row count is clamped; `k == 0` is rejected.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidK);
        }
        if query.len() != self.dims() {
            return Err(IndexError::DimensionMismatch {
                context: "query".into(),
                expected: self.dims(),
                found: query.len(),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NonFiniteQuery);
        }
        let mut neighbors: Vec<Neighbor> = self
            .matrix
            .outer_iter()
            .enumerate()
            .map(|(row, values)| Neighbor {
                row,
                distance: self.distance(values, query),
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.row.cmp(&b.row)));
        neighbors.truncate(k.min(self.len()));
        Ok(neighbors)
    }

    fn distance(&self, row: ArrayView1<'_, f32>, query: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::SquaredEuclidean => squared_l2(row, query),
        }
    }
}

fn squared_l2(row: ArrayView1<'_, f32>, query: &[f32]) -> f32 {
    row.iter()
        .zip(query)
        .map(|(&a, &b)| {
            let diff = a - b;
            diff * diff
        })
        .sum()
}
