//! Audio feature vectors and similarity search over a sample library.
//!
//! Files are decoded to mono at a fixed rate, reduced to a fixed-length
//! descriptor vector (tempo, spectral shape, MFCC means), collected into a
//! [`library::FeatureStore`] and searched through an exact
//! [`index::VectorIndex`] wrapped by [`search::QueryService`].

/// Decoding, framing and descriptor extraction.
pub mod analysis;
/// Explicit pipeline configuration.
pub mod config;
/// Dense vector index with exact k-NN search.
pub mod index;
/// Discovery, batch extraction and persisted feature stores.
pub mod library;
/// Tracing subscriber setup.
pub mod logging;
/// Query service joining index results back to records.
pub mod search;

pub use analysis::{FeatureExtractor, FeatureRecord};
pub use config::PipelineConfig;
pub use index::VectorIndex;
pub use library::FeatureStore;
pub use search::{QueryService, SearchHit};
