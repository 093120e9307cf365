//! Build-time collection of records: discovery, batch extraction and persistence.

pub mod batch;
pub mod metadata;
pub mod scan;
pub mod store;
pub mod tabular;

pub use batch::{BatchOptions, BatchReport, FileFailure};
pub use metadata::MetadataIndex;
pub use scan::discover_audio_files;
pub use store::{FeatureStore, StoreBuild, StoreError};
