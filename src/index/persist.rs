//! Binary blob for a [`VectorIndex`].
//!
//! ```text
//! Size      Type         Description
//! ──────────────────────────────────────────────
//! 4         [u8; 4]      Magic: "SDXI"
//! 4         u32 LE       Format version
//! 4 + m     u32 LE, utf8 Metric id
//! 4 + h     u32 LE, utf8 Store content hash
//! 8         u64 LE       N: rows
//! 8         u64 LE       D: dims
//! N*D*4     [f32 LE]     Row-major vector data
//! 32        [u8; 32]     blake3 of everything above
//! ```

use std::path::Path;

use ndarray::Array2;
use tracing::info;

use super::{IndexError, VectorIndex};
use crate::config::DistanceMetric;
use crate::library::store::FeatureStore;

const MAGIC: [u8; 4] = *b"SDXI";
/// Version written into every blob; older or newer versions are rejected.
pub const INDEX_FORMAT_VERSION: u32 = 1;
const CHECKSUM_LEN: usize = 32;

impl VectorIndex {
    /// Serialize to the blob format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let metric = self.metric.id().as_bytes();
        let hash = self.store_hash.as_bytes();
        let mut out = Vec::with_capacity(
            32 + metric.len() + hash.len() + self.matrix.len() * 4 + CHECKSUM_LEN,
        );
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        push_str(&mut out, metric);
        push_str(&mut out, hash);
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.dims() as u64).to_le_bytes());
        for value in self.matrix.iter() {
            out.extend_from_slice(&value.to_le_bytes());
        }
        let checksum = blake3::hash(&out);
        out.extend_from_slice(checksum.as_bytes());
        out
    }

    /// Parse a blob produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        if bytes.len() < MAGIC.len() + CHECKSUM_LEN {
            return Err(IndexError::Corrupt("blob too short".into()));
        }
        let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if blake3::hash(body).as_bytes() != checksum {
            return Err(IndexError::Corrupt("checksum mismatch".into()));
        }
        let mut reader = Reader { bytes: body, pos: 0 };
        if reader.take(4)? != MAGIC {
            return Err(IndexError::Corrupt("bad magic".into()));
        }
        let version = reader.u32()?;
        if version != INDEX_FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {version}"
            )));
        }
        let metric = match reader.string()?.as_str() {
            id if id == DistanceMetric::SquaredEuclidean.id() => DistanceMetric::SquaredEuclidean,
            other => return Err(IndexError::Corrupt(format!("unknown metric {other:?}"))),
        };
        let store_hash = reader.string()?;
        let rows = reader.read_len()?;
        let dims = reader.read_len()?;
        if rows == 0 {
            return Err(IndexError::EmptyStore);
        }
        let count = rows
            .checked_mul(dims)
            .ok_or_else(|| IndexError::Corrupt("matrix size overflows".into()))?;
        let byte_len = count
            .checked_mul(4)
            .ok_or_else(|| IndexError::Corrupt("matrix size overflows".into()))?;
        let data: Vec<f32> = reader
            .take(byte_len)?
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if reader.pos != body.len() {
            return Err(IndexError::Corrupt("trailing bytes after matrix".into()));
        }
        let matrix = Array2::from_shape_vec((rows, dims), data)
            .map_err(|err| IndexError::Corrupt(err.to_string()))?;
        Ok(Self {
            matrix,
            metric,
            store_hash,
        })
    }

    /// Write the blob to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, self.to_bytes()).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved vector index ({} rows) to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a blob from `path`.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = std::fs::read(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    /// Read a blob and check that it was built from `store`.
    pub fn load_for_store(path: &Path, store: &FeatureStore) -> Result<Self, IndexError> {
        let index = Self::load(path)?;
        index.ensure_matches(store)?;
        Ok(index)
    }
}

fn push_str(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], IndexError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| IndexError::Corrupt("unexpected end of blob".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, IndexError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_len(&mut self) -> Result<usize, IndexError> {
        let b = self.take(8)?;
        let value = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        usize::try_from(value).map_err(|_| IndexError::Corrupt("length exceeds usize".into()))
    }

    fn string(&mut self) -> Result<String, IndexError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|err| IndexError::Corrupt(err.to_string()))
    }
}
