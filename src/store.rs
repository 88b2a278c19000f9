//! Binary storage for precomputed feature vectors.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the model version string)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id_len: u16 (little-endian), followed by that many UTF-8 bytes
//! - vector: [f32; dimensions] (little-endian)
//!
//! The model id in the header is how a configuration change to the active
//! model invalidates every cached vector at once.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::catalog::CatalogItem;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("model mismatch: file was produced by a different model version")]
    ModelMismatch,

    #[error("checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Storage manager for the vector sidecar file.
pub struct VectorStore {
    path: PathBuf,
}

impl VectorStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load all vectors, validating the header against the active model.
    ///
    /// A `ModelMismatch` means the configured model changed since the file
    /// was written; callers treat the whole cache as stale.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<HashMap<String, Vec<f32>>, StoreError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(StoreError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let mut vectors = HashMap::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let (id, vector) = read_entry(&mut reader, header.dimensions as usize)?;
            vectors.insert(id, vector);
        }

        Ok(vectors)
    }

    /// Save all vectors atomically: temp file -> flush -> fsync -> rename.
    pub fn save(
        &self,
        vectors: &HashMap<String, Vec<f32>>,
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<(), StoreError> {
        let temp_path = self.path.with_extension("tmp");

        let result = write_to_file(&temp_path, vectors, model_id, dimensions);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Delete the storage file if it exists.
    pub fn delete(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Gather the vectors worth persisting: fresh for `version` and of the
/// model's width. Catalogs arrive from an external collaborator, so an
/// inline cached vector can carry the right version but the wrong width;
/// those are stale, not save errors.
pub fn collect_vectors(
    items: &[CatalogItem],
    version: &str,
    dimensions: usize,
) -> HashMap<String, Vec<f32>> {
    let mut vectors = HashMap::new();
    for item in items {
        let Some(v) = item.cached_vector_for(version) else {
            continue;
        };
        if v.len() != dimensions {
            log::warn!(
                "item={} outcome=dropped vector width {} (expected {})",
                item.id,
                v.len(),
                dimensions
            );
            continue;
        }
        vectors.insert(item.id.clone(), v.to_vec());
    }
    vectors
}

/// Project stored vectors onto catalog items that lack a fresh cached
/// vector. Only the cached-vector fields are ever touched.
pub fn hydrate(items: &mut [CatalogItem], vectors: &HashMap<String, Vec<f32>>, version: &str) {
    for item in items {
        if item.cached_vector_for(version).is_some() {
            continue;
        }
        if let Some(vector) = vectors.get(&item.id) {
            item.set_cached_vector(vector.clone(), version);
        }
    }
}

struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn read_header(reader: &mut BufReader<File>) -> Result<Header, StoreError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version > FORMAT_VERSION {
        return Err(StoreError::VersionMismatch(version, FORMAT_VERSION));
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
    let entry_count = u64::from_le_bytes(
        header_bytes[35..43]
            .try_into()
            .map_err(|_| StoreError::InvalidFormat("short header".to_string()))?,
    );
    let stored_checksum = u32::from_le_bytes(
        header_bytes[43..47]
            .try_into()
            .map_err(|_| StoreError::InvalidFormat("short header".to_string()))?,
    );

    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(StoreError::ChecksumMismatch);
    }

    Ok(Header {
        model_id,
        dimensions,
        entry_count,
    })
}

fn write_to_file(
    path: &Path,
    vectors: &HashMap<String, Vec<f32>>,
    model_id: &[u8; 32],
    dimensions: usize,
) -> Result<(), StoreError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes[0] = FORMAT_VERSION;
    header_bytes[1..33].copy_from_slice(model_id);
    header_bytes[33..35].copy_from_slice(&(dimensions as u16).to_le_bytes());
    header_bytes[35..43].copy_from_slice(&(vectors.len() as u64).to_le_bytes());
    let checksum = crc32fast::hash(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());
    writer.write_all(&header_bytes)?;

    for (id, vector) in vectors {
        if vector.len() != dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: dimensions,
                got: vector.len(),
            });
        }
        write_entry(&mut writer, id, vector)?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    Ok(())
}

fn read_entry(
    reader: &mut BufReader<File>,
    dimensions: usize,
) -> Result<(String, Vec<f32>), StoreError> {
    let mut len_bytes = [0u8; 2];
    reader.read_exact(&mut len_bytes)?;
    let id_len = u16::from_le_bytes(len_bytes) as usize;

    let mut id_bytes = vec![0u8; id_len];
    reader.read_exact(&mut id_bytes)?;
    let id = String::from_utf8(id_bytes)
        .map_err(|_| StoreError::InvalidFormat("item id is not UTF-8".to_string()))?;

    let mut vector = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut float_bytes = [0u8; 4];
        reader.read_exact(&mut float_bytes)?;
        vector.push(f32::from_le_bytes(float_bytes));
    }

    Ok((id, vector))
}

fn write_entry(writer: &mut BufWriter<File>, id: &str, vector: &[f32]) -> Result<(), StoreError> {
    writer.write_all(&(id.len() as u16).to_le_bytes())?;
    writer.write_all(id.as_bytes())?;
    for &value in vector {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}
