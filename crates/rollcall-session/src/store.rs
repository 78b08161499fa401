//! In-memory identity store built from the reference-photo directory.

use crate::identity::reference_photos;
use rollcall_core::{AnalyzerError, Embedding, FaceAnalyzer};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("face analysis failed for {path}: {source}")]
    Analyze {
        path: PathBuf,
        source: AnalyzerError,
    },
}

/// Known identities as two parallel sequences indexed by load position.
#[derive(Debug, Clone, Default)]
pub struct IdentityStore {
    names: Vec<String>,
    embeddings: Vec<Embedding>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embed every reference photo in `images_dir`, in file-name order.
    ///
    /// Photos without a detectable face are skipped without error. When a
    /// photo holds several faces, the detector's best one is registered.
    pub fn load(images_dir: &Path, analyzer: &mut dyn FaceAnalyzer) -> Result<Self, StoreError> {
        let photos = reference_photos(images_dir).map_err(|source| StoreError::Scan {
            path: images_dir.to_path_buf(),
            source,
        })?;

        let mut store = Self::new();
        for (name, path) in photos {
            let image = image::open(&path)
                .map_err(|source| StoreError::Decode { path: path.clone(), source })?
                .to_rgb8();

            let encodings = analyzer
                .encodings(&image)
                .map_err(|source| StoreError::Analyze { path: path.clone(), source })?;

            match encodings.into_iter().next() {
                Some(embedding) => store.push(name, embedding),
                None => {
                    tracing::debug!(path = %path.display(), "no face in reference photo; skipped")
                }
            }
        }

        tracing::info!(
            dir = %images_dir.display(),
            identities = store.len(),
            "identity store loaded"
        );
        Ok(store)
    }

    /// Append an identity at the end of the load order.
    pub fn push(&mut self, name: impl Into<String>, embedding: Embedding) {
        self.names.push(name.into());
        self.embeddings.push(embedding);
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
