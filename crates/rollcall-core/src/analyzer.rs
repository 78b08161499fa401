//! Face analysis seam: locate faces in an RGB image and embed each of them.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("analyzer failed: {0}")]
    Other(String),
}

/// Detects faces and produces one embedding per detected face.
pub trait FaceAnalyzer {
    /// Bounding boxes of all faces in `image`, best detection first.
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// One embedding per entry of `faces`, in the same order.
    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError>;

    /// Locate every face, then embed each one. Empty when no face is found.
    fn encodings(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, AnalyzerError> {
        let faces = self.locate(image)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        self.encode(image, &faces)
    }
}

/// SCRFD detection followed by ArcFace embedding.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Load both models from their ONNX files.
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self::new(detector, recognizer))
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        let faces = self.detector.detect(image)?;
        tracing::trace!(count = faces.len(), "faces located");
        Ok(faces)
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError> {
        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(AnalyzerError::from))
            .collect()
    }
}
