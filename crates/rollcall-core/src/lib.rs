//! rollcall-core: face detection, recognition and matching.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference.

use std::path::PathBuf;

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use detector::FaceDetector;
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, DEFAULT_TOLERANCE};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Embedding};

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default location of the ONNX model files: `$XDG_DATA_HOME/rollcall/models`,
/// falling back to `$HOME/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}
