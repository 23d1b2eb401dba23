//! Image classification for the explorer.
//!
//! The classifier is loaded once at startup and shared read-only between
//! requests through [`Classifier`] trait objects.

pub mod classifier;
pub mod dictionary;
pub mod onnx;

pub use classifier::{Classification, Classifier, ClassifyError, LoadError, MinConfidence, rank};
pub use dictionary::LabelDictionary;
pub use onnx::{ModelOptions, OnnxClassifier};

use ort::execution_providers::{CUDAExecutionProvider, CoreMLExecutionProvider};

/// Initialize the ONNX runtime environment.
///
/// Must run once before any [`OnnxClassifier`] is loaded. Execution providers
/// that are unavailable on this machine are skipped and inference falls back
/// to the CPU.
pub fn init_runtime() -> ort::Result<()> {
    ort::init()
        .with_name("explorer")
        .with_execution_providers([
            CUDAExecutionProvider::default().build(),
            CoreMLExecutionProvider::default().build(),
        ])
        .with_telemetry(false)
        .commit()?;

    tracing::debug!("Initialized ONNX runtime");

    Ok(())
}
