use std::{cmp::Ordering, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::dictionary::LabelDictionary;

/// A label assigned to an image by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// The description of the class.
    pub label: String,
    /// The confidence of the classification.
    ///
    /// It should be in the range of 0.0 to 1.0.
    pub confidence: f32,
}

/// The lowest confidence a classification must reach to be reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MinConfidence(f32);

impl MinConfidence {
    pub const DEFAULT: f32 = 0.25;

    /// Non-finite thresholds fall back to the default.
    pub fn new(value: f32) -> Self {
        if value.is_finite() {
            Self(value)
        } else {
            Self::default()
        }
    }

    /// Parse a threshold from a form field. Absent or non-numeric input falls
    /// back to the default.
    pub fn parse(raw: Option<&str>) -> Self {
        raw.and_then(|raw| raw.trim().parse::<f32>().ok())
            .map_or_else(Self::default, Self::new)
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for MinConfidence {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Classifies images against a fixed label dictionary.
///
/// Implementations hold read-only state and are shared between requests.
/// They must be deterministic: the same bytes and threshold always produce the
/// same classifications.
pub trait Classifier: Send + Sync {
    /// Classify one encoded image.
    ///
    /// Every returned classification has a confidence of at least
    /// `min_confidence`, ordered from the most to the least confident.
    fn classify(
        &self,
        image: &[u8],
        min_confidence: MinConfidence,
    ) -> Result<Vec<Classification>, ClassifyError>;

    fn labels(&self) -> &LabelDictionary;
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("model executor failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("model produced {outputs} scores but the dictionary has {labels} labels")]
    LabelMismatch { outputs: usize, labels: usize },
    #[error("classification was aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model file not found: {}", .0.display())]
    ModelFileNotFound(PathBuf),
    #[error("failed to read label dictionary {}: {source}", path.display())]
    Dictionary {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build model session: {0}")]
    Session(#[from] ort::Error),
}

/// Turn per-label scores into ranked classifications.
///
/// Scores below `min_confidence` and outputs without a label are dropped.
/// Equal confidences are ordered by label so that the ranking is stable.
pub fn rank(
    scores: &[f32],
    labels: &LabelDictionary,
    min_confidence: MinConfidence,
) -> Result<Vec<Classification>, ClassifyError> {
    if scores.len() > labels.len() {
        return Err(ClassifyError::LabelMismatch {
            outputs: scores.len(),
            labels: labels.len(),
        });
    }

    let mut classifications = scores
        .iter()
        .enumerate()
        .filter(|(_, confidence)| **confidence >= min_confidence.get())
        .filter_map(|(index, confidence)| {
            labels.get(index).map(|label| Classification {
                label: label.to_string(),
                confidence: *confidence,
            })
        })
        .collect::<Vec<_>>();

    classifications.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });

    Ok(classifications)
}
