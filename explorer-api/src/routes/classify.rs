use bytes::Bytes;
use explorer_vision::{Classification, ClassifyError, MinConfidence};
use futures::{StreamExt, stream};
use poem::{
    handler,
    web::{Data, Json, Multipart},
};
use serde::Serialize;

use super::AppState;
use crate::{error::AppError, storage::Visibility};

/// Files of one request classified at the same time.
const CLASSIFY_CONCURRENCY: usize = 4;

const FILES_FIELD: &str = "files";
const MIN_CONFIDENCE_FIELD: &str = "min_confidence";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
pub struct LabelsView {
    pub labels: Vec<String>,
    pub total: usize,
}

/// The labels the classifier can assign.
#[handler]
pub async fn image_classify_classes(Data(state): Data<&AppState>) -> Json<LabelsView> {
    let labels = state
        .classifier
        .labels()
        .sorted()
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();

    Json(LabelsView {
        total: labels.len(),
        labels,
    })
}

struct UploadedImage {
    filename: String,
    content_type: String,
    content: Bytes,
}

#[derive(Debug, Serialize)]
pub struct FileResult {
    pub filename: String,
    pub content_type: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Classified {
        classifications: Vec<Classification>,
        url: Option<String>,
    },
    /// The image was classified but could not be kept.
    StoreFailed {
        classifications: Vec<Classification>,
        error: String,
    },
    ClassifyFailed {
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ClassifyView {
    pub bucket: String,
    pub min_confidence: MinConfidence,
    pub results: Vec<FileResult>,
}

/// Classify every uploaded file and keep it in the bucket.
///
/// A file that fails does not fail the batch, its result carries the error.
#[handler]
pub async fn image_classify(
    Data(state): Data<&AppState>,
    mut multipart: Multipart,
) -> Result<Json<ClassifyView>, AppError> {
    let mut files = Vec::new();
    let mut min_confidence = MinConfidence::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::ValidationFailed(err.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(FILES_FIELD) => {
                let Some(filename) = field.file_name().filter(|name| !name.is_empty()) else {
                    continue;
                };
                let filename = filename.to_owned();
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_owned();
                let content = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::ValidationFailed(format!("{filename}: {err}")))?;

                files.push(UploadedImage {
                    filename,
                    content_type,
                    content: content.into(),
                });
            }
            Some(MIN_CONFIDENCE_FIELD) => {
                let raw = field
                    .text()
                    .await
                    .map_err(|err| AppError::ValidationFailed(err.to_string()))?;
                min_confidence = MinConfidence::parse(Some(&raw));
            }
            _ => {}
        }
    }

    tracing::info!(
        "image_classify: files={} min_confidence={}",
        files.len(),
        min_confidence.get()
    );

    let results = stream::iter(files)
        .map(|file| process_file(state, file, min_confidence))
        .buffered(CLASSIFY_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

    Ok(Json(ClassifyView {
        bucket: state.storage.bucket().to_owned(),
        min_confidence,
        results,
    }))
}

async fn process_file(
    state: &AppState,
    file: UploadedImage,
    min_confidence: MinConfidence,
) -> FileResult {
    let outcome = match classify(state, file.content.clone(), min_confidence).await {
        Err(err) => {
            let err = AppError::from(err);
            tracing::warn!("Failed to classify {}: {err}", file.filename);
            FileOutcome::ClassifyFailed {
                error: err.to_string(),
            }
        }
        Ok(classifications) => match state
            .storage
            .store(&file.filename, file.content, &file.content_type, Visibility::Public)
            .await
        {
            Ok(stored) => {
                tracing::info!(
                    "image_classify: filename={} key={} classifications={}",
                    file.filename,
                    stored.key,
                    classifications.len()
                );
                FileOutcome::Classified {
                    classifications,
                    url: stored.url,
                }
            }
            Err(err) => {
                let err = AppError::from(err);
                tracing::warn!("Failed to store {}: {err}", file.filename);
                FileOutcome::StoreFailed {
                    classifications,
                    error: err.to_string(),
                }
            }
        },
    };

    FileResult {
        filename: file.filename,
        content_type: file.content_type,
        outcome,
    }
}

async fn classify(
    state: &AppState,
    content: Bytes,
    min_confidence: MinConfidence,
) -> Result<Vec<Classification>, ClassifyError> {
    let classifier = state.classifier.clone();

    tokio::task::spawn_blocking(move || classifier.classify(&content, min_confidence))
        .await
        .map_err(|err| ClassifyError::Aborted(err.to_string()))?
}
