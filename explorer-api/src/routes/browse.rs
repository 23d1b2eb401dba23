use poem::{
    handler,
    web::{Data, Json, Query},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::{
    dataset::{ClassCount, ImageClass, RelationCount, RelationTriple},
    error::AppError,
};

/// Dataset images are stored as `<image id>.jpg`.
const IMAGE_EXTENSION: &str = "jpg";

#[derive(Debug, Serialize)]
pub struct ClassesView {
    pub classes: Vec<ClassCount>,
    pub total: usize,
}

#[handler]
pub async fn classes(Data(state): Data<&AppState>) -> Result<Json<ClassesView>, AppError> {
    let classes = state.gateway.class_histogram().await?;

    Ok(Json(ClassesView {
        total: classes.len(),
        classes,
    }))
}

#[derive(Debug, Serialize)]
pub struct RelationsView {
    pub relations: Vec<RelationCount>,
    pub total: usize,
}

#[handler]
pub async fn relations(Data(state): Data<&AppState>) -> Result<Json<RelationsView>, AppError> {
    let relations = state.gateway.relation_histogram().await?;

    Ok(Json(RelationsView {
        total: relations.len(),
        relations,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ImageInfoParams {
    pub image_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImageInfoView {
    pub image_id: Option<String>,
    pub image_url: Option<String>,
    pub classes: Vec<ImageClass>,
    pub relations: Vec<RelationTriple>,
}

/// The classes and relations of one image, with a URL to view it.
#[handler]
pub async fn image_info(
    Data(state): Data<&AppState>,
    Query(params): Query<ImageInfoParams>,
) -> Result<Json<ImageInfoView>, AppError> {
    let image_id = params.image_id.filter(|id| !id.is_empty());

    let (image_classes, image_relations) = futures::try_join!(
        state.gateway.image_classes(image_id.as_deref()),
        state.gateway.image_relations(image_id.as_deref()),
    )?;

    let image_url = match &image_id {
        Some(image_id) => {
            let key = format!("{image_id}.{IMAGE_EXTENSION}");
            Some(state.storage.url_for(&key, state.url_expiry).await?)
        }
        None => None,
    };

    tracing::info!(
        "image_info: image_id={image_id:?} classes={} relations={}",
        image_classes.len(),
        image_relations.len()
    );

    Ok(Json(ImageInfoView {
        image_id,
        image_url,
        classes: image_classes,
        relations: image_relations,
    }))
}
