use poem::{
    handler,
    web::{Data, Json, Query},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::{
    dataset::{ImageHit, ImageLimit, RelationFilter, RelationMatch},
    error::AppError,
};

/// Limits arrive as raw text so that bad input can fall back to the default
/// instead of failing the request.
#[derive(Debug, Deserialize)]
pub struct ImageSearchParams {
    pub description: Option<String>,
    pub image_limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImageSearchView {
    pub description: String,
    pub image_limit: ImageLimit,
    pub images: Vec<ImageHit>,
    pub total: usize,
}

#[handler]
pub async fn image_search(
    Data(state): Data<&AppState>,
    Query(params): Query<ImageSearchParams>,
) -> Result<Json<ImageSearchView>, AppError> {
    let description = params.description.unwrap_or_default();
    let image_limit = ImageLimit::parse(params.image_limit.as_deref());

    let images = state
        .gateway
        .search_images(&description, image_limit)
        .await?;

    Ok(Json(ImageSearchView {
        description,
        image_limit,
        total: images.len(),
        images,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RelationSearchParams {
    pub class1: Option<String>,
    pub relation: Option<String>,
    pub class2: Option<String>,
    pub image_limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RelationSearchView {
    #[serde(flatten)]
    pub filter: RelationFilter,
    pub image_limit: ImageLimit,
    pub matches: Vec<RelationMatch>,
    pub total: usize,
}

#[handler]
pub async fn relation_search(
    Data(state): Data<&AppState>,
    Query(params): Query<RelationSearchParams>,
) -> Result<Json<RelationSearchView>, AppError> {
    let filter = RelationFilter::new(params.class1, params.relation, params.class2);
    let image_limit = ImageLimit::parse(params.image_limit.as_deref());

    let matches = state
        .gateway
        .search_relations(&filter, image_limit)
        .await?;

    Ok(Json(RelationSearchView {
        filter,
        image_limit,
        total: matches.len(),
        matches,
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        dataset::{QueryShape, statement::ParamValue},
        testing::{Harness, ScriptedWarehouse, json_body},
    };

    fn cat_images() -> ScriptedWarehouse {
        ScriptedWarehouse::default().with_rows(
            QueryShape::ImageSearch,
            vec![
                json!({ "image_id": "0001eeaf4aed83f9" }),
                json!({ "image_id": "000a1249af2bc5f0" }),
            ],
        )
    }

    #[tokio::test]
    async fn image_search_reports_count_with_rows() {
        let harness = Harness::new(cat_images());

        let response = harness
            .client()
            .get("/image_search?description=Cat&image_limit=2")
            .send()
            .await;

        response.assert_status_is_ok();
        assert_eq!(
            json_body(response).await,
            json!({
                "description": "Cat",
                "image_limit": 2,
                "images": [
                    { "image_id": "0001eeaf4aed83f9" },
                    { "image_id": "000a1249af2bc5f0" },
                ],
                "total": 2,
            })
        );
        let issued = harness.warehouse.issued();
        assert_eq!(issued[0].params[0].value, ParamValue::String("Cat".into()));
        assert_eq!(issued[0].params[1].value, ParamValue::Integer(2));
    }

    #[tokio::test]
    async fn image_search_defaults_non_numeric_limit() {
        let harness = Harness::new(cat_images());

        let response = harness
            .client()
            .get("/image_search?description=Cat&image_limit=many")
            .send()
            .await;

        response.assert_status_is_ok();
        assert_eq!(json_body(response).await["image_limit"], 10);
        assert_eq!(
            harness.warehouse.issued()[0].params[1].value,
            ParamValue::Integer(10)
        );
    }

    #[tokio::test]
    async fn image_search_with_non_positive_limit_is_empty() {
        for limit in ["0", "-4"] {
            let harness = Harness::new(cat_images());

            let response = harness
                .client()
                .get(format!("/image_search?description=Cat&image_limit={limit}"))
                .send()
                .await;

            response.assert_status_is_ok();
            let body = json_body(response).await;
            assert_eq!(body["images"], json!([]));
            assert_eq!(body["total"], 0);
            assert!(harness.warehouse.issued().is_empty());
        }
    }

    #[tokio::test]
    async fn relation_search_defaults_to_wildcards() {
        let harness = Harness::new(ScriptedWarehouse::default().with_rows(
            QueryShape::RelationSearch,
            vec![json!({ "image_id": "0001eeaf4aed83f9", "subject": "Man", "object": "Guitar" })],
        ));

        let response = harness
            .client()
            .get("/relation_search?relation=plays")
            .send()
            .await;

        response.assert_status_is_ok();
        let body = json_body(response).await;
        assert_eq!(body["class1"], "%");
        assert_eq!(body["relation"], "plays");
        assert_eq!(body["class2"], "%");
        assert_eq!(body["image_limit"], 10);
        assert_eq!(body["matches"][0]["object"], "Guitar");
        assert_eq!(body["total"], 1);

        let values = harness.warehouse.issued()[0]
            .params
            .iter()
            .map(|param| param.value.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            values,
            vec![
                ParamValue::String("%".into()),
                ParamValue::String("plays".into()),
                ParamValue::String("%".into()),
                ParamValue::Integer(10),
            ]
        );
    }

    #[tokio::test]
    async fn relation_search_with_an_empty_class_is_empty() {
        for query in [
            "class1=&relation=plays&class2=Guitar",
            "class1=Man&relation=plays&class2=",
        ] {
            let harness = Harness::new(ScriptedWarehouse::default().with_rows(
                QueryShape::RelationSearch,
                vec![json!({ "image_id": "0001eeaf4aed83f9", "subject": "Man", "object": "Guitar" })],
            ));

            let response = harness
                .client()
                .get(format!("/relation_search?{query}"))
                .send()
                .await;

            response.assert_status_is_ok();
            let body = json_body(response).await;
            assert_eq!(body["matches"], json!([]));
            assert_eq!(body["total"], 0);
            assert!(harness.warehouse.issued().is_empty());
        }
    }
}
