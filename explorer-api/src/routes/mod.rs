//! The HTTP surface.
//!
//! Every handler answers with a JSON document of named result sequences and
//! scalars. Failures are answered with an [`AppError`](crate::error::AppError)
//! document instead of a partial result.

pub(crate) mod browse;
pub(crate) mod classify;
pub(crate) mod search;

use std::{sync::Arc, time::Duration};

use explorer_vision::Classifier;
use poem::{
    Endpoint, EndpointExt, Route, get, handler, middleware::Tracing, post, web::Html,
};

use crate::{dataset::QueryGateway, storage::ObjectStore};

/// Everything the handlers share. It is built once at startup and never mutated.
#[derive(Clone)]
pub struct AppState {
    pub gateway: QueryGateway,
    pub storage: Arc<dyn ObjectStore>,
    pub classifier: Arc<dyn Classifier>,
    /// How long the image URLs handed out by `/image_info` stay valid.
    pub url_expiry: Duration,
}

const INDEX_HTML: &str = include_str!("../../static/index.html");

#[handler]
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub fn router(state: AppState) -> impl Endpoint {
    Route::new()
        .at("/", get(index))
        .at("/classes", get(browse::classes))
        .at("/relations", get(browse::relations))
        .at("/image_info", get(browse::image_info))
        .at("/image_search", get(search::image_search))
        .at("/relation_search", get(search::relation_search))
        .at(
            "/image_classify_classes",
            get(classify::image_classify_classes),
        )
        .at("/image_classify", post(classify::image_classify))
        .with(Tracing)
        .data(state)
}
