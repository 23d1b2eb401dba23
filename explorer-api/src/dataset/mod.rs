//! Queries against the image annotation dataset.
//!
//! Every query shape has its own record type, decoded as soon as the
//! warehouse answers. Ordering is part of each statement, so callers never
//! re-sort.

pub mod statement;
pub mod warehouse;

use std::sync::Arc;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub use statement::{DatasetSchema, QueryShape, Statement};
pub use warehouse::{PgWarehouse, QueryError, Warehouse};

/// A class of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageClass {
    pub label: String,
    pub description: String,
}

/// How many label assignments a class description has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCount {
    pub description: String,
    pub num_images: i64,
}

/// How often a relation occurs in the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationCount {
    pub relation: String,
    pub occurrences: i64,
}

/// A directed relation between two labelled regions of one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTriple {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHit {
    pub image_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMatch {
    pub image_id: String,
    pub subject: String,
    pub object: String,
}

/// The maximum number of rows a search returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImageLimit(i64);

impl ImageLimit {
    pub const DEFAULT: i64 = 10;

    /// Parse a limit from a query string. Absent or non-numeric input falls
    /// back to the default.
    pub fn parse(raw: Option<&str>) -> Self {
        let limit = raw
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(Self::DEFAULT);

        Self(limit)
    }

    /// The row cap to bind, or `None` when the search can only be empty.
    pub fn rows(self) -> Option<i64> {
        (self.0 > 0).then_some(self.0)
    }
}

impl Default for ImageLimit {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// The filters of a relation search.
///
/// The class filters are substring patterns (`%` and `_` wildcards allowed),
/// the relation is matched exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationFilter {
    pub class1: String,
    pub relation: String,
    pub class2: String,
}

impl RelationFilter {
    pub const WILDCARD: &'static str = "%";

    /// Absent parameters match anything.
    pub fn new(class1: Option<String>, relation: Option<String>, class2: Option<String>) -> Self {
        let or_wildcard = |value: Option<String>| value.unwrap_or_else(|| Self::WILDCARD.to_owned());

        Self {
            class1: or_wildcard(class1),
            relation: or_wildcard(relation),
            class2: or_wildcard(class2),
        }
    }

    /// An empty class filter is not a filter, and the search matches nothing.
    pub fn is_searchable(&self) -> bool {
        !self.class1.is_empty() && !self.class2.is_empty()
    }
}

/// Runs the dataset queries against a [`Warehouse`].
#[derive(Clone)]
pub struct QueryGateway {
    warehouse: Arc<dyn Warehouse>,
    schema: DatasetSchema,
}

impl QueryGateway {
    pub fn new(warehouse: Arc<dyn Warehouse>, schema: DatasetSchema) -> Self {
        Self { warehouse, schema }
    }

    pub async fn class_histogram(&self) -> Result<Vec<ClassCount>, QueryError> {
        self.fetch(Statement::class_histogram(&self.schema)).await
    }

    pub async fn relation_histogram(&self) -> Result<Vec<RelationCount>, QueryError> {
        self.fetch(Statement::relation_histogram(&self.schema)).await
    }

    /// The classes of an image. Without an image ID there is nothing to look up.
    pub async fn image_classes(&self, image_id: Option<&str>) -> Result<Vec<ImageClass>, QueryError> {
        let Some(image_id) = image_id.filter(|id| !id.is_empty()) else {
            return Ok(Vec::new());
        };

        self.fetch(Statement::image_classes(&self.schema, image_id))
            .await
    }

    pub async fn image_relations(
        &self,
        image_id: Option<&str>,
    ) -> Result<Vec<RelationTriple>, QueryError> {
        let Some(image_id) = image_id.filter(|id| !id.is_empty()) else {
            return Ok(Vec::new());
        };

        self.fetch(Statement::image_relations(&self.schema, image_id))
            .await
    }

    pub async fn search_images(
        &self,
        description: &str,
        limit: ImageLimit,
    ) -> Result<Vec<ImageHit>, QueryError> {
        let Some(limit) = limit.rows() else {
            return Ok(Vec::new());
        };

        self.fetch(Statement::image_search(&self.schema, description, limit))
            .await
    }

    pub async fn search_relations(
        &self,
        filter: &RelationFilter,
        limit: ImageLimit,
    ) -> Result<Vec<RelationMatch>, QueryError> {
        let Some(limit) = limit.rows() else {
            return Ok(Vec::new());
        };
        if !filter.is_searchable() {
            tracing::debug!("relation_search: empty class filter, skipping the query");
            return Ok(Vec::new());
        }

        self.fetch(Statement::relation_search(
            &self.schema,
            &filter.class1,
            &filter.relation,
            &filter.class2,
            limit,
        ))
        .await
    }

    async fn fetch<T: DeserializeOwned>(&self, statement: Statement) -> Result<Vec<T>, QueryError> {
        let results = self.warehouse.run_query(&statement).await?;
        tracing::info!("{}: results={}", statement.shape, results.total_rows());

        results.decode(statement.shape)
    }
}
