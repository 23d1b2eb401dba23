use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{Column as _, Row as _, TypeInfo as _, postgres::PgRow};
use thiserror::Error;

use super::statement::{ParamValue, QueryShape, Statement};

/// One result row: column name to value.
pub type Row = serde_json::Map<String, Value>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{shape} query failed: {source}")]
    Execute {
        shape: QueryShape,
        #[source]
        source: BoxError,
    },
    #[error("{shape} query returned column {column} of unsupported type {type_name}")]
    UnsupportedColumn {
        shape: QueryShape,
        column: String,
        type_name: String,
    },
    #[error("failed to decode {shape} row: {source}")]
    Decode {
        shape: QueryShape,
        #[source]
        source: serde_json::Error,
    },
}

/// The rows returned by a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    /// Decode every row into the record type of the query shape.
    pub fn decode<T: DeserializeOwned>(self, shape: QueryShape) -> Result<Vec<T>, QueryError> {
        self.rows
            .into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row))
                    .map_err(|source| QueryError::Decode { shape, source })
            })
            .collect()
    }
}

/// The analytical database holding the dataset.
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync {
    async fn run_query(&self, statement: &Statement) -> Result<ResultSet, QueryError>;
}

/// A warehouse speaking the PostgreSQL protocol.
#[derive(Clone)]
pub struct PgWarehouse(sqlx::PgPool);

impl PgWarehouse {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = sqlx::PgPool::connect(url).await?;

        Ok(Self(pool))
    }
}

#[async_trait::async_trait]
impl Warehouse for PgWarehouse {
    #[tracing::instrument(skip(self, statement), fields(shape = %statement.shape))]
    async fn run_query(&self, statement: &Statement) -> Result<ResultSet, QueryError> {
        let shape = statement.shape;

        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            tracing::debug!(
                "binding {} {} parameter",
                param.name,
                param.value.type_name()
            );
            query = match &param.value {
                ParamValue::String(value) => query.bind(value.clone()),
                ParamValue::Integer(value) => query.bind(*value),
            };
        }

        let rows = query
            .fetch_all(&self.0)
            .await
            .map_err(|err| QueryError::Execute {
                shape,
                source: err.into(),
            })?;

        let rows = rows
            .iter()
            .map(|row| decode_row(shape, row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResultSet::new(rows))
    }
}

fn decode_row(shape: QueryShape, row: &PgRow) -> Result<Row, QueryError> {
    let mut decoded = Row::new();

    for column in row.columns() {
        let index = column.ordinal();
        let type_name = column.type_info().name();

        let value = match type_name {
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(index).map(Value::from)
            }
            "INT8" => row.try_get::<Option<i64>, _>(index).map(Value::from),
            "INT4" => row.try_get::<Option<i32>, _>(index).map(Value::from),
            "INT2" => row.try_get::<Option<i16>, _>(index).map(Value::from),
            "FLOAT8" => row.try_get::<Option<f64>, _>(index).map(Value::from),
            "FLOAT4" => row.try_get::<Option<f32>, _>(index).map(Value::from),
            "BOOL" => row.try_get::<Option<bool>, _>(index).map(Value::from),
            _ => {
                return Err(QueryError::UnsupportedColumn {
                    shape,
                    column: column.name().to_owned(),
                    type_name: type_name.to_owned(),
                });
            }
        }
        .map_err(|err| QueryError::Execute {
            shape,
            source: err.into(),
        })?;

        decoded.insert(column.name().to_owned(), value);
    }

    Ok(decoded)
}
