use std::fmt;

use anyhow::bail;

/// The schema holding the `classes`, `image_labels` and `relations` tables.
///
/// It is the only identifier formatted into query text, so it is restricted to
/// a plain SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSchema(String);

impl DatasetSchema {
    pub fn new(name: impl Into<String>) -> anyhow::Result<Self> {
        let name = name.into();

        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            bail!("invalid dataset name {name:?}: expected a plain SQL identifier");
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The queries the gateway knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryShape {
    ClassHistogram,
    RelationHistogram,
    ImageClasses,
    ImageRelations,
    ImageSearch,
    RelationSearch,
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryShape::ClassHistogram => "classes",
            QueryShape::RelationHistogram => "relations",
            QueryShape::ImageClasses => "image_classes",
            QueryShape::ImageRelations => "image_relations",
            QueryShape::ImageSearch => "image_search",
            QueryShape::RelationSearch => "relation_search",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    String(String),
    Integer(i64),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::String(_) => "STRING",
            ParamValue::Integer(_) => "INTEGER",
        }
    }
}

/// A named parameter, bound to the placeholder matching its position (`$1`, `$2`, …).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParam {
    pub name: &'static str,
    pub value: ParamValue,
}

impl BoundParam {
    fn string(name: &'static str, value: &str) -> Self {
        Self {
            name,
            value: ParamValue::String(value.to_owned()),
        }
    }

    fn integer(name: &'static str, value: i64) -> Self {
        Self {
            name,
            value: ParamValue::Integer(value),
        }
    }
}

/// Query text plus the values bound to its placeholders.
///
/// Request values only ever travel in `params`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub shape: QueryShape,
    pub sql: String,
    pub params: Vec<BoundParam>,
}

impl Statement {
    pub fn class_histogram(schema: &DatasetSchema) -> Self {
        let ds = schema.as_str();

        Self {
            shape: QueryShape::ClassHistogram,
            sql: format!(
                r#"
                SELECT c.description, COUNT(*) AS num_images
                FROM {ds}.image_labels AS l
                JOIN {ds}.classes AS c USING (label)
                GROUP BY c.description
                ORDER BY c.description
                "#
            ),
            params: Vec::new(),
        }
    }

    pub fn relation_histogram(schema: &DatasetSchema) -> Self {
        let ds = schema.as_str();

        Self {
            shape: QueryShape::RelationHistogram,
            sql: format!(
                r#"
                SELECT r.relation, COUNT(r.relation) AS occurrences
                FROM {ds}.relations AS r
                WHERE r.relation IS NOT NULL
                GROUP BY r.relation
                ORDER BY r.relation
                "#
            ),
            params: Vec::new(),
        }
    }

    pub fn image_classes(schema: &DatasetSchema, image_id: &str) -> Self {
        let ds = schema.as_str();

        Self {
            shape: QueryShape::ImageClasses,
            sql: format!(
                r#"
                SELECT c.label, c.description
                FROM {ds}.image_labels AS l
                JOIN {ds}.classes AS c USING (label)
                WHERE l.image_id = $1
                ORDER BY c.description
                "#
            ),
            params: vec![BoundParam::string("image_id", image_id)],
        }
    }

    pub fn image_relations(schema: &DatasetSchema, image_id: &str) -> Self {
        let ds = schema.as_str();

        Self {
            shape: QueryShape::ImageRelations,
            sql: format!(
                r#"
                SELECT c1.description AS subject, r.relation, c2.description AS object
                FROM {ds}.relations AS r
                JOIN {ds}.classes AS c1 ON c1.label = r.label1
                JOIN {ds}.classes AS c2 ON c2.label = r.label2
                WHERE r.image_id = $1
                  AND EXISTS (SELECT 1 FROM {ds}.image_labels AS l1 WHERE l1.image_id = r.image_id AND l1.label = r.label1)
                  AND EXISTS (SELECT 1 FROM {ds}.image_labels AS l2 WHERE l2.image_id = r.image_id AND l2.label = r.label2)
                GROUP BY c1.description, r.relation, c2.description
                ORDER BY c1.description, r.relation, c2.description
                "#
            ),
            params: vec![BoundParam::string("image_id", image_id)],
        }
    }

    pub fn image_search(schema: &DatasetSchema, description: &str, limit: i64) -> Self {
        let ds = schema.as_str();

        Self {
            shape: QueryShape::ImageSearch,
            sql: format!(
                r#"
                SELECT l.image_id
                FROM {ds}.classes AS c
                JOIN {ds}.image_labels AS l USING (label)
                WHERE c.description = $1
                GROUP BY l.image_id
                ORDER BY l.image_id
                LIMIT $2
                "#
            ),
            params: vec![
                BoundParam::string("description", description),
                BoundParam::integer("image_limit", limit),
            ],
        }
    }

    /// Relations whose subject and object descriptions contain the class
    /// filters. An empty class filter matches nothing.
    pub fn relation_search(
        schema: &DatasetSchema,
        class1: &str,
        relation: &str,
        class2: &str,
        limit: i64,
    ) -> Self {
        let ds = schema.as_str();

        Self {
            shape: QueryShape::RelationSearch,
            sql: format!(
                r#"
                SELECT r.image_id, c1.description AS subject, c2.description AS object
                FROM {ds}.relations AS r
                JOIN {ds}.classes AS c1 ON c1.label = r.label1 AND c1.description LIKE '%' || $1 || '%'
                JOIN {ds}.classes AS c2 ON c2.label = r.label2 AND c2.description LIKE '%' || $3 || '%'
                WHERE r.relation = $2 AND $1 <> '' AND $3 <> ''
                  AND EXISTS (SELECT 1 FROM {ds}.image_labels AS l1 WHERE l1.image_id = r.image_id AND l1.label = r.label1)
                  AND EXISTS (SELECT 1 FROM {ds}.image_labels AS l2 WHERE l2.image_id = r.image_id AND l2.label = r.label2)
                GROUP BY r.image_id, c1.description, c2.description
                ORDER BY r.image_id, c1.description, c2.description
                LIMIT $4
                "#
            ),
            params: vec![
                BoundParam::string("class1", class1),
                BoundParam::string("relation", relation),
                BoundParam::string("class2", class2),
                BoundParam::integer("image_limit", limit),
            ],
        }
    }
}
