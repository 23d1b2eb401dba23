//! Test doubles for the external services.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use explorer_vision::{
    Classification, Classifier, ClassifyError, LabelDictionary, MinConfidence, rank,
};
use image::{ImageFormat, Rgb, RgbImage};
use poem::{
    Endpoint,
    test::{TestClient, TestResponse},
};
use serde_json::Value;

use crate::{
    dataset::{
        DatasetSchema, QueryError, QueryGateway, QueryShape, Statement, Warehouse,
        warehouse::{ResultSet, Row},
    },
    routes::{AppState, router},
    storage::{ObjectStore, StorageError, StoredObject, Visibility},
};

/// Answers each query shape with canned rows and records what was asked.
#[derive(Default)]
pub struct ScriptedWarehouse {
    rows: HashMap<QueryShape, Vec<Row>>,
    failing: HashSet<QueryShape>,
    issued: Mutex<Vec<Statement>>,
}

impl ScriptedWarehouse {
    pub fn with_rows(mut self, shape: QueryShape, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(row) => row,
                other => panic!("rows must be JSON objects, got {other}"),
            })
            .collect();
        self.rows.insert(shape, rows);
        self
    }

    pub fn failing(mut self, shape: QueryShape) -> Self {
        self.failing.insert(shape);
        self
    }

    pub fn issued(&self) -> Vec<Statement> {
        self.issued.lock().unwrap().clone()
    }

    pub fn issued_shapes(&self) -> Vec<QueryShape> {
        self.issued().iter().map(|statement| statement.shape).collect()
    }
}

#[async_trait::async_trait]
impl Warehouse for ScriptedWarehouse {
    async fn run_query(&self, statement: &Statement) -> Result<ResultSet, QueryError> {
        self.issued.lock().unwrap().push(statement.clone());

        if self.failing.contains(&statement.shape) {
            return Err(QueryError::Execute {
                shape: statement.shape,
                source: "connection refused".into(),
            });
        }

        let rows = self.rows.get(&statement.shape).cloned().unwrap_or_default();
        Ok(ResultSet::new(rows))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryObject {
    pub content: Bytes,
    pub content_type: String,
    pub visibility: Visibility,
}

/// A bucket kept in memory. Writes to `failing_keys` are denied.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
    failing_keys: HashSet<String>,
}

impl MemoryStore {
    pub const BUCKET: &'static str = "test-images";

    pub fn failing_on(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_owned());
        self
    }

    pub fn object(&self, key: &str) -> Option<MemoryObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn store(
        &self,
        key: &str,
        content: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<StoredObject, StorageError> {
        if self.failing_keys.contains(key) {
            return Err(StorageError::Backend {
                key: key.to_owned(),
                source: opendal::Error::new(opendal::ErrorKind::PermissionDenied, "write denied"),
            });
        }

        self.objects.lock().unwrap().insert(
            key.to_owned(),
            MemoryObject {
                content,
                content_type: content_type.to_owned(),
                visibility,
            },
        );

        let url = match visibility {
            Visibility::Public => Some(format!("https://public.test/{}/{key}", Self::BUCKET)),
            Visibility::Private => None,
        };

        Ok(StoredObject {
            bucket: Self::BUCKET.to_owned(),
            key: key.to_owned(),
            url,
            visibility,
        })
    }

    async fn url_for(&self, key: &str, expiry: Duration) -> Result<String, StorageError> {
        Ok(format!(
            "https://signed.test/{}/{key}?expires={}",
            Self::BUCKET,
            expiry.as_secs()
        ))
    }

    fn bucket(&self) -> &str {
        Self::BUCKET
    }
}

/// Decodes the image for real, then scores label `n` with `1 / (n + 1)`.
pub struct StubClassifier {
    labels: LabelDictionary,
    calls: AtomicUsize,
}

impl StubClassifier {
    pub fn new(dictionary: &str) -> Self {
        Self {
            labels: LabelDictionary::parse(dictionary),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for StubClassifier {
    fn classify(
        &self,
        image: &[u8],
        min_confidence: MinConfidence,
    ) -> Result<Vec<Classification>, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        image::load_from_memory(image)?;

        let scores = (0..self.labels.len())
            .map(|index| 1.0 / (index + 1) as f32)
            .collect::<Vec<_>>();

        rank(&scores, &self.labels, min_confidence)
    }

    fn labels(&self) -> &LabelDictionary {
        &self.labels
    }
}

pub fn png() -> Vec<u8> {
    let image = RgbImage::from_pixel(4, 4, Rgb([200, 30, 30]));
    let mut buf = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// The router wired to in-memory services.
pub struct Harness {
    pub warehouse: Arc<ScriptedWarehouse>,
    pub store: Arc<MemoryStore>,
    pub classifier: Arc<StubClassifier>,
}

impl Harness {
    pub const URL_EXPIRY: Duration = Duration::from_secs(3600);

    pub fn new(warehouse: ScriptedWarehouse) -> Self {
        Self {
            warehouse: Arc::new(warehouse),
            store: Arc::new(MemoryStore::default()),
            classifier: Arc::new(StubClassifier::new("Cat\nDog\nBird\nCat\n")),
        }
    }

    pub fn with_store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn client(&self) -> TestClient<impl Endpoint> {
        let state = AppState {
            gateway: QueryGateway::new(
                self.warehouse.clone(),
                DatasetSchema::new("openimages").unwrap(),
            ),
            storage: self.store.clone(),
            classifier: self.classifier.clone(),
            url_expiry: Self::URL_EXPIRY,
        };

        TestClient::new(router(state))
    }
}

pub async fn json_body(response: TestResponse) -> Value {
    response.0.into_body().into_json::<Value>().await.unwrap()
}
