use std::{str::FromStr, time::Duration};

use anyhow::Context;
use bytes::Bytes;
use opendal::{Configurator, Operator, layers::LoggingLayer, services::GcsConfig};
use serde::Serialize;
use thiserror::Error;
use url::Url;

const PUBLIC_READ_ACL: &str = "publicRead";
const PUBLIC_ENDPOINT: &str = "https://storage.googleapis.com";

/// Whether a stored object can be read without a signed URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

/// How the bucket is named and how its images are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketPolicy {
    /// `<project>-images`, linked through signed URLs.
    ///
    /// Signing needs service account key material, so `gcs_credential_path`
    /// should point at a key file.
    #[default]
    Signed,
    /// `<project>.appspot.com`, linked through public URLs.
    Public,
}

impl BucketPolicy {
    pub fn bucket_name(self, project: &str) -> String {
        match self {
            BucketPolicy::Signed => format!("{project}-images"),
            BucketPolicy::Public => format!("{project}.appspot.com"),
        }
    }
}

impl FromStr for BucketPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signed" => Ok(BucketPolicy::Signed),
            "public" => Ok(BucketPolicy::Public),
            other => anyhow::bail!("unknown bucket policy {other:?}, expected \"signed\" or \"public\""),
        }
    }
}

pub struct StorageConfig {
    pub bucket: String,
    pub policy: BucketPolicy,
    pub credential_path: Option<String>,
}

impl StorageConfig {
    /// Whether URLs must be signed without a key file to sign them with.
    pub fn signs_without_key(&self) -> bool {
        self.policy == BucketPolicy::Signed && self.credential_path.is_none()
    }
}

/// A handle to an object that has just been written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    /// The permanent URL of a public object.
    pub url: Option<String>,
    pub visibility: Visibility,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage operation on {key} failed: {source}")]
    Backend {
        key: String,
        #[source]
        source: opendal::Error,
    },
    #[error("cannot build a public URL for {key}")]
    PublicUrl { key: String },
}

/// The bucket uploaded and dataset images live in.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `content` under `key`, replacing any existing object.
    async fn store(
        &self,
        key: &str,
        content: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<StoredObject, StorageError>;

    /// A URL to view the object at `key`.
    ///
    /// It expires after `expiry` unless the bucket is public.
    async fn url_for(&self, key: &str, expiry: Duration) -> Result<String, StorageError>;

    fn bucket(&self) -> &str;
}

/// A Cloud Storage bucket.
///
/// Public objects are written through an operator that applies the
/// `publicRead` ACL, private ones through an operator that does not.
pub struct BucketStore {
    bucket: String,
    policy: BucketPolicy,
    private: Operator,
    public: Operator,
}

impl BucketStore {
    pub fn new(bucket: String, policy: BucketPolicy, private: Operator, public: Operator) -> Self {
        Self {
            bucket,
            policy,
            private,
            public,
        }
    }

    pub fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        if config.signs_without_key() {
            tracing::warn!(
                "No GCS_CREDENTIAL_PATH set for bucket {}, signing image URLs may fail",
                config.bucket
            );
        }

        let private = gcs_operator(config, None)?;
        let public = gcs_operator(config, Some(PUBLIC_READ_ACL))?;

        Ok(Self::new(config.bucket.clone(), config.policy, private, public))
    }

    fn operator(&self, visibility: Visibility) -> &Operator {
        match visibility {
            Visibility::Public => &self.public,
            Visibility::Private => &self.private,
        }
    }

    /// The permanent URL of a public object. Each segment of the key is
    /// percent-encoded, `/` separators are kept.
    fn public_url(&self, key: &str) -> Result<String, StorageError> {
        let invalid = || StorageError::PublicUrl {
            key: key.to_owned(),
        };

        let mut url = Url::parse(PUBLIC_ENDPOINT).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|()| invalid())?
            .pop_if_empty()
            .push(&self.bucket)
            .extend(key.split('/'));

        Ok(url.into())
    }
}

fn gcs_config(config: &StorageConfig, predefined_acl: Option<&str>) -> GcsConfig {
    let mut gcs = GcsConfig::default();
    gcs.bucket = config.bucket.clone();
    gcs.credential_path = config.credential_path.clone();
    gcs.predefined_acl = predefined_acl.map(str::to_owned);
    gcs
}

fn gcs_operator(config: &StorageConfig, predefined_acl: Option<&str>) -> anyhow::Result<Operator> {
    let gcs = gcs_config(config, predefined_acl);

    let operator = Operator::new(gcs.into_builder())
        .context("Failed to build OpenDAL operator for Cloud Storage")?
        .layer(LoggingLayer::default())
        .finish();

    Ok(operator)
}

#[async_trait::async_trait]
impl ObjectStore for BucketStore {
    #[tracing::instrument(skip(self, content), fields(bucket = %self.bucket, bytes = content.len()))]
    async fn store(
        &self,
        key: &str,
        content: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<StoredObject, StorageError> {
        self.operator(visibility)
            .write_with(key, content)
            .content_type(content_type)
            .await
            .map_err(|source| StorageError::Backend {
                key: key.to_owned(),
                source,
            })?;

        let url = match visibility {
            Visibility::Public => Some(self.public_url(key)?),
            Visibility::Private => None,
        };
        tracing::debug!("Stored {key} as {visibility:?}");

        Ok(StoredObject {
            bucket: self.bucket.clone(),
            key: key.to_owned(),
            url,
            visibility,
        })
    }

    async fn url_for(&self, key: &str, expiry: Duration) -> Result<String, StorageError> {
        match self.policy {
            BucketPolicy::Public => self.public_url(key),
            BucketPolicy::Signed => {
                let request = self
                    .private
                    .presign_read(key, expiry)
                    .await
                    .map_err(|source| StorageError::Backend {
                        key: key.to_owned(),
                        source,
                    })?;

                Ok(request.uri().to_string())
            }
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
