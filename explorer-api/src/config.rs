use std::{collections::HashMap, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use config::{ConfigError, Environment, File, FileFormat, builder::DefaultState};
use dotenvy::vars;
use explorer_vision::ModelOptions;

use crate::{
    dataset::DatasetSchema,
    storage::{BucketPolicy, StorageConfig},
};

pub struct Config {
    pub project: String,
    pub database_url: String,
    pub dataset: DatasetSchema,
    pub storage: StorageConfig,
    /// How long a signed image URL stays valid.
    pub signed_url_expiry: Duration,
    pub classifier: ClassifierConfig,
    pub bind_addr: SocketAddr,
}

pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub dictionary_path: PathBuf,
    pub options: ModelOptions,
}

pub fn parse_config() -> anyhow::Result<Config> {
    let dotenv_variables = HashMap::from_iter(vars());

    let config = config::ConfigBuilder::<DefaultState>::default()
        .add_source(Environment::default().prefix("EXPLORER"))
        .add_source(Environment::default().source(Some(dotenv_variables)))
        .add_source(File::new("config.toml", FileFormat::Toml).required(false))
        .build()
        .context("Failed to build configuration")?;

    Config::from_source(&config)
}

impl Config {
    pub fn from_source(config: &config::Config) -> anyhow::Result<Self> {
        let project = config
            .get_string("project")
            .or_else(|_| config.get_string("google_cloud_project"))
            .context("You should define the EXPLORER_PROJECT or GOOGLE_CLOUD_PROJECT.")?;

        let database_url = config
            .get_string("database_url")
            .context("You should define the DATABASE_URL.")?;

        let dataset = DatasetSchema::new(or_default(config.get_string("dataset"), "openimages".into())?)?;

        let policy = or_default(config.get_string("bucket_policy"), "signed".into())?
            .parse::<BucketPolicy>()?;
        let bucket = or_default(config.get_string("bucket"), policy.bucket_name(&project))?;
        let credential_path = or_default(config.get_string("gcs_credential_path").map(Some), None)?;

        let signed_url_expiry = or_default(config.get_int("signed_url_expiry_secs"), 3600)?;
        let signed_url_expiry = u64::try_from(signed_url_expiry)
            .map(Duration::from_secs)
            .context("SIGNED_URL_EXPIRY_SECS must not be negative")?;

        let defaults = ModelOptions::default();
        let input_size = or_default(config.get_int("model_input_size"), defaults.input_size.into())?;
        let options = ModelOptions {
            input_size: u32::try_from(input_size)
                .ok()
                .filter(|size| *size > 0)
                .context("MODEL_INPUT_SIZE must be a positive integer")?,
            softmax: or_default(config.get_bool("model_softmax"), defaults.softmax)?,
            ..defaults
        };
        let classifier = ClassifierConfig {
            model_path: or_default(config.get_string("model_path"), "static/model/model.onnx".into())?.into(),
            dictionary_path: or_default(config.get_string("dictionary_path"), "static/model/dict.txt".into())?.into(),
            options,
        };

        let bind_addr = or_default(config.get_string("bind_addr"), "0.0.0.0:8080".into())?
            .parse::<SocketAddr>()
            .context("Invalid BIND_ADDR")?;

        Ok(Config {
            project,
            database_url,
            dataset,
            storage: StorageConfig {
                bucket,
                policy,
                credential_path,
            },
            signed_url_expiry,
            classifier,
            bind_addr,
        })
    }
}

/// Fall back to `default` when the key is not set, but keep reporting values
/// that are set and invalid.
fn or_default<T>(value: Result<T, ConfigError>, default: T) -> anyhow::Result<T> {
    match value {
        Err(ConfigError::NotFound(_)) => Ok(default),
        other => other.context("Invalid configuration value"),
    }
}
