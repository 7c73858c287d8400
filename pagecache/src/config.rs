//! Deserializable configuration of cache backends.

use crate::cache::object_store::{ProbeFailurePolicy, UploadMode};
use crate::store::http::signing::Credentials;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Selects and configures a cache backend.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum CacheConfig {
    /// Keeps artifacts in process memory; they are lost when the process exits.
    InMemory,
    Filesystem { path: PathBuf },
    ObjectStore(ObjectStoreConfig),
}

/// Configuration of an object store cache backend talking to an S3-compatible service.
///
/// Timeouts are given as human-readable durations like `"5s"` or `"2min"`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    /// Base URL of the service, e.g. `https://s3.eu-central-1.amazonaws.com`.
    pub endpoint: Url,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Requests are sent unsigned if no credentials are given.
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub connect_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub io_timeout: Option<Duration>,
    #[serde(default)]
    pub probe_failure_policy: ProbeFailurePolicy,
    #[serde(default)]
    pub upload_mode: UploadMode,
}

impl ObjectStoreConfig {
    pub fn new(endpoint: Url, bucket: impl Into<String>) -> Self {
        Self {
            endpoint,
            bucket: bucket.into(),
            region: default_region(),
            credentials: None,
            connect_timeout: None,
            io_timeout: None,
            probe_failure_policy: ProbeFailurePolicy::default(),
            upload_mode: UploadMode::default(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn deserialize_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value)
        .map(Some)
        .map_err(serde::de::Error::custom)
}
