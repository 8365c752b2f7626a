#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! S3-compatible object storage sync for collision source files and
//! warehouse artifacts.
//!
//! ## Smart sync
//!
//! Downloads and uploads use **size + MD5/ETag comparison** to skip
//! transfers when the local and remote files are identical, so repeated
//! runs against the same source export only fetch it once.
//!
//! ## Execution modes
//!
//! The caller passes an [`ExecutionMode`] to [`ObjectStore::connect`]:
//!
//! | Mode | Credentials |
//! |---|---|
//! | `local` | `COLLISION_METRICS_ACCESS_KEY_ID` and `COLLISION_METRICS_SECRET_ACCESS_KEY` (required), `COLLISION_METRICS_ENDPOINT_URL` (optional) |
//! | `cluster` | the default AWS provider chain (instance profile, web identity, `AWS_*` variables) |

use std::path::{Path, PathBuf};
use std::time::Duration;

use aws_config::Region;
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Access key variable read in [`ExecutionMode::Local`].
pub const ACCESS_KEY_ENV: &str = "COLLISION_METRICS_ACCESS_KEY_ID";

/// Secret key variable read in [`ExecutionMode::Local`].
pub const SECRET_KEY_ENV: &str = "COLLISION_METRICS_SECRET_ACCESS_KEY";

/// Optional endpoint override read in [`ExecutionMode::Local`].
pub const ENDPOINT_ENV: &str = "COLLISION_METRICS_ENDPOINT_URL";

/// Key prefix warehouse artifacts are published under.
pub const WAREHOUSE_PREFIX: &str = "warehouse";

/// Attempts per transfer, the first one included.
const TRANSFER_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubled for each later one.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

type SdkError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during object storage operations.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    /// A variable required in local mode is unset or empty.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Variable name.
        name: String,
    },

    /// The requested object does not exist.
    #[error("Object not found: s3://{bucket}/{key}")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// `GetObject` failed on every attempt.
    #[error("GetObject s3://{bucket}/{key} failed: {source}")]
    Download {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Last SDK error.
        source: SdkError,
    },

    /// `PutObject` failed on every attempt.
    #[error("PutObject s3://{bucket}/{key} failed: {source}")]
    Upload {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Last SDK error.
        source: SdkError,
    },

    /// `HeadObject` failed for a reason other than a missing object.
    #[error("HeadObject s3://{bucket}/{key} failed: {source}")]
    Head {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// SDK error.
        source: SdkError,
    },

    /// Local file error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObjectStoreError {
    /// Whether another attempt might succeed.
    const fn is_transient(&self) -> bool {
        matches!(self, Self::Download { .. } | Self::Upload { .. })
    }
}

/// Where the process runs, which decides how credentials are obtained.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    /// Developer machine: explicit credentials from the environment.
    #[default]
    Local,
    /// Managed cluster: ambient credentials from the provider chain.
    Cluster,
}

/// Explicit credentials used in [`ExecutionMode::Local`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
}

impl LocalCredentials {
    /// Reads the credentials from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::MissingEnv`] if a required variable is
    /// unset.
    pub fn from_env() -> Result<Self, ObjectStoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the credentials through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::MissingEnv`] if a required variable is
    /// absent or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ObjectStoreError> {
        let require = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ObjectStoreError::MissingEnv {
                    name: name.to_string(),
                })
        };

        Ok(Self {
            access_key_id: require(ACCESS_KEY_ENV)?,
            secret_access_key: require(SECRET_KEY_ENV)?,
            endpoint_url: lookup(ENDPOINT_ENV).filter(|v| !v.is_empty()),
        })
    }
}

/// What happened to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Bytes were moved.
    Copied,
    /// Both sides already held the same content.
    Unchanged,
    /// The side being copied from had no such file.
    Missing,
}

/// Tally of [`Transfer`] outcomes over a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub copied: u64,
    pub unchanged: u64,
    pub missing: u64,
}

impl SyncStats {
    pub const fn record(&mut self, transfer: Transfer) {
        match transfer {
            Transfer::Copied => self.copied += 1,
            Transfer::Unchanged => self.unchanged += 1,
            Transfer::Missing => self.missing += 1,
        }
    }

    #[must_use]
    pub const fn files(&self) -> u64 {
        self.copied + self.unchanged + self.missing
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} files copied ({} unchanged, {} missing)",
            self.copied,
            self.files(),
            self.unchanged,
            self.missing
        )
    }
}

/// Builds the object key for `file_name` under `prefix`.
///
/// Leading and trailing slashes of the prefix are ignored; an empty prefix
/// places the file at the bucket root.
#[must_use]
pub fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{prefix}/{file_name}")
    }
}

/// Size and `ETag` of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteObject {
    size: u64,
    etag: Option<String>,
}

impl RemoteObject {
    /// The content MD5, when the `ETag` is one. Multipart uploads have
    /// `ETag`s of the form `<hash>-<parts>`, which are not.
    fn md5(&self) -> Option<&str> {
        let etag = self.etag.as_deref()?.trim_matches('"');
        (etag.len() == 32 && etag.bytes().all(|b| b.is_ascii_hexdigit())).then_some(etag)
    }

    /// Whether `local` holds the same content: equal size, and equal MD5
    /// when the object exposes one.
    async fn matches(&self, local: &Path) -> bool {
        match tokio::fs::metadata(local).await {
            Ok(meta) if meta.len() == self.size => {}
            _ => return false,
        }
        let Some(expected) = self.md5() else {
            return true;
        };
        file_md5(local)
            .await
            .is_ok_and(|digest| digest.eq_ignore_ascii_case(expected))
    }
}

/// Runs `attempt` up to [`TRANSFER_ATTEMPTS`] times, backing off
/// exponentially after transient failures.
async fn with_retry<T, F, Fut>(what: &str, mut attempt: F) -> Result<T, ObjectStoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ObjectStoreError>>,
{
    let mut n = 1;
    loop {
        match attempt().await {
            Err(e) if e.is_transient() && n < TRANSFER_ATTEMPTS => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(n - 1);
                log::warn!("{what}: attempt {n}/{TRANSFER_ATTEMPTS} failed ({e}), retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                n += 1;
            }
            result => return result,
        }
    }
}

/// Client for one bucket of an S3-compatible store.
pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectStore {
    /// Creates a client for `bucket` using the credentials `mode` calls for.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::MissingEnv`] in local mode if a required
    /// variable is unset.
    pub async fn connect(
        mode: ExecutionMode,
        bucket: &str,
        region: &str,
    ) -> Result<Self, ObjectStoreError> {
        let client = match mode {
            ExecutionMode::Local => {
                Self::local_client(&LocalCredentials::from_env()?, region.to_string())
            }
            ExecutionMode::Cluster => {
                let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(Region::new(region.to_string()))
                    .load()
                    .await;
                let config = aws_sdk_s3::config::Builder::from(&sdk_config)
                    .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
                    .build();
                aws_sdk_s3::Client::from_conf(config)
            }
        };

        log::info!("Connected to bucket {bucket} ({mode} mode)");

        Ok(Self {
            client,
            bucket: bucket.to_string(),
        })
    }

    fn local_client(creds: &LocalCredentials, region: String) -> aws_sdk_s3::Client {
        let credentials = Credentials::new(
            &creds.access_key_id,
            &creds.secret_access_key,
            None,
            None,
            "collision-metrics-env",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .region(Region::new(region))
            .credentials_provider(credentials)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled());

        if let Some(endpoint) = &creds.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        aws_sdk_s3::Client::from_conf(builder.build())
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn url(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }

    /// Fetches the source export `file_name` stored under `prefix` into
    /// `local_dir`, returning the local path.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`] if the object does not exist,
    /// or any download error.
    pub async fn fetch_source(
        &self,
        prefix: &str,
        file_name: &str,
        local_dir: &Path,
    ) -> Result<PathBuf, ObjectStoreError> {
        tokio::fs::create_dir_all(local_dir).await?;

        let key = object_key(prefix, file_name);
        let local = local_dir.join(file_name);

        match self.download(&key, &local).await? {
            Transfer::Missing => Err(ObjectStoreError::NotFound {
                bucket: self.bucket.clone(),
                key,
            }),
            Transfer::Copied | Transfer::Unchanged => Ok(local),
        }
    }

    /// Uploads warehouse artifacts under [`WAREHOUSE_PREFIX`].
    ///
    /// # Errors
    ///
    /// Returns the first upload error.
    pub async fn publish(&self, files: &[PathBuf]) -> Result<SyncStats, ObjectStoreError> {
        let mut stats = SyncStats::default();
        for file in files {
            let transfer = match file.file_name().and_then(|n| n.to_str()) {
                Some(name) => self.upload(&object_key(WAREHOUSE_PREFIX, name), file).await?,
                None => {
                    log::warn!("{} has no file name, not publishing it", file.display());
                    Transfer::Missing
                }
            };
            stats.record(transfer);
        }
        log::info!("Published to s3://{}/{WAREHOUSE_PREFIX}: {stats}", self.bucket);
        Ok(stats)
    }

    /// Downloads `key` to `local_path` unless the local copy already
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::Download`] once every attempt has failed,
    /// or a local I/O error.
    pub async fn download(&self, key: &str, local_path: &Path) -> Result<Transfer, ObjectStoreError> {
        let Some(remote) = self.head(key).await? else {
            log::warn!("{} does not exist", self.url(key));
            return Ok(Transfer::Missing);
        };

        if remote.matches(local_path).await {
            log::warn!("{} is up to date, not downloading", local_path.display());
            return Ok(Transfer::Unchanged);
        }

        log::info!(
            "Downloading {} ({} bytes) to {}",
            self.url(key),
            remote.size,
            local_path.display()
        );
        with_retry(&self.url(key), || self.get(key, local_path)).await?;
        Ok(Transfer::Copied)
    }

    async fn get(&self, key: &str, local_path: &Path) -> Result<(), ObjectStoreError> {
        let failed = |source: SdkError| ObjectStoreError::Download {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source,
        };

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| failed(Box::new(e)))?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| failed(Box::new(e)))?;

        tokio::fs::write(local_path, body.into_bytes()).await?;
        Ok(())
    }

    /// Uploads `local_path` to `key` unless the stored object already
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::Upload`] once every attempt has failed,
    /// or a local I/O error.
    pub async fn upload(&self, key: &str, local_path: &Path) -> Result<Transfer, ObjectStoreError> {
        if !tokio::fs::try_exists(local_path).await? {
            log::warn!("{} does not exist, not uploading", local_path.display());
            return Ok(Transfer::Missing);
        }

        if let Some(remote) = self.head(key).await?
            && remote.matches(local_path).await
        {
            log::warn!("{} is up to date, not uploading", self.url(key));
            return Ok(Transfer::Unchanged);
        }

        log::info!("Uploading {} to {}", local_path.display(), self.url(key));
        with_retry(&self.url(key), || self.put(key, local_path)).await?;
        Ok(Transfer::Copied)
    }

    async fn put(&self, key: &str, local_path: &Path) -> Result<(), ObjectStoreError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| ObjectStoreError::Io(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Upload {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: Box::new(e),
            })?;
        Ok(())
    }

    /// Size and `ETag` of `key`, or `None` if it does not exist.
    async fn head(&self, key: &str) -> Result<Option<RemoteObject>, ObjectStoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(RemoteObject {
                size: output
                    .content_length()
                    .and_then(|len| u64::try_from(len).ok())
                    .unwrap_or(0),
                etag: output.e_tag().map(ToString::to_string),
            })),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found) =>
            {
                Ok(None)
            }
            Err(err) => Err(ObjectStoreError::Head {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: Box::new(err),
            }),
        }
    }
}

/// Hex MD5 of a file, hashed on the blocking pool.
async fn file_md5(path: &Path) -> Result<String, std::io::Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        use std::io::BufRead as _;

        let mut reader = std::io::BufReader::with_capacity(256 * 1024, std::fs::File::open(path)?);
        let mut context = md5::Context::new();
        loop {
            let chunk = reader.fill_buf()?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len();
            context.consume(chunk);
            reader.consume(len);
        }
        Ok(format!("{:x}", context.finalize()))
    })
    .await
    .map_err(std::io::Error::other)?
}
