//! Resource providers.
//!
//! One provider per AWS service, each presenting its resources as a small
//! directory tree over a service-local path. All providers implement the
//! same [`Provider`] capability:
//!
//! - `s3` - buckets and prefix-delimited objects (writable)
//! - `ssm` - hierarchical Parameter Store values (writable)
//! - `iam` - users, roles, policies, groups (read-only)
//! - `ec2` - instances (read-only)
//! - `vpc` - VPCs with subnets, route tables, security groups (read-only)
//! - `lambda` - functions (read-only)
//!
//! Read-only providers keep the trait's default `write`/`delete`, which
//! reject with a permission error.

mod ec2;
mod iam;
mod lambda;
mod s3;
mod ssm;
mod vpc;

pub(crate) use ec2::Ec2Provider;
pub(crate) use iam::IamProvider;
pub(crate) use lambda::LambdaProvider;
pub(crate) use s3::S3Provider;
pub(crate) use ssm::SsmProvider;
pub(crate) use vpc::VpcProvider;

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_smithy_types::date_time::Format;
use aws_smithy_types::DateTime;

use crate::cache::Cache;
use crate::error::{Error, Result};

/// How long provider responses are memoized.
pub(crate) const CACHE_TTL: Duration = Duration::from_secs(300);

/// Stat size reported for files whose bytes are computed on read.
///
/// The true length is only known after the content is rendered; the engine
/// re-stats through the open file handle once it is.
pub(crate) const SYNTHESIZED_SIZE: u64 = 4096;

/// A file or directory entry as seen by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Entry name (final path component only).
    pub name: String,
    /// Whether the entry lists as a directory.
    pub is_dir: bool,
    /// Size in bytes; placeholder for synthesized files, 0 for directories.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    pub mtime: Option<SystemTime>,
}

impl Entry {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
            mtime: None,
        }
    }

    pub fn file(name: impl Into<String>, size: u64, mtime: Option<SystemTime>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
            mtime,
        }
    }

    /// A synthesized file entry with the placeholder size.
    pub fn synthesized(name: impl Into<String>) -> Self {
        Self::file(name, SYNTHESIZED_SIZE, None)
    }
}

/// Uniform capability over a service-local subpath.
///
/// Subpaths never carry leading or trailing separators; the empty subpath is
/// the provider root. Implementations must be safe to call concurrently and
/// must not cache failures: an errored call leaves the cache untouched so a
/// transient outage does not poison later reads.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable service identifier (the skeleton's third path level).
    fn name(&self) -> &'static str;

    /// List entries at the given subpath.
    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>>;

    /// Fetch the content of a file at the given subpath.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Describe a single entry.
    async fn stat(&self, path: &str) -> Result<Entry>;

    /// Replace the file at the given subpath with `data`.
    async fn write(&self, path: &str, _data: &[u8]) -> Result<()> {
        Err(Error::Permission(format!(
            "{} is read-only: {path}",
            self.name()
        )))
    }

    /// Remove the file at the given subpath.
    async fn delete(&self, path: &str) -> Result<()> {
        Err(Error::Permission(format!(
            "{} is read-only: {path}",
            self.name()
        )))
    }
}

/// Per-operation response caches owned by each provider.
///
/// One typed cache per operation instead of a type-erased value store; the
/// key within each cache is the service-local subpath.
pub(crate) struct ProviderCache {
    pub listings: Cache<Vec<Entry>>,
    pub stats: Cache<Entry>,
    pub blobs: Cache<Vec<u8>>,
}

impl ProviderCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            listings: Cache::new(ttl),
            stats: Cache::new(ttl),
            blobs: Cache::new(ttl),
        }
    }

    /// Invalidate after a mutation of `path`: the entry's own stat and the
    /// parent directory's listing.
    pub(crate) fn invalidate(&self, path: &str) {
        self.stats.delete(path);
        self.listings.delete(parent_of(path));
    }
}

/// The listing key that contains `path` as a child (empty = provider root).
pub(crate) fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Load shared AWS configuration for one profile and region.
///
/// `None` selects the SDK's default credential chain; a named profile pins
/// the shared-config profile of the same name.
pub(crate) async fn load_sdk_config(profile: Option<&str>, region: &str) -> aws_config::SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    loader.load().await
}

/// Convert an SDK timestamp into a `SystemTime`, dropping unrepresentable ones.
pub(crate) fn to_system_time(dt: Option<&DateTime>) -> Option<SystemTime> {
    dt.and_then(|dt| SystemTime::try_from(*dt).ok())
}

/// Render an SDK timestamp for synthesized JSON documents.
pub(crate) fn fmt_datetime(dt: &DateTime) -> serde_json::Value {
    match dt.fmt(Format::DateTime) {
        Ok(text) => serde_json::Value::String(text),
        Err(_) => serde_json::Value::Null,
    }
}

/// Serialize a synthesized document: two-space indent, trailing newline.
pub(crate) fn to_pretty_json(value: &serde_json::Value) -> Vec<u8> {
    let mut buf = serde_json::to_vec_pretty(value).unwrap_or_else(|_| b"{}".to_vec());
    buf.push(b'\n');
    buf
}

/// Decode a percent-encoded policy document into plain JSON.
///
/// IAM embeds policy documents URL-encoded; decoding here means grep over
/// the mount sees `"Version"`, not `%22Version%22`. Returns `None` when the
/// input is not a well-formed encoded JSON document.
pub(crate) fn decode_policy_document(doc: &str) -> Option<serde_json::Value> {
    let decoded = percent_encoding::percent_decode_str(doc)
        .decode_utf8()
        .ok()?;
    serde_json::from_str(&decoded).ok()
}
