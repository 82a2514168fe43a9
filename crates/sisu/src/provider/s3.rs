//! S3 provider: buckets and prefix-delimited objects.
//!
//! The tree is two-level: buckets at the root, then a `/`-delimited view of
//! object keys below each bucket. S3 has no real directories, so a "prefix
//! with children" lists and stats as one.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::{load_sdk_config, to_system_time, Entry, Provider, ProviderCache, CACHE_TTL};
use crate::error::{Error, Result};

/// Hard cap on entries returned per directory listing.
const MAX_LIST_ENTRIES: i32 = 100;

/// Synthesized marker appended to truncated listings.
const MORE_RESULTS_NAME: &str = "_more_results.txt";

fn more_results_message() -> String {
    format!(
        "Showing first {MAX_LIST_ENTRIES} entries. There are more results not displayed.\n\
         Use AWS CLI for full listing: aws s3 ls s3://bucket/prefix/\n"
    )
}

fn more_results_entry() -> Entry {
    Entry::file(MORE_RESULTS_NAME, more_results_message().len() as u64, None)
}

/// Split a subpath into `(bucket, key)`; the key may be empty.
fn split_object_path(path: &str) -> (&str, &str) {
    match path.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (path, ""),
    }
}

pub(crate) struct S3Provider {
    client: Client,
    cache: ProviderCache,
}

impl S3Provider {
    pub(crate) async fn new(profile: Option<&str>, region: &str) -> Result<Self> {
        let config = load_sdk_config(profile, region).await;
        Ok(Self {
            client: Client::new(&config),
            cache: ProviderCache::new(CACHE_TTL),
        })
    }

    async fn list_buckets(&self) -> Result<Vec<Entry>> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(Error::backend)?;

        let entries = resp
            .buckets()
            .iter()
            .filter_map(|bucket| {
                let name = bucket.name()?;
                Some(Entry {
                    name: name.to_string(),
                    is_dir: true,
                    size: 0,
                    mtime: to_system_time(bucket.creation_date()),
                })
            })
            .collect();
        Ok(entries)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<Entry>> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .delimiter("/")
            .max_keys(MAX_LIST_ENTRIES)
            .send()
            .await
            .map_err(Error::backend)?;

        let mut entries = Vec::new();

        // Common prefixes are the "directories" of the delimited view.
        for cp in resp.common_prefixes() {
            if let Some(full) = cp.prefix() {
                let name = full
                    .strip_prefix(prefix)
                    .unwrap_or(full)
                    .trim_end_matches('/');
                if !name.is_empty() {
                    entries.push(Entry::dir(name));
                }
            }
        }

        for obj in resp.contents() {
            if let Some(key) = obj.key() {
                let name = key.strip_prefix(prefix).unwrap_or(key);
                // Skip the prefix's own zero-byte marker object.
                if name.is_empty() || name == "/" {
                    continue;
                }
                entries.push(Entry {
                    name: name.to_string(),
                    is_dir: false,
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    mtime: to_system_time(obj.last_modified()),
                });
            }
        }

        if resp.is_truncated().unwrap_or(false) {
            entries.push(more_results_entry());
        }

        Ok(entries)
    }

    async fn stat_uncached(&self, path: &str) -> Result<Entry> {
        let (bucket, key) = split_object_path(path);

        if key.is_empty() {
            self.client
                .head_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|err| {
                    let err = err.into_service_error();
                    if err.is_not_found() {
                        Error::not_found(path)
                    } else {
                        Error::backend(err)
                    }
                })?;
            return Ok(Entry::dir(bucket));
        }

        if key.ends_with(MORE_RESULTS_NAME) {
            return Ok(more_results_entry());
        }

        // A prefix with at least one key below it is a directory.
        let probe = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(format!("{key}/"))
            .max_keys(1)
            .send()
            .await;
        if let Ok(resp) = probe {
            if !resp.contents().is_empty() || !resp.common_prefixes().is_empty() {
                return Ok(Entry::dir(key));
            }
        }

        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_not_found() {
                    Error::not_found(path)
                } else {
                    Error::backend(err)
                }
            })?;

        Ok(Entry {
            name: key.to_string(),
            is_dir: false,
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            mtime: to_system_time(resp.last_modified()),
        })
    }
}

#[async_trait]
impl Provider for S3Provider {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        if let Some(entries) = self.cache.listings.get(path) {
            return Ok(entries);
        }

        let entries = if path.is_empty() {
            self.list_buckets().await?
        } else {
            let (bucket, key) = split_object_path(path);
            let prefix = if key.is_empty() {
                String::new()
            } else if key.ends_with('/') {
                key.to_string()
            } else {
                format!("{key}/")
            };
            self.list_objects(bucket, &prefix).await?
        };

        self.cache.listings.set(path, entries.clone());
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let (bucket, key) = split_object_path(path);
        if key.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }

        if key.ends_with(MORE_RESULTS_NAME) {
            return Ok(more_results_message().into_bytes());
        }

        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_no_such_key() {
                    Error::not_found(path)
                } else {
                    Error::backend(err)
                }
            })?;

        let data = resp.body.collect().await.map_err(Error::backend)?;
        Ok(data.into_bytes().to_vec())
    }

    async fn stat(&self, path: &str) -> Result<Entry> {
        if let Some(entry) = self.cache.stats.get(path) {
            return Ok(entry);
        }

        let entry = self.stat_uncached(path).await?;
        self.cache.stats.set(path, entry.clone());
        Ok(entry)
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let (bucket, key) = split_object_path(path);
        if key.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(Error::backend)?;

        self.cache.invalidate(path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (bucket, key) = split_object_path(path);
        if key.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(Error::backend)?;

        self.cache.invalidate(path);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn truncation_message_names_the_cap() {
        let message = more_results_message();
        assert!(message.contains("first 100 entries"));
        assert!(message.ends_with('\n'));
    }

    #[test]
    fn marker_entry_is_a_statable_file() {
        let entry = more_results_entry();
        assert_eq!(entry.name, MORE_RESULTS_NAME);
        assert!(!entry.is_dir);
        assert_eq!(entry.size, more_results_message().len() as u64);
    }

    #[test]
    fn object_path_splits_on_first_separator() {
        assert_eq!(split_object_path("bucket"), ("bucket", ""));
        assert_eq!(split_object_path("bucket/key"), ("bucket", "key"));
        assert_eq!(
            split_object_path("bucket/logs/app.log"),
            ("bucket", "logs/app.log")
        );
    }
}
