//! SSM provider: Parameter Store as a directory tree.
//!
//! Parameter names are hierarchical (`/app/db/password`), so the tree simply
//! mirrors them with the leading separator implied. A name is a directory
//! iff at least one parameter exists strictly below it.

use async_trait::async_trait;
use aws_sdk_ssm::types::{ParameterStringFilter, ParameterType};
use aws_sdk_ssm::Client;

use super::{load_sdk_config, parent_of, to_system_time, Entry, Provider, ProviderCache, CACHE_TTL};
use crate::error::{Error, Result};

/// Absolute parameter name for a subpath.
fn parameter_name(path: &str) -> String {
    format!("/{path}")
}

/// Absolute prefix used for listing below a subpath, always `/`-terminated.
fn listing_prefix(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        format!("/{path}/")
    }
}

/// Present a stored value as file content: exactly one trailing newline.
fn value_to_content(value: &str) -> Vec<u8> {
    let mut content = value.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }
    content.into_bytes()
}

/// Strip the newline `value_to_content` adds, so a read-edit-write cycle
/// stores the original scalar.
fn content_to_value(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    text.strip_suffix('\n').unwrap_or(&text).to_string()
}

/// First component of a parameter name relative to a listing prefix, plus
/// whether more components follow (making it a directory).
fn child_component<'a>(name: &'a str, prefix: &str) -> Option<(&'a str, bool)> {
    let rest = name.strip_prefix(prefix)?.trim_start_matches('/');
    if rest.is_empty() {
        return None;
    }
    match rest.split_once('/') {
        Some((first, _)) => Some((first, true)),
        None => Some((rest, false)),
    }
}

pub(crate) struct SsmProvider {
    client: Client,
    cache: ProviderCache,
}

impl SsmProvider {
    pub(crate) async fn new(profile: Option<&str>, region: &str) -> Result<Self> {
        let config = load_sdk_config(profile, region).await;
        Ok(Self {
            client: Client::new(&config),
            cache: ProviderCache::new(CACHE_TTL),
        })
    }

    async fn list_parameters(&self, prefix: &str) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut seen = std::collections::HashSet::new();

        // Parameters directly below the prefix. A missing path lists empty
        // rather than erroring, like an empty directory would.
        let mut pages = self
            .client
            .get_parameters_by_path()
            .path(prefix)
            .recursive(false)
            .with_decryption(false)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let Ok(page) = page else {
                return Ok(entries);
            };
            for param in page.parameters() {
                let Some(name) = param.name() else { continue };
                let Some((child, is_dir)) = child_component(name, prefix) else {
                    continue;
                };
                if is_dir {
                    if seen.insert(child.to_string()) {
                        entries.push(Entry::dir(child));
                    }
                } else {
                    entries.push(Entry {
                        name: child.to_string(),
                        is_dir: false,
                        size: param.value().map_or(0, |v| v.len() as u64),
                        mtime: to_system_time(param.last_modified_date()),
                    });
                }
            }
        }

        // The non-recursive listing only sees leaves; a recursive scan over
        // parameter descriptors surfaces the intermediate prefixes.
        let filter = ParameterStringFilter::builder()
            .key("Path")
            .option("Recursive")
            .values(prefix)
            .build()
            .map_err(Error::backend)?;
        let mut pages = self
            .client
            .describe_parameters()
            .parameter_filters(filter)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let Ok(page) = page else { break };
            for param in page.parameters() {
                let Some(name) = param.name() else { continue };
                if let Some((child, true)) = child_component(name, prefix) {
                    if seen.insert(child.to_string()) {
                        entries.push(Entry::dir(child));
                    }
                }
            }
        }

        Ok(entries)
    }

    async fn stat_uncached(&self, path: &str) -> Result<Entry> {
        if path.is_empty() {
            return Ok(Entry::dir(""));
        }

        let resp = self
            .client
            .get_parameter()
            .name(parameter_name(path))
            .with_decryption(false)
            .send()
            .await;
        if let Ok(resp) = resp {
            if let Some(param) = resp.parameter() {
                return Ok(Entry {
                    name: path.to_string(),
                    is_dir: false,
                    size: param.value().map_or(0, |v| v.len() as u64),
                    mtime: to_system_time(param.last_modified_date()),
                });
            }
        }

        // Not a parameter; a prefix with children stats as a directory.
        let resp = self
            .client
            .get_parameters_by_path()
            .path(listing_prefix(path))
            .max_results(1)
            .send()
            .await;
        if let Ok(resp) = resp {
            if !resp.parameters().is_empty() {
                return Ok(Entry::dir(path));
            }
        }

        Err(Error::not_found(path))
    }
}

#[async_trait]
impl Provider for SsmProvider {
    fn name(&self) -> &'static str {
        "ssm"
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        if let Some(entries) = self.cache.listings.get(path) {
            return Ok(entries);
        }

        let entries = self.list_parameters(&listing_prefix(path)).await?;
        self.cache.listings.set(path, entries.clone());
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_parameter()
            .name(parameter_name(path))
            .with_decryption(true)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_parameter_not_found() {
                    Error::not_found(path)
                } else {
                    Error::backend(err)
                }
            })?;

        // A trailing newline keeps cat output tidy; write strips it back.
        let value = resp.parameter().and_then(|p| p.value()).unwrap_or_default();
        Ok(value_to_content(value))
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
        self.client
            .put_parameter()
            .name(parameter_name(path))
            .value(content_to_value(data))
            .r#type(ParameterType::String)
            .overwrite(true)
            .send()
            .await
            .map_err(Error::backend)?;

        self.cache.stats.delete(path);
        self.cache.listings.delete(parent_of(path));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete_parameter()
            .name(parameter_name(path))
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_parameter_not_found() {
                    Error::not_found(path)
                } else {
                    Error::backend(err)
                }
            })?;

        self.cache.stats.delete(path);
        self.cache.listings.delete(parent_of(path));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parameter_names_are_rooted() {
        assert_eq!(parameter_name("app/key"), "/app/key");
        assert_eq!(listing_prefix(""), "/");
        assert_eq!(listing_prefix("app"), "/app/");
    }

    #[test]
    fn child_component_classifies_files_and_dirs() {
        assert_eq!(child_component("/app/key", "/app/"), Some(("key", false)));
        assert_eq!(
            child_component("/app/db/password", "/app/"),
            Some(("db", true))
        );
        assert_eq!(child_component("/app/", "/app/"), None);
        assert_eq!(child_component("/other/key", "/app/"), None);
        // Root listing.
        assert_eq!(child_component("/app/key", "/"), Some(("app", true)));
        assert_eq!(child_component("/top", "/"), Some(("top", false)));
    }

    #[test]
    fn newline_normalization_round_trips() {
        assert_eq!(value_to_content("hello"), b"hello\n");
        assert_eq!(value_to_content("hello\n"), b"hello\n");
        assert_eq!(content_to_value(b"hello\n"), "hello");
        assert_eq!(content_to_value(b"hello"), "hello");
        // Only the single trailing newline is normalized away.
        assert_eq!(content_to_value(b"a\nb\n"), "a\nb");
    }
}
