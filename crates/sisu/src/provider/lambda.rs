//! Lambda provider: functions as directories of synthesized JSON files.

use async_trait::async_trait;
use aws_sdk_lambda::types::FunctionConfiguration;
use aws_sdk_lambda::Client;
use serde_json::{json, Map, Value};

use super::{load_sdk_config, to_pretty_json, Entry, Provider, ProviderCache, CACHE_TTL};
use crate::error::{Error, Result};

const FUNCTION_FILES: &[&str] = &["config.json", "policy.json", "env.json"];

pub(crate) struct LambdaProvider {
    client: Client,
    cache: ProviderCache,
}

impl LambdaProvider {
    pub(crate) async fn new(profile: Option<&str>, region: &str) -> Result<Self> {
        let config = load_sdk_config(profile, region).await;
        Ok(Self {
            client: Client::new(&config),
            cache: ProviderCache::new(CACHE_TTL),
        })
    }

    async fn list_functions(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut pages = self.client.list_functions().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(Error::backend)?;
            for function in page.functions() {
                if let Some(name) = function.function_name() {
                    entries.push(Entry::dir(name));
                }
            }
        }
        Ok(entries)
    }

    async fn function_configuration(&self, name: &str) -> Result<FunctionConfiguration> {
        let resp = self
            .client
            .get_function()
            .function_name(name)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_resource_not_found_exception() {
                    Error::not_found(name)
                } else {
                    Error::backend(err)
                }
            })?;
        resp.configuration()
            .cloned()
            .ok_or_else(|| Error::not_found(name))
    }

    async fn function_config(&self, name: &str) -> Result<Vec<u8>> {
        let config = self.function_configuration(name).await?;
        Ok(to_pretty_json(&configuration_json(&config)))
    }

    /// The resource-based policy. Functions commonly have none, which the
    /// API reports as an error; that renders as `{}`.
    async fn function_policy(&self, name: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_policy()
            .function_name(name)
            .send()
            .await;

        let policy = match resp {
            Ok(resp) => resp.policy().unwrap_or("{}").to_string(),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_resource_not_found_exception() {
                    return Ok(to_pretty_json(&json!({})));
                }
                return Err(Error::backend(err));
            }
        };

        // The policy arrives as a JSON string; re-indent it.
        match serde_json::from_str::<Value>(&policy) {
            Ok(doc) => Ok(to_pretty_json(&doc)),
            Err(_) => Ok(policy.into_bytes()),
        }
    }

    async fn function_env(&self, name: &str) -> Result<Vec<u8>> {
        let config = self.function_configuration(name).await?;
        let mut doc = Map::new();
        if let Some(env) = config.environment().and_then(|e| e.variables()) {
            for (key, value) in env {
                doc.insert(key.clone(), json!(value));
            }
        }
        Ok(to_pretty_json(&Value::Object(doc)))
    }
}

fn configuration_json(config: &FunctionConfiguration) -> Value {
    let mut doc = Map::new();
    if let Some(name) = config.function_name() {
        doc.insert("FunctionName".into(), json!(name));
    }
    if let Some(arn) = config.function_arn() {
        doc.insert("FunctionArn".into(), json!(arn));
    }
    if let Some(runtime) = config.runtime() {
        doc.insert("Runtime".into(), json!(runtime.as_str()));
    }
    if let Some(role) = config.role() {
        doc.insert("Role".into(), json!(role));
    }
    if let Some(handler) = config.handler() {
        doc.insert("Handler".into(), json!(handler));
    }
    if let Some(description) = config.description() {
        doc.insert("Description".into(), json!(description));
    }
    if let Some(memory) = config.memory_size() {
        doc.insert("MemorySize".into(), json!(memory));
    }
    if let Some(timeout) = config.timeout() {
        doc.insert("Timeout".into(), json!(timeout));
    }
    if let Some(modified) = config.last_modified() {
        doc.insert("LastModified".into(), json!(modified));
    }
    Value::Object(doc)
}

#[async_trait]
impl Provider for LambdaProvider {
    fn name(&self) -> &'static str {
        "lambda"
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        if let Some(entries) = self.cache.listings.get(path) {
            return Ok(entries);
        }

        let entries = if path.is_empty() {
            self.list_functions().await?
        } else if !path.contains('/') {
            FUNCTION_FILES
                .iter()
                .map(|name| Entry::synthesized(*name))
                .collect()
        } else {
            return Err(Error::not_found(path));
        };

        self.cache.listings.set(path, entries.clone());
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        if let Some(data) = self.cache.blobs.get(path) {
            return Ok(data);
        }

        let parts: Vec<&str> = path.split('/').collect();
        let [name, file] = parts.as_slice() else {
            return Err(Error::InvalidPath(path.to_string()));
        };
        let data = match *file {
            "config.json" => self.function_config(name).await?,
            "policy.json" => self.function_policy(name).await?,
            "env.json" => self.function_env(name).await?,
            _ => return Err(Error::not_found(path)),
        };

        self.cache.blobs.set(path, data.clone());
        Ok(data)
    }

    async fn stat(&self, path: &str) -> Result<Entry> {
        if let Some(entry) = self.cache.stats.get(path) {
            return Ok(entry);
        }

        let entry = if path.is_empty() {
            Entry::dir("")
        } else {
            let parts: Vec<&str> = path.split('/').collect();
            match parts.as_slice() {
                [name] => {
                    self.function_configuration(name).await?;
                    Entry::dir(*name)
                }
                [_, file] if FUNCTION_FILES.contains(file) => Entry::synthesized(*file),
                _ => return Err(Error::not_found(path)),
            }
        };

        self.cache.stats.set(path, entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn configuration_json_renders_known_fields() {
        let config = FunctionConfiguration::builder()
            .function_name("resize-images")
            .handler("index.handler")
            .memory_size(256)
            .timeout(30)
            .build();
        let doc = configuration_json(&config);
        assert_eq!(doc["FunctionName"], "resize-images");
        assert_eq!(doc["Handler"], "index.handler");
        assert_eq!(doc["MemorySize"], 256);
        assert_eq!(doc["Timeout"], 30);
        assert!(doc.get("Runtime").is_none());
    }
}
