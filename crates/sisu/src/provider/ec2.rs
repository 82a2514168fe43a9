//! EC2 provider: instances as directories of synthesized JSON files.

use async_trait::async_trait;
use aws_sdk_ec2::types::{Instance, Tag};
use aws_sdk_ec2::Client;
use serde_json::{json, Map, Value};

use super::{
    fmt_datetime, load_sdk_config, to_pretty_json, Entry, Provider, ProviderCache, CACHE_TTL,
};
use crate::error::{Error, Result};

const INSTANCE_FILES: &[&str] = &["info.json", "security-groups.json", "tags.json"];

pub(crate) struct Ec2Provider {
    client: Client,
    cache: ProviderCache,
}

impl Ec2Provider {
    pub(crate) async fn new(profile: Option<&str>, region: &str) -> Result<Self> {
        let config = load_sdk_config(profile, region).await;
        Ok(Self {
            client: Client::new(&config),
            cache: ProviderCache::new(CACHE_TTL),
        })
    }

    async fn list_instances(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut pages = self.client.describe_instances().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(Error::backend)?;
            for reservation in page.reservations() {
                for instance in reservation.instances() {
                    if let Some(id) = instance.instance_id() {
                        entries.push(Entry::dir(id));
                    }
                }
            }
        }
        Ok(entries)
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Instance> {
        let resp = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|_| Error::not_found(instance_id))?;

        resp.reservations()
            .first()
            .and_then(|r| r.instances().first())
            .cloned()
            .ok_or_else(|| Error::not_found(instance_id))
    }

    async fn read_uncached(&self, path: &str) -> Result<Vec<u8>> {
        let parts: Vec<&str> = path.split('/').collect();
        let [instance_id, file] = parts.as_slice() else {
            return Err(Error::InvalidPath(path.to_string()));
        };

        let instance = self.describe_instance(instance_id).await?;
        match *file {
            "info.json" => Ok(to_pretty_json(&instance_json(&instance))),
            "security-groups.json" => Ok(to_pretty_json(&security_groups_json(&instance))),
            "tags.json" => Ok(to_pretty_json(&tags_json(instance.tags()))),
            _ => Err(Error::not_found(path)),
        }
    }
}

fn instance_json(instance: &Instance) -> Value {
    let mut doc = Map::new();
    if let Some(id) = instance.instance_id() {
        doc.insert("InstanceId".into(), json!(id));
    }
    if let Some(instance_type) = instance.instance_type() {
        doc.insert("InstanceType".into(), json!(instance_type.as_str()));
    }
    if let Some(state) = instance.state().and_then(|s| s.name()) {
        doc.insert("State".into(), json!(state.as_str()));
    }
    if let Some(image) = instance.image_id() {
        doc.insert("ImageId".into(), json!(image));
    }
    if let Some(launched) = instance.launch_time() {
        doc.insert("LaunchTime".into(), fmt_datetime(launched));
    }
    if let Some(az) = instance.placement().and_then(|p| p.availability_zone()) {
        doc.insert("AvailabilityZone".into(), json!(az));
    }
    if let Some(vpc) = instance.vpc_id() {
        doc.insert("VpcId".into(), json!(vpc));
    }
    if let Some(subnet) = instance.subnet_id() {
        doc.insert("SubnetId".into(), json!(subnet));
    }
    if let Some(ip) = instance.private_ip_address() {
        doc.insert("PrivateIpAddress".into(), json!(ip));
    }
    if let Some(ip) = instance.public_ip_address() {
        doc.insert("PublicIpAddress".into(), json!(ip));
    }
    if let Some(key) = instance.key_name() {
        doc.insert("KeyName".into(), json!(key));
    }
    Value::Object(doc)
}

fn security_groups_json(instance: &Instance) -> Value {
    let groups: Vec<Value> = instance
        .security_groups()
        .iter()
        .map(|group| {
            json!({
                "GroupId": group.group_id(),
                "GroupName": group.group_name(),
            })
        })
        .collect();
    json!(groups)
}

/// Tag list flattened to a name -> value object for easier grepping.
fn tags_json(tags: &[Tag]) -> Value {
    let mut doc = Map::new();
    for tag in tags {
        if let (Some(key), Some(value)) = (tag.key(), tag.value()) {
            doc.insert(key.to_string(), json!(value));
        }
    }
    Value::Object(doc)
}

#[async_trait]
impl Provider for Ec2Provider {
    fn name(&self) -> &'static str {
        "ec2"
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        if let Some(entries) = self.cache.listings.get(path) {
            return Ok(entries);
        }

        let entries = if path.is_empty() {
            self.list_instances().await?
        } else if !path.contains('/') {
            INSTANCE_FILES
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

        let data = self.read_uncached(path).await?;
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
                [instance_id] => {
                    self.describe_instance(instance_id).await?;
                    Entry::dir(*instance_id)
                }
                [_, file] if INSTANCE_FILES.contains(file) => Entry::synthesized(*file),
                _ => return Err(Error::not_found(path)),
            }
        };

        self.cache.stats.set(path, entry.clone());
        Ok(entry)
    }
}
