//! IAM provider: users, roles, policies and groups as directories.
//!
//! Everything here is synthesized: entity directories hold fixed JSON files
//! rendered from one or more API responses, and `policies/` is a flat
//! listing of customer-managed policy documents. Embedded policy documents
//! arrive percent-encoded and are decoded before serialization. Read-only.

use async_trait::async_trait;
use aws_sdk_iam::types::{PolicyScopeType, User};
use aws_sdk_iam::Client;
use serde_json::{json, Value};

use super::{
    decode_policy_document, fmt_datetime, load_sdk_config, to_pretty_json, Entry, Provider,
    ProviderCache, CACHE_TTL,
};
use crate::error::{Error, Result};

const CATEGORIES: &[&str] = &["users", "roles", "policies", "groups"];

pub(crate) struct IamProvider {
    client: Client,
    cache: ProviderCache,
}

impl IamProvider {
    pub(crate) async fn new(profile: Option<&str>, region: &str) -> Result<Self> {
        let config = load_sdk_config(profile, region).await;
        Ok(Self {
            client: Client::new(&config),
            cache: ProviderCache::new(CACHE_TTL),
        })
    }

    async fn read_dir_uncached(&self, path: &str) -> Result<Vec<Entry>> {
        if path.is_empty() {
            return Ok(CATEGORIES.iter().map(|c| Entry::dir(*c)).collect());
        }

        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            ["users"] => self.list_users().await,
            ["roles"] => self.list_roles().await,
            ["policies"] => self.list_policies().await,
            ["groups"] => self.list_groups().await,
            ["users", _] => Ok(entity_files(&["info.json", "policies.json", "groups.json"])),
            ["roles", _] => Ok(entity_files(&["info.json", "policies.json"])),
            ["groups", _] => Ok(entity_files(&["info.json", "policies.json", "members.json"])),
            _ => Err(Error::not_found(path)),
        }
    }

    async fn list_users(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut pages = self.client.list_users().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(Error::backend)?;
            for user in page.users() {
                entries.push(Entry::dir(user.user_name()));
            }
        }
        Ok(entries)
    }

    async fn list_roles(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut pages = self.client.list_roles().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(Error::backend)?;
            for role in page.roles() {
                entries.push(Entry::dir(role.role_name()));
            }
        }
        Ok(entries)
    }

    async fn list_groups(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut pages = self.client.list_groups().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(Error::backend)?;
            for group in page.groups() {
                entries.push(Entry::dir(group.group_name()));
            }
        }
        Ok(entries)
    }

    /// Customer-managed policies only; the AWS-managed set is enormous.
    async fn list_policies(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut pages = self
            .client
            .list_policies()
            .scope(PolicyScopeType::Local)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(Error::backend)?;
            for policy in page.policies() {
                if let Some(name) = policy.policy_name() {
                    entries.push(Entry::synthesized(format!("{name}.json")));
                }
            }
        }
        Ok(entries)
    }

    async fn read_uncached(&self, path: &str) -> Result<Vec<u8>> {
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            ["policies", file] => {
                let name = file.strip_suffix(".json").unwrap_or(file);
                self.policy_document(name).await
            }
            ["users", name, "info.json"] => self.user_info(name).await,
            ["users", name, "policies.json"] => {
                self.entity_policies(EntityKind::User, name).await
            }
            ["users", name, "groups.json"] => self.user_groups(name).await,
            ["roles", name, "info.json"] => self.role_info(name).await,
            ["roles", name, "policies.json"] => {
                self.entity_policies(EntityKind::Role, name).await
            }
            ["groups", name, "info.json"] => self.group_info(name).await,
            ["groups", name, "policies.json"] => {
                self.entity_policies(EntityKind::Group, name).await
            }
            ["groups", name, "members.json"] => self.group_members(name).await,
            _ => Err(Error::not_found(path)),
        }
    }

    async fn user_info(&self, name: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_user()
            .user_name(name)
            .send()
            .await
            .map_err(Error::backend)?;
        let user = resp
            .user()
            .ok_or_else(|| Error::not_found(format!("users/{name}")))?;
        Ok(to_pretty_json(&user_json(user)))
    }

    async fn user_groups(&self, name: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .list_groups_for_user()
            .user_name(name)
            .send()
            .await
            .map_err(Error::backend)?;
        let groups: Vec<&str> = resp.groups().iter().map(|g| g.group_name()).collect();
        Ok(to_pretty_json(&json!(groups)))
    }

    async fn role_info(&self, name: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(Error::backend)?;
        let role = resp
            .role()
            .ok_or_else(|| Error::not_found(format!("roles/{name}")))?;

        let mut doc = json!({
            "Path": role.path(),
            "RoleName": role.role_name(),
            "RoleId": role.role_id(),
            "Arn": role.arn(),
            "CreateDate": fmt_datetime(role.create_date()),
        });
        if let Some(description) = role.description() {
            doc["Description"] = json!(description);
        }
        if let Some(duration) = role.max_session_duration() {
            doc["MaxSessionDuration"] = json!(duration);
        }
        // The trust policy is embedded percent-encoded; decode it in place.
        if let Some(trust) = role.assume_role_policy_document() {
            doc["AssumeRolePolicyDocument"] =
                decode_policy_document(trust).unwrap_or_else(|| json!(trust));
        }
        Ok(to_pretty_json(&doc))
    }

    async fn group_info(&self, name: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_group()
            .group_name(name)
            .send()
            .await
            .map_err(Error::backend)?;
        let group = resp
            .group()
            .ok_or_else(|| Error::not_found(format!("groups/{name}")))?;
        let doc = json!({
            "Path": group.path(),
            "GroupName": group.group_name(),
            "GroupId": group.group_id(),
            "Arn": group.arn(),
            "CreateDate": fmt_datetime(group.create_date()),
        });
        Ok(to_pretty_json(&doc))
    }

    async fn group_members(&self, name: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_group()
            .group_name(name)
            .send()
            .await
            .map_err(Error::backend)?;
        let members: Vec<&str> = resp.users().iter().map(User::user_name).collect();
        Ok(to_pretty_json(&json!(members)))
    }

    /// Attached-policy ARNs plus `inline:<name>` markers. A failure listing
    /// one kind degrades to the other instead of erroring the whole file.
    async fn entity_policies(&self, kind: EntityKind, name: &str) -> Result<Vec<u8>> {
        let mut policies: Vec<String> = Vec::new();

        match kind {
            EntityKind::User => {
                if let Ok(resp) = self
                    .client
                    .list_attached_user_policies()
                    .user_name(name)
                    .send()
                    .await
                {
                    for policy in resp.attached_policies() {
                        if let Some(arn) = policy.policy_arn() {
                            policies.push(arn.to_string());
                        }
                    }
                }
                if let Ok(resp) = self.client.list_user_policies().user_name(name).send().await
                {
                    for inline in resp.policy_names() {
                        policies.push(format!("inline:{inline}"));
                    }
                }
            }
            EntityKind::Role => {
                if let Ok(resp) = self
                    .client
                    .list_attached_role_policies()
                    .role_name(name)
                    .send()
                    .await
                {
                    for policy in resp.attached_policies() {
                        if let Some(arn) = policy.policy_arn() {
                            policies.push(arn.to_string());
                        }
                    }
                }
                if let Ok(resp) = self.client.list_role_policies().role_name(name).send().await
                {
                    for inline in resp.policy_names() {
                        policies.push(format!("inline:{inline}"));
                    }
                }
            }
            EntityKind::Group => {
                if let Ok(resp) = self
                    .client
                    .list_attached_group_policies()
                    .group_name(name)
                    .send()
                    .await
                {
                    for policy in resp.attached_policies() {
                        if let Some(arn) = policy.policy_arn() {
                            policies.push(arn.to_string());
                        }
                    }
                }
                if let Ok(resp) = self
                    .client
                    .list_group_policies()
                    .group_name(name)
                    .send()
                    .await
                {
                    for inline in resp.policy_names() {
                        policies.push(format!("inline:{inline}"));
                    }
                }
            }
        }

        Ok(to_pretty_json(&json!(policies)))
    }

    /// The default version's document for a customer-managed policy,
    /// percent-decoded and re-indented.
    async fn policy_document(&self, name: &str) -> Result<Vec<u8>> {
        let mut found: Option<(String, String)> = None;
        let mut pages = self
            .client
            .list_policies()
            .scope(PolicyScopeType::Local)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(Error::backend)?;
            for policy in page.policies() {
                if policy.policy_name() == Some(name) {
                    if let (Some(arn), Some(version)) =
                        (policy.arn(), policy.default_version_id())
                    {
                        found = Some((arn.to_string(), version.to_string()));
                    }
                }
            }
            if found.is_some() {
                break;
            }
        }

        let (arn, version) =
            found.ok_or_else(|| Error::not_found(format!("policies/{name}.json")))?;

        let resp = self
            .client
            .get_policy_version()
            .policy_arn(arn)
            .version_id(version)
            .send()
            .await
            .map_err(Error::backend)?;

        let document = resp
            .policy_version()
            .and_then(|v| v.document())
            .ok_or_else(|| Error::not_found(format!("policies/{name}.json")))?;

        match decode_policy_document(document) {
            Some(doc) => Ok(to_pretty_json(&doc)),
            None => Ok(to_pretty_json(&json!(document))),
        }
    }

    fn stat_shape(&self, path: &str) -> Result<Entry> {
        if path.is_empty() {
            return Ok(Entry::dir(""));
        }

        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            [category] if CATEGORIES.contains(category) => Ok(Entry::dir(*category)),
            ["policies", file] if file.ends_with(".json") => Ok(Entry::synthesized(*file)),
            ["users" | "roles" | "groups", name] => Ok(Entry::dir(*name)),
            ["users" | "roles" | "groups", _, file] if file.ends_with(".json") => {
                Ok(Entry::synthesized(*file))
            }
            _ => Err(Error::not_found(path)),
        }
    }
}

enum EntityKind {
    User,
    Role,
    Group,
}

fn entity_files(names: &[&str]) -> Vec<Entry> {
    names.iter().map(|name| Entry::synthesized(*name)).collect()
}

fn user_json(user: &User) -> Value {
    let mut doc = json!({
        "Path": user.path(),
        "UserName": user.user_name(),
        "UserId": user.user_id(),
        "Arn": user.arn(),
        "CreateDate": fmt_datetime(user.create_date()),
    });
    if let Some(last_used) = user.password_last_used() {
        doc["PasswordLastUsed"] = fmt_datetime(last_used);
    }
    doc
}

#[async_trait]
impl Provider for IamProvider {
    fn name(&self) -> &'static str {
        "iam"
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        if let Some(entries) = self.cache.listings.get(path) {
            return Ok(entries);
        }

        let entries = self.read_dir_uncached(path).await?;
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

        let entry = self.stat_shape(path)?;
        self.cache.stats.set(path, entry.clone());
        Ok(entry)
    }
}
